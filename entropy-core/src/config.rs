//! Configuration management for the entropy server
//!
//! Configuration comes from a JSON or YAML file (format chosen by extension) or
//! from `ENTROPY_`-prefixed environment variables. File keys also accept the
//! compact lowercase spellings used by older deployments (`buffersize`,
//! `maxrequestbytes`, ...).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// A global request budget: at most `requests` per `per_seconds`
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    #[serde(alias = "perseconds", alias = "period")]
    pub per_seconds: u64,
}

/// Parses `"<requests>/<seconds>"`, e.g. `"100/60"`
impl FromStr for RateLimit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (requests, per_seconds) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("Invalid rate limit '{}', expected N/SECONDS", s)))?;

        let requests = requests
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid rate limit '{}': {}", s, e)))?;
        let per_seconds = per_seconds
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid rate limit '{}': {}", s, e)))?;

        Ok(Self { requests, per_seconds })
    }
}

/// Entropy server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server identity string reported by `/api/info/`
    pub server: String,

    /// Supported protocol versions
    #[serde(alias = "protocolversions")]
    pub protocol_versions: Vec<String>,

    /// Description of the entropy source
    pub source: String,

    /// Claimed bits of entropy per byte delivered by the source
    #[serde(alias = "bitsofentropy")]
    pub bits_of_entropy: u32,

    /// Smallest request served; smaller requests are rounded up
    #[serde(alias = "minrequestbytes", default = "default_min_request_bytes")]
    pub min_request_bytes: usize,

    /// Largest request served; larger requests are clamped
    #[serde(alias = "maxrequestbytes", default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Global request budgets
    #[serde(alias = "ratelimits", default)]
    pub rate_limits: Vec<RateLimit>,

    /// Ring buffer capacity in bytes
    #[serde(alias = "buffersize", default = "default_buffer_size")]
    pub buffer_size: usize,

    /// HTTP port (falls back to `PORT`, then 11372)
    #[serde(default)]
    pub port: Option<u16>,

    /// Bind address for HTTP server
    #[serde(alias = "bindaddress", default = "default_bind_address")]
    pub bind_address: String,

    /// How long a request may wait for entropy before failing
    #[serde(alias = "requesttimeoutms", default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Character device delivering random bytes
    #[serde(alias = "devicepath", default = "default_device_path")]
    pub device_path: PathBuf,

    /// Hex-encoded command written to the device after opening it
    #[serde(alias = "deviceinitcommand", default)]
    pub device_init_command: Option<String>,

    /// Bytes requested per device read
    #[serde(alias = "readchunksize", default = "default_chunk_size")]
    pub read_chunk_size: usize,

    /// Serve pseudo-random bytes instead of reading the device (development only)
    #[serde(default)]
    pub simulate: bool,
}

impl ServerConfig {
    /// Load configuration from a JSON or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// `ENTROPY_RATE_LIMITS` is a comma-separated list of `N/SECONDS` budgets.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut rate_limits = None;
        let vars: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(key, value)| {
                if key == "ENTROPY_RATE_LIMITS" {
                    rate_limits = Some(value.clone());
                    false
                } else {
                    true
                }
            })
            .collect();

        let mut config: Self = envy::prefixed("ENTROPY_").from_iter(vars)?;

        if let Some(limits) = rate_limits {
            config.rate_limits = limits
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(RateLimit::from_str)
                .collect::<Result<_>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Identity fields are reported verbatim and must be present
        for (value, name) in [(&self.server, "server"), (&self.source, "source")] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} cannot be empty", name)));
            }
        }

        if self.protocol_versions.is_empty() {
            return Err(Error::Config(
                "At least one protocol version required".to_string(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be > 0".to_string()));
        }

        if self.min_request_bytes == 0 || self.min_request_bytes > self.max_request_bytes {
            return Err(Error::Config(format!(
                "min_request_bytes must be between 1 and max_request_bytes ({})",
                self.max_request_bytes
            )));
        }

        // A request larger than the ring could never be satisfied
        if self.max_request_bytes > self.buffer_size {
            return Err(Error::Config(format!(
                "max_request_bytes ({}) must be <= buffer_size ({})",
                self.max_request_bytes, self.buffer_size
            )));
        }

        if self.read_chunk_size == 0 {
            return Err(Error::Config("read_chunk_size must be > 0".to_string()));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be > 0".to_string()));
        }

        for limit in &self.rate_limits {
            if limit.requests == 0 || limit.per_seconds == 0 {
                return Err(Error::Config(format!(
                    "Invalid rate limit {}/{}: both values must be > 0",
                    limit.requests, limit.per_seconds
                )));
            }
        }

        self.device_init_bytes()?;
        Ok(())
    }

    /// Effective HTTP port
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(crate::DEFAULT_PORT)
    }

    /// Socket address to listen on
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Decoded device start command, if any
    pub fn device_init_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.device_init_command
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|cmd| {
                hex::decode(cmd).map_err(|e| {
                    Error::Config(format!("Invalid device_init_command '{}': {}", cmd, e))
                })
            })
            .transpose()
    }

    /// Clamp a requested byte count into `[min_request_bytes, max_request_bytes]`
    ///
    /// Missing or unparseable counts are served as the minimum.
    pub fn clamp_request(&self, requested: Option<i64>) -> usize {
        let min = self.min_request_bytes as i64;
        let max = self.max_request_bytes as i64;
        requested.unwrap_or(min).clamp(min, max) as usize
    }
}

// Default value functions
fn default_min_request_bytes() -> usize {
    crate::DEFAULT_MIN_REQUEST_BYTES
}

fn default_max_request_bytes() -> usize {
    crate::DEFAULT_MAX_REQUEST_BYTES
}

fn default_buffer_size() -> usize {
    crate::DEFAULT_BUFFER_SIZE
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/hwrng")
}

fn default_chunk_size() -> usize {
    crate::DEFAULT_CHUNK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config() -> ServerConfig {
        ServerConfig {
            server: "rng.example.net".to_string(),
            protocol_versions: vec!["1".to_string()],
            source: "TrueRNG".to_string(),
            bits_of_entropy: 8,
            min_request_bytes: 64,
            max_request_bytes: 4096,
            rate_limits: vec![],
            buffer_size: 10240,
            port: Some(8080),
            bind_address: "127.0.0.1".to_string(),
            request_timeout_ms: 1000,
            device_path: PathBuf::from("/dev/hwrng"),
            device_init_command: None,
            read_chunk_size: 1024,
            simulate: false,
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_validation() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_max_request_must_fit_buffer() {
        let config = ServerConfig {
            buffer_size: 1024,
            ..sample_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = ServerConfig {
            min_request_bytes: 8192,
            ..sample_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_identity_rejected() {
        let config = ServerConfig {
            server: "  ".to_string(),
            ..sample_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let config = ServerConfig {
            rate_limits: vec![RateLimit { requests: 0, per_seconds: 60 }],
            ..sample_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_init_command() {
        let config = ServerConfig {
            device_init_command: Some("e096".to_string()),
            ..sample_config()
        };
        assert_eq!(config.device_init_bytes().unwrap(), Some(vec![0xe0, 0x96]));

        let config = ServerConfig {
            device_init_command: Some("zz".to_string()),
            ..sample_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamp_request() {
        let config = sample_config();
        assert_eq!(config.clamp_request(Some(10)), 64);
        assert_eq!(config.clamp_request(Some(-5)), 64);
        assert_eq!(config.clamp_request(Some(100)), 100);
        assert_eq!(config.clamp_request(Some(1 << 40)), 4096);
        assert_eq!(config.clamp_request(None), 64);
    }

    #[test]
    fn test_rate_limit_parse() {
        let limit: RateLimit = "100/60".parse().unwrap();
        assert_eq!(limit, RateLimit { requests: 100, per_seconds: 60 });
        assert!("100".parse::<RateLimit>().is_err());
        assert!("x/60".parse::<RateLimit>().is_err());
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = ServerConfig::from_vars(vars(&[
            ("ENTROPY_SERVER", "rng.example.net"),
            ("ENTROPY_PROTOCOL_VERSIONS", "1,2"),
            ("ENTROPY_SOURCE", "TrueRNG"),
            ("ENTROPY_BITS_OF_ENTROPY", "8"),
            ("ENTROPY_RATE_LIMITS", "10/1, 1000/3600"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        assert_eq!(config.protocol_versions, vec!["1", "2"]);
        assert_eq!(config.min_request_bytes, 64);
        assert_eq!(config.max_request_bytes, 4096);
        assert_eq!(config.buffer_size, 64 * 1024 * 1024);
        assert_eq!(config.rate_limits.len(), 2);
        assert_eq!(config.rate_limits[1].per_seconds, 3600);
        assert!(!config.simulate);
    }

    #[test]
    fn test_from_vars_missing_required() {
        let result = ServerConfig::from_vars(vars(&[
            ("ENTROPY_SERVER", "rng.example.net"),
            ("ENTROPY_SOURCE", "TrueRNG"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_json_file_with_compact_keys() {
        let path = std::env::temp_dir().join(format!(
            "entropyserver-test-{}.json",
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{
                "server": "rng.example.net",
                "protocolversions": ["1"],
                "source": "TrueRNG",
                "bitsofentropy": 8,
                "maxrequestbytes": 1024,
                "buffersize": 65536,
                "ratelimits": [{{ "requests": 5, "per_seconds": 1 }}],
                "port": 9000
            }}"#
        )
        .unwrap();

        let config = ServerConfig::from_file(&path);
        std::fs::remove_file(&path).ok();
        let config = config.unwrap();

        assert_eq!(config.max_request_bytes, 1024);
        assert_eq!(config.buffer_size, 65536);
        assert_eq!(config.port(), 9000);
        assert_eq!(config.rate_limits, vec![RateLimit { requests: 5, per_seconds: 1 }]);
    }

    #[test]
    fn test_from_missing_file() {
        let result = ServerConfig::from_file("/nonexistent/entropyserver.json");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
