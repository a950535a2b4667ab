use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to bind (default: 0.0.0.0).
    pub host: String,
    /// TCP port to listen on (default: 8000).
    pub port: u16,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Append-only log file (default: app.log).
    pub log_file: PathBuf,
    /// stderr log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Capacity of the engine request channel.
    pub queue_depth: usize,
    /// Optional cap on request body size; unset means no limit.
    pub max_body_bytes: Option<usize>,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            model_dir: facematch_core::default_model_dir(),
            log_file: PathBuf::from("app.log"),
            log_level: "info".to_string(),
            queue_depth: 16,
            max_body_bytes: None,
            intra_threads: 2,
        }
    }
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("FACEMATCH_HOST").unwrap_or(defaults.host),
            port: env_or("FACEMATCH_PORT", defaults.port),
            model_dir: defaults.model_dir,
            log_file: std::env::var("FACEMATCH_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_file),
            log_level: std::env::var("FACEMATCH_LOG_LEVEL").unwrap_or(defaults.log_level),
            queue_depth: env_or("FACEMATCH_QUEUE_DEPTH", defaults.queue_depth).max(1),
            max_body_bytes: parse_opt(std::env::var("FACEMATCH_MAX_BODY_BYTES").ok()),
            intra_threads: env_or("FACEMATCH_INTRA_THREADS", defaults.intra_threads).max(1),
        }
    }

    /// Address to bind the HTTP listener to.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    parse_opt(std::env::var(key).ok()).unwrap_or(default)
}

fn parse_opt<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.log_file, PathBuf::from("app.log"));
        assert_eq!(cfg.queue_depth, 16);
        assert!(cfg.max_body_bytes.is_none());
    }

    #[test]
    fn test_socket_addr() {
        let addr = Config::default().socket_addr().unwrap();
        assert_eq!(addr.port(), 8000);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn test_socket_addr_rejects_bad_host() {
        let cfg = Config { host: "not a host".into(), ..Config::default() };
        assert!(cfg.socket_addr().is_err());
    }

    #[test]
    fn test_parse_opt() {
        assert_eq!(parse_opt::<u16>(Some(" 9000 ".into())), Some(9000));
        assert_eq!(parse_opt::<u16>(Some("ninety".into())), None);
        assert_eq!(parse_opt::<usize>(None), None);
    }
}
