use crate::error::ConfigError;
use axum::http::uri::Scheme;
use axum::http::{HeaderValue, Uri};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_max_body_size")]
    pub max_body_size_bytes: usize,
}

/// Validated, typed configuration. Built once at startup and handed to the
/// components that need it; never changes afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
    pub request_timeout: Duration,
    pub upstream: Upstream,
    pub upstream_timeout: Duration,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub max_body_size: usize,
}

/// Upstream origin, `http://host[:port]`.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub base_url: String,
    pub authority: HeaderValue,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// Load `path` if it exists, otherwise fall back to defaults. A file that
    /// exists but cannot be read or parsed is an error, not a fallback.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!(path = %path.display(), "loaded config");
            Ok(config)
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Ok(Self::default_config())
        }
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn default_config() -> Self {
        Config {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<Settings, ConfigError> {
        Ok(Settings {
            listen_addr: parse_addr("listen_addr", &self.server.listen_addr)?,
            metrics_addr: parse_addr("metrics_addr", &self.server.metrics_addr)?,
            request_timeout: non_zero_ms("request_timeout_ms", self.server.request_timeout_ms)?,
            upstream: parse_upstream(&self.upstream.url)?,
            upstream_timeout: non_zero_ms("upstream timeout_ms", self.upstream.timeout_ms)?,
            ttl: non_zero_secs("ttl_seconds", self.cache.ttl_seconds)?,
            sweep_interval: non_zero_secs(
                "sweep_interval_seconds",
                self.cache.sweep_interval_seconds,
            )?,
            max_body_size: match self.cache.max_body_size_bytes {
                0 => {
                    return Err(ConfigError::Zero {
                        field: "max_body_size_bytes",
                    })
                }
                n => n,
            },
        })
    }
}

fn parse_addr(field: &'static str, addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse().map_err(|source| ConfigError::Addr {
        field,
        addr: addr.to_string(),
        source,
    })
}

fn non_zero_secs(field: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Zero { field });
    }
    Ok(Duration::from_secs(secs))
}

fn non_zero_ms(field: &'static str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::Zero { field });
    }
    Ok(Duration::from_millis(ms))
}

fn parse_upstream(url: &str) -> Result<Upstream, ConfigError> {
    let invalid = |reason: &str| ConfigError::Upstream {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = url.parse().map_err(|e: axum::http::uri::InvalidUri| invalid(&e.to_string()))?;

    match uri.scheme() {
        Some(scheme) if *scheme == Scheme::HTTP => {}
        Some(_) => return Err(invalid("only http upstreams are supported")),
        None => return Err(invalid("missing scheme")),
    }

    let authority = uri
        .authority()
        .ok_or_else(|| invalid("missing host"))?
        .clone();

    if let Some(pq) = uri.path_and_query() {
        if pq.as_str() != "/" && !pq.as_str().is_empty() {
            return Err(invalid("must not contain a path or query"));
        }
    }

    let host = HeaderValue::from_str(authority.as_str()).map_err(|e| invalid(&e.to_string()))?;

    Ok(Upstream {
        base_url: format!("http://{authority}"),
        authority: host,
    })
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            max_body_size_bytes: default_max_body_size(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_ttl() -> u64 {
    3 * 3600
}
fn default_sweep_interval() -> u64 {
    3600
}
fn default_max_body_size() -> usize {
    8 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<Config, ConfigError> {
        Config::parse(contents, Path::new("test.toml"))
    }

    #[test]
    fn empty_file_uses_defaults() {
        let settings = parse("").unwrap().validate().unwrap();

        assert_eq!(settings.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(settings.metrics_addr, "0.0.0.0:9090".parse().unwrap());
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.upstream.base_url, "http://127.0.0.1:3000");
        assert_eq!(settings.upstream.authority, "127.0.0.1:3000");
        assert_eq!(settings.ttl, Duration::from_secs(3 * 3600));
        assert_eq!(settings.sweep_interval, Duration::from_secs(3600));
        assert_eq!(settings.max_body_size, 8 * 1024 * 1024);
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse(
            r#"
            [server]
            listen_addr = "127.0.0.1:18080"

            [upstream]
            url = "http://origin.internal:8000/"
            timeout_ms = 250

            [cache]
            ttl_seconds = 3600
            sweep_interval_seconds = 600
            "#,
        )
        .unwrap();
        let settings = config.validate().unwrap();

        assert_eq!(settings.listen_addr, "127.0.0.1:18080".parse().unwrap());
        assert_eq!(settings.upstream.base_url, "http://origin.internal:8000");
        assert_eq!(settings.upstream.authority, "origin.internal:8000");
        assert_eq!(settings.upstream_timeout, Duration::from_millis(250));
        assert_eq!(settings.ttl, Duration::from_secs(3600));
        assert_eq!(settings.sweep_interval, Duration::from_secs(600));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let err = parse("[cache\nttl_seconds = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let err = parse("[cache]\nttl_seconds = \"three hours\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn rejects_unusable_upstreams() {
        for url in [
            "not a url",
            "dummyjson.com",
            "https://dummyjson.com",
            "http://dummyjson.com/api",
            "http://dummyjson.com/?q=1",
            "/relative",
        ] {
            let mut config = Config::default_config();
            config.upstream.url = url.to_string();
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::Upstream { .. }),
                "expected upstream error for {url:?}, got {err}"
            );
        }
    }

    #[test]
    fn rejects_zero_durations() {
        let mut config = Config::default_config();
        config.cache.ttl_seconds = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Zero {
                field: "ttl_seconds"
            }
        ));

        let mut config = Config::default_config();
        config.cache.sweep_interval_seconds = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Zero {
                field: "sweep_interval_seconds"
            }
        ));

        let mut config = Config::default_config();
        config.cache.max_body_size_bytes = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Zero { .. }
        ));
    }

    #[test]
    fn rejects_bad_listen_addr() {
        let mut config = Config::default_config();
        config.server.listen_addr = ":8080".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Addr {
                field: "listen_addr",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("stash-config-does-not-exist.toml");
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.upstream.url, "http://127.0.0.1:3000");
    }

    #[test]
    fn unreadable_path_is_an_error() {
        // A directory exists but cannot be read as a file
        let err = Config::load_or_default(&std::env::temp_dir()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
