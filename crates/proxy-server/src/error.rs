use std::path::PathBuf;

/// Problems found while loading or validating configuration. Always fatal at
/// startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid upstream url {url:?}: {reason}")]
    Upstream { url: String, reason: String },

    #[error("invalid {field} address {addr:?}: {source}")]
    Addr {
        field: &'static str,
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Failure talking to the upstream server.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to build upstream request: {0}")]
    Request(#[from] http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(std::time::Duration),
}

/// Why a response could not be captured into the cache. The response itself
/// is still relayed.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to read upstream body: {0}")]
    Body(#[from] axum::Error),

    #[error("upstream body exceeds capture limit of {limit} bytes")]
    TooLarge { limit: usize },
}
