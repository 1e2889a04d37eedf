use thiserror::Error;

/// Error type shared across the proxy components.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no backends configured")]
    EmptyCatalog,

    #[error("no backends available")]
    NoBackends,

    #[error("TLS termination is not implemented; run chainproxy behind a TLS-terminating frontend")]
    TlsUnsupported,

    #[error("invalid hex quantity: {0}")]
    InvalidHex(String),

    #[error("unexpected RPC response: {0}")]
    UnexpectedResponse(&'static str),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
