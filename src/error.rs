use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DnsError {
    #[error("packet too short: need {need} bytes, have {have} bytes")]
    TooShort { need: usize, have: usize },

    #[error("malformed label at offset {0}")]
    MalformedLabel(usize),

    #[error("IO error: {0}")]
    Io(String),

    #[error("upstream query timed out")]
    Timeout,
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        DnsError::Io(err.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid upstream server: {0}")]
    InvalidUpstreamServer(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid cache size: {0}")]
    InvalidCacheSize(String),

    #[error("Invalid blocking mode: {0}")]
    InvalidBlockingMode(String),

    #[error("Invalid worker threads: {0}")]
    InvalidWorkerThreads(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, DnsError>;
