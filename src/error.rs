use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between "gust send" and the last byte on disk.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Discovery(String),

    #[error("multicast port {0} is already in use (is another receiver still running?)")]
    PortBusy(u16),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unexpected status {status} from {endpoint}")]
    UnexpectedStatus { endpoint: &'static str, status: u16 },

    #[error("{0}")]
    Transfer(String),

    #[error("refusing to write outside the destination directory: {0}")]
    PathTraversal(String),

    #[error("{name} exceeds the {limit} byte size cap")]
    SizeCap { name: String, limit: u64 },

    #[error("{0}")]
    Cancelled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
