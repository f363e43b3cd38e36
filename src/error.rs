use thiserror::Error;

/// Errors surfaced by the replica and its transport.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("message codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("transport channel closed")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, Error>;
