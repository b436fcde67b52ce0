use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("Payload not found at {0}")]
    PayloadMissing(String),

    #[error("Payload path cannot be passed to the target loader: {0}")]
    PayloadEncoding(String),

    #[error("Failed to create control channel: {0}")]
    ChannelCreate(String),

    #[error("Control channel failure: {0}")]
    Channel(String),

    #[error("Key {0:#04x} is already bound")]
    DuplicateKey(u16),

    #[error("Keybind registry is full")]
    RegistryFull,

    #[error("No binding with that id")]
    BindingNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
