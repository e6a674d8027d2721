use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed CLI option, bad path, bad bootsector, disallowed filename.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The FAT ran out of free cells, a write landed past the declared image
    /// size, or short-name collisions exhausted the numeric tail space.
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Broken internal invariant.
    #[error("logic error: {0}")]
    Logic(String),
}

pub type Result<T> = std::result::Result<T, Error>;
