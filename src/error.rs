#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Not enough bytes to decode a fixed-size structure.
    #[error("not enough bytes; got {actual}, need at least {minimum}")]
    Truncated { actual: usize, minimum: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Decoder configuration that cannot produce a valid stream.
    #[error("invalid decoder config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
