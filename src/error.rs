use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("oracle {expected} not found within {probes} parameters")]
    OracleNotFound { expected: String, probes: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("out of bounds: {0}")]
    Bounds(String),

    #[error("invalid pointer: {0}")]
    Pointer(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap a channel error with the operation it interrupted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
