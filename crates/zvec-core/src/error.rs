//! Crate-wide error type and result alias.

use thiserror::Error;

/// Errors produced by the engine core.
///
/// Every fallible operation in the crate maps onto one of these variants;
/// callers can match on the variant to distinguish caller mistakes
/// (`InvalidArgument`), corrupt on-disk state (`InvalidFormat`), I/O trouble
/// (`ReadData`, `Io`) and lifecycle misuse (`StatusError`).
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an out-of-domain value (bad scan ratio, unknown
    /// column, negative index).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// On-disk structure fails a size or version invariant.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Short read or an underlying storage read failure.
    #[error("failed to read data: {0}")]
    ReadData(String),

    /// Allocation failure.
    #[error("out of memory: {0}")]
    NoMemory(String),

    /// A named plugin (metric, reformer) is not registered.
    #[error("no such component: {0}")]
    NoExist(String),

    /// The type/metric combination cannot be handled.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// General downstream failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A state-machine guard was violated (e.g. WAL operation on a closed
    /// file).
    #[error("status error: {0}")]
    StatusError(String),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an `InvalidArgument` with a formatted message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Shorthand for an `InvalidFormat` with a formatted message.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Shorthand for a `ReadData` with a formatted message.
    pub fn read_data(msg: impl Into<String>) -> Self {
        Self::ReadData(msg.into())
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_argument("scan_ratio=0");
        assert_eq!(err.to_string(), "invalid argument: scan_ratio=0");

        let err = Error::NoExist("metric Chebyshev".to_string());
        assert_eq!(err.to_string(), "no such component: metric Chebyshev");
    }

    #[test]
    fn test_io_error_converts() {
        fn read() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
            Ok(())
        }
        assert!(matches!(read(), Err(Error::Io(_))));
    }
}
