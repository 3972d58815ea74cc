use std::fmt;

/// Failure taxonomy shared by every codec.
///
/// Each variant carries a human-readable message; decode and encode paths
/// bubble these up unchanged so the caller sees the first point of failure.
#[derive(Debug)]
pub enum Error {
    /// Null or zero-length buffer handed to a reader.
    EmptyInput,
    /// The leading bytes do not match the format signature.
    BadMagic(String),
    /// The header declares an encoding this library does not handle.
    BadFormat(String),
    /// Declared sizes exceed what the buffer actually holds.
    Truncated(String),
    /// IR array lengths disagree with `num_points`.
    SizeMismatch(String),
    /// Strict-mode finiteness sweep found a NaN or infinity.
    NonFinite(String),
    /// Version or compression mode outside the supported set.
    UnsupportedVariant(String),
    /// On write, the IR shapes disagree with `num_points`.
    InconsistentCounts(String),
    /// Any format-specific decode or encode failure.
    CodecInternal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyInput => {
                write!(f, "empty input buffer")
            }
            Error::BadMagic(e) => {
                write!(f, "bad magic: {}", e)
            }
            Error::BadFormat(e) => {
                write!(f, "unsupported format: {}", e)
            }
            Error::Truncated(e) => {
                write!(f, "truncated input: {}", e)
            }
            Error::SizeMismatch(e) => {
                write!(f, "size mismatch: {}", e)
            }
            Error::NonFinite(e) => {
                write!(f, "non-finite value: {}", e)
            }
            Error::UnsupportedVariant(e) => {
                write!(f, "unsupported variant: {}", e)
            }
            Error::InconsistentCounts(e) => {
                write!(f, "inconsistent counts: {}", e)
            }
            Error::CodecInternal(e) => {
                write!(f, "codec error: {}", e)
            }
        }
    }
}

impl std::error::Error for Error {}
