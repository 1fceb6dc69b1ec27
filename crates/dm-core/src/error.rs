use thiserror::Error;

/// Errors originating from the core module.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid configuration value or structure.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Buffer dimensions must be positive.
    #[error("invalid buffer dimensions: {n_channels} channels x {n_samples} samples")]
    InvalidDimensions {
        /// Requested channel count.
        n_channels: usize,
        /// Requested sample count.
        n_samples: usize,
    },

    /// Requested sample range is not held by the buffer.
    #[error("unable to get indices {start}..{end}")]
    Unavailable {
        /// First sample (included).
        start: usize,
        /// Last sample (excluded).
        end: usize,
    },

    /// Written data does not match the buffer's channel layout.
    #[error("writing incompatible data: {len} values for {n_channels} channels")]
    IncompatibleData {
        /// Number of values handed to the buffer.
        len: usize,
        /// Channels of the buffer.
        n_channels: usize,
    },

    /// Unknown buffer data type code.
    #[error("unknown data type code {0}")]
    UnknownDataType(u32),

    /// Probe file could not be evaluated.
    #[error("probe file, line {line}: {message}")]
    Probe {
        /// 1-based line of the offending token.
        line: usize,
        /// What went wrong.
        message: String,
    },
}
