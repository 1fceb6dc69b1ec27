use std::path::PathBuf;

use thiserror::Error;

/// Errors originating from the format readers.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Referenced path does not exist.
    #[error("not found: {}", path.display())]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// No recording could be recognised at the path.
    #[error("unsupported target: {}", path.display())]
    Unsupported {
        /// Offending path.
        path: PathBuf,
    },

    /// Several candidate files, none chosen.
    #[error("{} holds several .dat files, name one explicitly", dir.display())]
    Ambiguous {
        /// Directory searched.
        dir: PathBuf,
    },

    /// Format is recognised but cannot be read.
    #[error("{format} datasets cannot be read")]
    Unreadable {
        /// Format label.
        format: &'static str,
    },

    /// Header lacks a mandatory field.
    #[error("{}: header has no '{field}'", path.display())]
    MissingHeaderField {
        /// File.
        path: PathBuf,
        /// Field name.
        field: &'static str,
    },

    /// Record does not end with the expected marker.
    #[error("record {record}: bad record marker")]
    BadMarker {
        /// Record index.
        record: u64,
    },

    /// Record claims more samples than a block holds.
    #[error("record {record}: {n_samples} samples in a block")]
    BadBlockLength {
        /// Record index.
        record: u64,
        /// Declared count.
        n_samples: u16,
    },

    /// File ends in the middle of a record.
    #[error("record {record}: truncated")]
    Truncated {
        /// Record index.
        record: u64,
    },

    /// Channel files disagree on the sampling rate.
    #[error("{}: sample rate {found} Hz, expected {expected} Hz", path.display())]
    MismatchedSampleRates {
        /// File.
        path: PathBuf,
        /// Rate of the first channel.
        expected: f64,
        /// Rate of this file.
        found: f64,
    },

    /// File size is not a whole number of rows.
    #[error("{}: {len} bytes is not a multiple of {row_bytes}-byte rows", path.display())]
    Misaligned {
        /// File.
        path: PathBuf,
        /// File size.
        len: u64,
        /// Bytes per row.
        row_bytes: u64,
    },

    /// The streamer thread is not running.
    #[error("streamer already stopped")]
    StreamerStopped,
}
