use std::path::PathBuf;

use dm_formats::FormatError;
use thiserror::Error;

/// Errors raised while creating or applying a reference.
#[derive(Error, Debug)]
pub enum RefError {
    /// Reading the `.dat` file failed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Reading or writing a reference or output file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Both good and bad channel lists were given.
    #[error("good and bad channel lists are mutually exclusive")]
    ExclusiveSelection,

    /// A channel index does not exist in the recording.
    #[error("channel {index} out of range for {n_channels} channels")]
    ChannelOutOfRange {
        /// Offending index.
        index: usize,
        /// Channels in the recording.
        n_channels: usize,
    },

    /// Every channel was excluded from the mean.
    #[error("no channels left to build a reference from")]
    NoChannels,

    /// Reference and data differ in length.
    #[error("data has {dat_rows} samples, reference has {ref_rows}")]
    RowMismatch {
        /// Samples in the `.dat` file.
        dat_rows: u64,
        /// Values in the reference file.
        ref_rows: u64,
    },

    /// Reference file size is not a whole number of values.
    #[error("{}: {len} bytes is not a multiple of {value_bytes}", path.display())]
    MisalignedReference {
        /// Reference file.
        path: PathBuf,
        /// File size.
        len: u64,
        /// Bytes per value.
        value_bytes: usize,
    },
}
