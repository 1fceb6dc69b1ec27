//! Shared foundations of dataman: configuration, recording metadata,
//! the channel-major sample buffer, row batching and probe files.

pub mod batch;
pub mod buffer;
pub mod config;
pub mod dataset;
pub mod error;
pub mod probe;
pub mod traits;

pub use buffer::SampleBuffer;
pub use config::DmConfig;
pub use dataset::{DatasetFormat, DatasetMeta};
pub use error::CoreError;
pub use traits::SampleSource;
