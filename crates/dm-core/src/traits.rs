use anyhow::Result;

use crate::dataset::DatasetMeta;

/// Random-access reader of multichannel samples.
///
/// Implemented by `DatSource` and `ContinuousSource`.
///
/// # Example
/// ```
/// use dm_core::traits::SampleSource;
/// use dm_core::dataset::{DatasetFormat, DatasetMeta};
///
/// struct Silence(DatasetMeta);
/// impl SampleSource for Silence {
///     fn meta(&self) -> &DatasetMeta { &self.0 }
///     fn read_window(&mut self, _start: u64, _len: usize, out: &mut [f32]) -> anyhow::Result<()> {
///         out.fill(0.0);
///         Ok(())
///     }
/// }
/// ```
pub trait SampleSource: Send + 'static {
    /// Recording description.
    fn meta(&self) -> &DatasetMeta;

    /// Fill `out` with `len` samples per channel starting at `start`, channel-major,
    /// in microvolts.
    ///
    /// `out.len()` must be `n_channels * len`. Samples past the end of the
    /// recording are written as zero.
    ///
    /// # Errors
    /// Returns an error on I/O failure or corrupt data.
    fn read_window(&mut self, start: u64, len: usize, out: &mut [f32]) -> Result<()>;
}
