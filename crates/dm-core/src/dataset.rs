use std::path::PathBuf;

/// On-disk layout of a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetFormat {
    /// Open Ephys, one `.continuous` file per channel.
    OpenEphys,
    /// Raw interleaved little-endian `i16`.
    Dat,
    /// Kwik/HDF5 (recognised only).
    Kwik,
}

impl DatasetFormat {
    /// Short label for tables and status lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            DatasetFormat::OpenEphys => "OpenEphys",
            DatasetFormat::Dat => "dat",
            DatasetFormat::Kwik => "kwik",
        }
    }
}

/// What is known about a recording before reading its samples.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetMeta {
    /// Layout on disk.
    pub format: DatasetFormat,
    /// Target the metadata was derived from.
    pub path: PathBuf,
    /// Data files, in channel order for per-channel formats.
    pub files: Vec<PathBuf>,
    /// Number of channels.
    pub n_channels: usize,
    /// Sampling rate in Hz.
    pub sample_rate: f64,
    /// Samples per channel.
    pub n_samples: u64,
    /// Microvolts per ADC bit.
    pub bit_volts: f64,
}

impl DatasetMeta {
    /// Recording length in seconds (0 for an unknown sample rate).
    ///
    /// # Example
    /// ```
    /// use dm_core::dataset::{DatasetFormat, DatasetMeta};
    /// let meta = DatasetMeta {
    ///     format: DatasetFormat::Dat,
    ///     path: "rec.dat".into(),
    ///     files: vec![],
    ///     n_channels: 4,
    ///     sample_rate: 30_000.0,
    ///     n_samples: 90_000,
    ///     bit_volts: 0.195,
    /// };
    /// assert!((meta.duration_secs() - 3.0).abs() < 1e-9);
    /// ```
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.n_samples as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

/// `mm:ss` rendering of a duration, minutes not wrapped at the hour.
#[must_use]
pub fn format_duration(secs: f64) -> String {
    let secs = secs.max(0.0);
    let minutes = (secs / 60.0).floor();
    let seconds = (secs % 60.0).floor();
    format!("{minutes:02.0}min:{seconds:02.0}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0.0), "00min:00s");
        assert_eq!(format_duration(61.9), "01min:01s");
        assert_eq!(format_duration(3725.0), "62min:05s");
    }
}
