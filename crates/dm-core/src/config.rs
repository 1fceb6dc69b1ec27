use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the per-dataset sidecar file holding recording parameters.
pub const DATASET_SIDECAR: &str = "dataset.toml";

/// Complete dataman configuration.
///
/// Serializable as TOML. Every field has a sane default.
///
/// # Example
/// ```
/// use dm_core::config::DmConfig;
/// let config = DmConfig::default();
/// assert_eq!(config.dataset.n_channels, 64);
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DmConfig {
    /// Recording parameters used when a dataset does not describe itself.
    pub dataset: DatasetConfig,
    /// Viewer settings, hot-reloadable.
    pub vis: VisConfig,
    /// Referencing settings.
    pub reference: ReferenceConfig,
}

/// Recording parameters of raw datasets.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DatasetConfig {
    /// Interleaved channels in a `.dat` file.
    pub n_channels: usize,
    /// Sampling rate in Hz.
    pub sample_rate: f64,
    /// Microvolts per ADC bit.
    pub bit_volts: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            n_channels: 64,
            sample_rate: 30_000.0,
            bit_volts: 0.195,
        }
    }
}

/// Viewer layout and behaviour.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct VisConfig {
    /// Plot rows per column.
    pub n_rows: usize,
    /// Plot columns.
    pub n_cols: usize,
    /// Samples held by the display buffer (one screen at scale 1).
    pub window_samples: usize,
    /// Redraw rate.
    pub target_fps: u32,
    /// Half the vertical extent of a channel cell, in microvolts, at scale 1.
    pub full_scale_uv: f32,
    /// Show the parameter sidebar.
    pub show_sidebar: bool,
}

impl Default for VisConfig {
    fn default() -> Self {
        Self {
            n_rows: 16,
            n_cols: 4,
            window_samples: 30_000,
            target_fps: 30,
            full_scale_uv: 500.0,
            show_sidebar: true,
        }
    }
}

impl VisConfig {
    /// Channels shown at once.
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.n_rows * self.n_cols
    }
}

/// Floating point precision of reference files.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Precision {
    /// `f32` samples.
    #[default]
    Single,
    /// `f64` samples.
    Double,
}

impl Precision {
    /// Size of one stored value.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

/// Referencing behaviour.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReferenceConfig {
    /// Precision of the reference file.
    pub precision: Precision,
    /// Upper bound on the bytes of `.dat` data held per batch.
    pub batch_bytes: usize,
    /// Keep intermediate reference files.
    pub keep: bool,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Single,
            batch_bytes: 32 * 1024 * 1024,
            keep: false,
        }
    }
}

/// Upper bound on the channel count of a dataset.
pub const MAX_CHANNELS: usize = 4096;

impl DatasetConfig {
    /// Bring the channel count into `1..=MAX_CHANNELS` and replace
    /// non-positive or non-finite rates with the defaults.
    ///
    /// Returns whether any field changed.
    pub fn clamp(&mut self) -> bool {
        let before = self.clone();
        self.n_channels = self.n_channels.clamp(1, MAX_CHANNELS);
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            self.sample_rate = DatasetConfig::default().sample_rate;
        }
        if !self.bit_volts.is_finite() || self.bit_volts <= 0.0 {
            self.bit_volts = DatasetConfig::default().bit_volts;
        }
        *self != before
    }
}

impl DmConfig {
    /// Clamp all numeric fields to their valid ranges.
    /// Called after TOML deserialization to prevent out-of-range values.
    pub fn clamp_all(&mut self) {
        self.dataset.clamp();
        self.vis.n_rows = self.vis.n_rows.clamp(1, 64);
        self.vis.n_cols = self.vis.n_cols.clamp(1, 16);
        self.vis.window_samples = self.vis.window_samples.clamp(64, 10_000_000);
        self.vis.target_fps = self.vis.target_fps.clamp(1, 120);
        self.vis.full_scale_uv = self.vis.full_scale_uv.clamp(1.0, 100_000.0);
        self.reference.batch_bytes = self.reference.batch_bytes.max(4096);
    }
}

/// Intermediate TOML structure, all sections optional.
#[derive(Deserialize)]
struct ConfigFile {
    dataset: Option<DatasetSection>,
    vis: Option<VisSection>,
    reference: Option<ReferenceSection>,
}

/// Dataset section, all fields optional for partial override.
#[derive(Deserialize, Default)]
pub struct DatasetSection {
    n_channels: Option<usize>,
    sample_rate: Option<f64>,
    bit_volts: Option<f64>,
}

#[derive(Deserialize)]
struct VisSection {
    n_rows: Option<usize>,
    n_cols: Option<usize>,
    window_samples: Option<usize>,
    target_fps: Option<u32>,
    full_scale_uv: Option<f32>,
    show_sidebar: Option<bool>,
}

#[derive(Deserialize)]
struct ReferenceSection {
    precision: Option<Precision>,
    batch_bytes: Option<usize>,
    keep: Option<bool>,
}

impl DatasetSection {
    /// Apply the present fields over `base`.
    pub fn apply(&self, base: &mut DatasetConfig) {
        if let Some(v) = self.n_channels {
            base.n_channels = v;
        }
        if let Some(v) = self.sample_rate {
            base.sample_rate = v;
        }
        if let Some(v) = self.bit_volts {
            base.bit_volts = v;
        }
    }
}

/// Parse TOML text and merge it over the defaults.
///
/// # Errors
/// Returns an error if the text is not valid TOML for this schema.
pub fn parse_config(content: &str) -> Result<DmConfig> {
    let file: ConfigFile = toml::from_str(content).context("TOML parse error")?;
    let mut config = DmConfig::default();

    if let Some(d) = file.dataset {
        d.apply(&mut config.dataset);
    }

    if let Some(v) = file.vis {
        if let Some(x) = v.n_rows {
            config.vis.n_rows = x;
        }
        if let Some(x) = v.n_cols {
            config.vis.n_cols = x;
        }
        if let Some(x) = v.window_samples {
            config.vis.window_samples = x;
        }
        if let Some(x) = v.target_fps {
            config.vis.target_fps = x;
        }
        if let Some(x) = v.full_scale_uv {
            config.vis.full_scale_uv = x;
        }
        if let Some(x) = v.show_sidebar {
            config.vis.show_sidebar = x;
        }
    }

    if let Some(r) = file.reference {
        if let Some(x) = r.precision {
            config.reference.precision = x;
        }
        if let Some(x) = r.batch_bytes {
            config.reference.batch_bytes = x;
        }
        if let Some(x) = r.keep {
            config.reference.keep = x;
        }
    }

    config.clamp_all();
    Ok(config)
}

/// Load a TOML file and merge it with the defaults.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
/// ```no_run
/// use dm_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("dataman.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<DmConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("in {}", path.display()))
}

/// Read the `dataset.toml` sidecar of a recording directory, if any.
///
/// Only the `[dataset]` table is considered.
///
/// # Errors
/// Returns an error if a sidecar exists but cannot be read or parsed.
pub fn load_dataset_sidecar(dir: &Path) -> Result<Option<DatasetSection>> {
    #[derive(Deserialize)]
    struct Sidecar {
        dataset: Option<DatasetSection>,
    }

    let path = dir.join(DATASET_SIDECAR);
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let sidecar: Sidecar = toml::from_str(&content)
        .with_context(|| format!("TOML parse error in {}", path.display()))?;
    log::debug!("dataset sidecar found at {}", path.display());
    Ok(Some(sidecar.dataset.unwrap_or_default()))
}
