use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dm_core::config::{DatasetConfig, load_dataset_sidecar};
use dm_core::dataset::{DatasetFormat, DatasetMeta, format_duration};
use dm_core::traits::SampleSource;

use crate::continuous::{self, BLOCK_SAMPLES, ContinuousSource};
use crate::dat::{self, DatSource};
use crate::error::FormatError;

/// A recognised recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// Directory of `.continuous` files.
    Continuous(PathBuf),
    /// A single `.dat` file.
    Dat(PathBuf),
    /// Directory holding `.kwik`/`.kwd` files.
    Kwik(PathBuf),
}

fn has_ext(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Files of `dir` with one of `exts`, sorted.
fn files_with_ext(dir: &Path, exts: &[&str]) -> Result<Vec<PathBuf>, FormatError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_ext(p, exts))
        .collect();
    files.sort();
    Ok(files)
}

/// Recognise the recording at `path`.
///
/// # Errors
/// `NotFound`, `Ambiguous` (several `.dat` files in a directory) or `Unsupported`.
pub fn detect(path: &Path) -> Result<TargetKind, FormatError> {
    if !path.exists() {
        return Err(FormatError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let parent = || {
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf()
    };

    if path.is_file() {
        return if has_ext(path, &["dat"]) {
            Ok(TargetKind::Dat(path.to_path_buf()))
        } else if has_ext(path, &["continuous"]) {
            Ok(TargetKind::Continuous(parent()))
        } else if has_ext(path, &["kwik", "kwd"]) {
            Ok(TargetKind::Kwik(parent()))
        } else {
            Err(FormatError::Unsupported {
                path: path.to_path_buf(),
            })
        };
    }

    if !files_with_ext(path, &["continuous"])?.is_empty() {
        return Ok(TargetKind::Continuous(path.to_path_buf()));
    }
    let dats = files_with_ext(path, &["dat"])?;
    match dats.len() {
        0 => {}
        1 => return Ok(TargetKind::Dat(dats[0].clone())),
        _ => {
            return Err(FormatError::Ambiguous {
                dir: path.to_path_buf(),
            });
        }
    }
    if !files_with_ext(path, &["kwik", "kwd"])?.is_empty() {
        return Ok(TargetKind::Kwik(path.to_path_buf()));
    }
    Err(FormatError::Unsupported {
        path: path.to_path_buf(),
    })
}

/// Recording parameters of a `.dat` file: `defaults`, then the `dataset.toml`
/// sidecar next to the file, then `n_channels_override`, clamped like the
/// config file.
///
/// # Errors
/// Returns an error if the sidecar exists but is invalid.
pub fn dat_parameters(
    file: &Path,
    n_channels_override: Option<usize>,
    defaults: &DatasetConfig,
) -> Result<DatasetConfig> {
    let mut params = defaults.clone();
    if let Some(dir) = file.parent()
        && let Some(section) = load_dataset_sidecar(dir)?
    {
        section.apply(&mut params);
    }
    if let Some(n) = n_channels_override {
        params.n_channels = n;
    }
    if params.n_channels == 0 {
        anyhow::bail!("channel count must be positive");
    }
    if params.clamp() {
        log::warn!(
            "recording parameters for {} out of range, using {} channels at {} Hz, {} uV/bit",
            file.display(),
            params.n_channels,
            params.sample_rate,
            params.bit_volts
        );
    }
    Ok(params)
}

/// Metadata of the recording at `path`.
///
/// # Errors
/// Detection failures, unreadable headers, or invalid parameters.
pub fn metadata_from_target(
    path: &Path,
    n_channels_override: Option<usize>,
    defaults: &DatasetConfig,
) -> Result<DatasetMeta> {
    match detect(path)? {
        TargetKind::Continuous(dir) => {
            let meta = continuous::scan(&dir)
                .with_context(|| format!("reading Open Ephys headers in {}", dir.display()))?;
            if let Some(n) = n_channels_override
                && n != meta.n_channels
            {
                log::warn!(
                    "{} channel files found, ignoring channel count {n}",
                    meta.n_channels
                );
            }
            Ok(meta)
        }
        TargetKind::Dat(file) => {
            let params = dat_parameters(&file, n_channels_override, defaults)?;
            let n_samples = dat::row_count(&file, params.n_channels)?;
            Ok(DatasetMeta {
                format: DatasetFormat::Dat,
                path: file.clone(),
                files: vec![file],
                n_channels: params.n_channels,
                sample_rate: params.sample_rate,
                n_samples,
                bit_volts: params.bit_volts,
            })
        }
        TargetKind::Kwik(dir) => Ok(DatasetMeta {
            format: DatasetFormat::Kwik,
            files: files_with_ext(&dir, &["kwik", "kwd"])?,
            path: dir,
            n_channels: 0,
            sample_rate: 0.0,
            n_samples: 0,
            bit_volts: defaults.bit_volts,
        }),
    }
}

/// Open a reader for the recording described by `meta`.
///
/// # Errors
/// `Unreadable` for Kwik datasets, I/O errors otherwise.
pub fn open_source(meta: DatasetMeta) -> Result<Box<dyn SampleSource>, FormatError> {
    match meta.format {
        DatasetFormat::OpenEphys => Ok(Box::new(ContinuousSource::from_meta(meta)?)),
        DatasetFormat::Dat => Ok(Box::new(DatSource::from_meta(meta)?)),
        DatasetFormat::Kwik => Err(FormatError::Unreadable {
            format: DatasetFormat::Kwik.label(),
        }),
    }
}

/// One-line summary: rate, blocks, samples and duration.
///
/// # Example
/// ```
/// use dm_core::dataset::{DatasetFormat, DatasetMeta};
/// use dm_formats::target::describe;
/// let meta = DatasetMeta {
///     format: DatasetFormat::OpenEphys,
///     path: "rec".into(),
///     files: vec![],
///     n_channels: 64,
///     sample_rate: 30_000.0,
///     n_samples: 2048 * 1000,
///     bit_volts: 0.195,
/// };
/// assert_eq!(describe(&meta), "Fs = 30kHz, 2000 blocks, 2048000 samples, 01min:08s");
/// ```
#[must_use]
pub fn describe(meta: &DatasetMeta) -> String {
    let blocks = meta.n_samples / BLOCK_SAMPLES as u64;
    format!(
        "Fs = {}kHz, {blocks} blocks, {} samples, {}",
        meta.sample_rate / 1e3,
        meta.n_samples,
        format_duration(meta.duration_secs())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuous::tests::write_recording;
    use crate::dat::tests::write_dat;

    #[test]
    fn detects_each_layout() {
        let dir = tempfile::tempdir().unwrap();
        let oe = dir.path().join("oe");
        std::fs::create_dir(&oe).unwrap();
        write_recording(&oe, 2, 1);
        assert_eq!(detect(&oe).unwrap(), TargetKind::Continuous(oe.clone()));
        assert_eq!(
            detect(&oe.join("100_CH1.continuous")).unwrap(),
            TargetKind::Continuous(oe.clone())
        );

        let raw = dir.path().join("raw");
        std::fs::create_dir(&raw).unwrap();
        write_dat(&raw.join("a.dat"), 2, 2);
        assert_eq!(detect(&raw).unwrap(), TargetKind::Dat(raw.join("a.dat")));
        write_dat(&raw.join("b.dat"), 2, 2);
        assert!(matches!(detect(&raw), Err(FormatError::Ambiguous { .. })));

        let kwik = dir.path().join("kwik");
        std::fs::create_dir(&kwik).unwrap();
        std::fs::write(kwik.join("x.kwik"), b"").unwrap();
        assert_eq!(detect(&kwik).unwrap(), TargetKind::Kwik(kwik.clone()));

        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        assert!(matches!(detect(&empty), Err(FormatError::Unsupported { .. })));
        assert!(matches!(
            detect(&dir.path().join("missing")),
            Err(FormatError::NotFound { .. })
        ));
    }

    #[test]
    fn dat_parameters_layered() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rec.dat");
        write_dat(&file, 8, 10);
        let defaults = DatasetConfig::default();

        let meta = metadata_from_target(&file, Some(8), &defaults).unwrap();
        assert_eq!(meta.n_channels, 8);
        assert_eq!(meta.n_samples, 10);

        std::fs::write(
            dir.path().join("dataset.toml"),
            "[dataset]\nn_channels = 4\nsample_rate = 20000.0\n",
        )
        .unwrap();
        let meta = metadata_from_target(&file, None, &defaults).unwrap();
        assert_eq!(meta.n_channels, 4);
        assert_eq!(meta.n_samples, 20);
        assert!((meta.sample_rate - 20_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sidecar_values_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rec.dat");
        write_dat(&file, 8, 10);
        std::fs::write(
            dir.path().join("dataset.toml"),
            "[dataset]\nn_channels = 10000000\nsample_rate = -1.0\nbit_volts = 0.0\n",
        )
        .unwrap();

        let params = dat_parameters(&file, None, &DatasetConfig::default()).unwrap();
        assert_eq!(params.n_channels, 4096);
        assert!((params.sample_rate - 30_000.0).abs() < f64::EPSILON);
        assert!((params.bit_volts - 0.195).abs() < f64::EPSILON);

        assert!(dat_parameters(&file, Some(0), &DatasetConfig::default()).is_err());
    }

    #[test]
    fn misaligned_dat_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rec.dat");
        write_dat(&file, 3, 1);
        assert!(metadata_from_target(&file, Some(4), &DatasetConfig::default()).is_err());
    }

    #[test]
    fn kwik_is_recognised_but_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.kwd"), b"").unwrap();
        let meta = metadata_from_target(dir.path(), None, &DatasetConfig::default()).unwrap();
        assert_eq!(meta.format, DatasetFormat::Kwik);
        assert_eq!(meta.files.len(), 1);
        assert!(matches!(
            open_source(meta),
            Err(FormatError::Unreadable { .. })
        ));
    }

    #[test]
    fn open_source_reads_continuous() {
        let dir = tempfile::tempdir().unwrap();
        write_recording(dir.path(), 3, 2);
        let meta = metadata_from_target(dir.path(), None, &DatasetConfig::default()).unwrap();
        let mut src = open_source(meta).unwrap();
        let mut out = vec![0.0; 3 * 2];
        src.read_window(0, 2, &mut out).unwrap();
        assert_eq!(out, vec![0.0, 1.0, 1000.0, 1001.0, 2000.0, 2001.0]);
    }
}
