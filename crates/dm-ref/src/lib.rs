//! Common average referencing of `.dat` recordings.
//!
//! A reference file holds, for every sample, the mean over the good
//! channels. Subtracting it from every channel removes signal shared by the
//! whole probe.

pub mod error;
pub mod make;
pub mod options;
pub mod progress;
pub mod subtract;

use std::path::{Path, PathBuf};

pub use error::RefError;
pub use make::make_reference;
pub use options::RefOptions;
pub use subtract::subtract_reference;

/// Files produced by [`reference`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefOutcome {
    /// Referenced data (the input itself when in place).
    pub output: PathBuf,
    /// Reference file still on disk afterwards, if any.
    pub reference: Option<PathBuf>,
}

/// Build a reference for `dat` (unless `existing` is given) and subtract it.
///
/// A reference created here is deleted afterwards unless `opts.keep`; an
/// `existing` reference is never touched.
///
/// # Errors
/// Any failure of [`make_reference`] or [`subtract_reference`].
pub fn reference(dat: &Path, existing: Option<&Path>, opts: &RefOptions) -> Result<RefOutcome, RefError> {
    let (ref_path, created) = match existing {
        Some(p) => (p.to_path_buf(), false),
        None => {
            log::info!("creating reference for {}", dat.display());
            let p = make_reference(dat, opts)?;
            log::debug!("reference file at {}", p.display());
            (p, true)
        }
    };

    log::info!("subtracting reference");
    let subtracted = subtract_reference(dat, &ref_path, opts);

    let reference = if created && !opts.keep {
        log::warn!("not keeping reference file, deleting {}", ref_path.display());
        if let Err(e) = std::fs::remove_file(&ref_path) {
            log::warn!("could not delete {}: {e}", ref_path.display());
        }
        None
    } else {
        Some(ref_path)
    };

    Ok(RefOutcome {
        output: subtracted?,
        reference,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use dm_core::config::{Precision, ReferenceConfig};
    use dm_formats::dat::{decode_i16_le, encode_i16_le};

    use super::*;

    pub(crate) fn write_rows_dat<const N: usize>(path: &Path, rows: &[[i16; N]]) {
        let values: Vec<i16> = rows.iter().flatten().copied().collect();
        let mut bytes = Vec::new();
        encode_i16_le(&values, &mut bytes);
        std::fs::write(path, bytes).unwrap();
    }

    pub(crate) fn read_rows_dat<const N: usize>(path: &Path) -> Vec<[i16; N]> {
        let mut values = Vec::new();
        decode_i16_le(&std::fs::read(path).unwrap(), &mut values);
        values
            .chunks_exact(N)
            .map(|c| <[i16; N]>::try_from(c).unwrap())
            .collect()
    }

    pub(crate) fn read_reference(path: &Path, precision: Precision) -> Vec<f64> {
        let bytes = std::fs::read(path).unwrap();
        match precision {
            Precision::Single => bytes
                .chunks_exact(4)
                .map(|b| f64::from(f32::from_le_bytes(b.try_into().unwrap())))
                .collect(),
            Precision::Double => bytes
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
                .collect(),
        }
    }

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let dat = dir.path().join("rec.dat");
        write_rows_dat(&dat, &[[1, 3, 5, 7], [4, 4, 4, 4]]);
        (dir, dat)
    }

    #[test]
    fn created_reference_is_deleted_by_default() {
        let (dir, dat) = setup();
        let opts = RefOptions::new(4, &ReferenceConfig::default());
        let outcome = reference(&dat, None, &opts).unwrap();
        assert_eq!(outcome.output, dir.path().join("rec_meanref.dat"));
        assert_eq!(outcome.reference, None);
        assert!(!dir.path().join("rec_reference.dat").exists());
        assert_eq!(read_rows_dat::<4>(&outcome.output), vec![[-3, -1, 1, 3], [0, 0, 0, 0]]);
    }

    #[test]
    fn keep_leaves_reference() {
        let (dir, dat) = setup();
        let mut opts = RefOptions::new(4, &ReferenceConfig::default());
        opts.keep = true;
        let outcome = reference(&dat, None, &opts).unwrap();
        let kept = dir.path().join("rec_reference.dat");
        assert_eq!(outcome.reference.as_deref(), Some(kept.as_path()));
        assert_eq!(read_reference(&kept, Precision::Single), vec![4.0, 4.0]);
    }

    #[test]
    fn supplied_reference_survives() {
        let (dir, dat) = setup();
        let opts = RefOptions::new(4, &ReferenceConfig::default());
        let own = make_reference(&dat, &opts).unwrap();
        let supplied = dir.path().join("mine.ref");
        std::fs::rename(&own, &supplied).unwrap();

        let outcome = reference(&dat, Some(&supplied), &opts).unwrap();
        assert!(supplied.exists());
        assert_eq!(outcome.reference.as_deref(), Some(supplied.as_path()));
    }

    #[test]
    fn good_selection_and_missing_reference() {
        let (dir, dat) = setup();
        let mut opts = RefOptions::new(4, &ReferenceConfig::default());
        opts.zero_bad = true;
        opts.good = Some(vec![0, 1]);
        opts.bad = Vec::new();
        let outcome = reference(&dat, None, &opts).unwrap();
        assert_eq!(read_rows_dat::<4>(&outcome.output), vec![[-1, 1, 3, 5], [0, 0, 0, 0]]);

        let missing = dir.path().join("none.ref");
        assert!(reference(&dat, Some(&missing), &opts).is_err());
        assert!(!dir.path().join("rec_reference.dat").exists());
    }
}
