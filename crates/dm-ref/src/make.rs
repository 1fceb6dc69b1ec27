use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dm_core::batch::{batch_limits, batch_size};
use dm_core::config::Precision;
use dm_formats::dat::{DatReader, SAMPLE_BYTES, row_count};
use rayon::prelude::*;

use crate::error::RefError;
use crate::options::{RefOptions, reference_path};
use crate::progress::Progress;

/// Mean of `selected` channels for every row of an interleaved block.
pub(crate) fn row_means(rows: &[i16], n_channels: usize, selected: &[usize]) -> Vec<f64> {
    let all = selected.len() == n_channels;
    let count = selected.len() as f64;
    rows.par_chunks_exact(n_channels)
        .map(|row| {
            let sum: i64 = if all {
                row.iter().map(|&v| i64::from(v)).sum()
            } else {
                selected.iter().map(|&c| i64::from(row[c])).sum()
            };
            sum as f64 / count
        })
        .collect()
}

/// Encode `values` into `out` (cleared first) in the given precision, little-endian.
pub(crate) fn encode_values(values: &[f64], precision: Precision, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(values.len() * precision.bytes());
    for &v in values {
        match precision {
            Precision::Single => out.extend_from_slice(&(v as f32).to_le_bytes()),
            Precision::Double => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
}

/// Write the per-row mean of the selected channels of `dat` to a reference file.
///
/// Returns the path of the new file, `<stem>_reference<ext>` in
/// `opts.out_dir` or next to `dat`.
///
/// # Errors
/// Invalid channel selection, a misaligned `.dat` file, or I/O failures.
pub fn make_reference(dat: &Path, opts: &RefOptions) -> Result<PathBuf, RefError> {
    let selected = opts.selected_channels()?;
    let n_channels = opts.n_channels;
    let n_rows = row_count(dat, n_channels)? as usize;
    let out_path = reference_path(dat, opts.out_dir.as_deref());

    log::debug!(
        "reference of {} from {} of {n_channels} channels at {}",
        dat.display(),
        selected.len(),
        out_path.display()
    );
    if selected.len() == n_channels {
        log::debug!("all channels good, averaging every channel");
    }

    let mut reader = DatReader::open(dat, n_channels)?;
    let mut writer = BufWriter::new(File::create(&out_path)?);
    let batches = batch_limits(
        n_rows,
        batch_size(n_rows, n_channels * SAMPLE_BYTES, opts.batch_bytes),
    );
    let mut progress = Progress::new("reference", batches.len());
    let mut rows = Vec::new();
    let mut bytes = Vec::new();

    for (start, end) in batches {
        reader.read_rows(end - start, &mut rows)?;
        let means = row_means(&rows, n_channels, &selected);
        encode_values(&means, opts.precision, &mut bytes);
        writer.write_all(&bytes)?;
        progress.advance(start, end);
    }
    writer.flush()?;
    Ok(out_path)
}
