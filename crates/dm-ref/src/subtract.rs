use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use dm_core::batch::{batch_limits, batch_size};
use dm_core::config::Precision;
use dm_formats::dat::{DatReader, SAMPLE_BYTES, decode_i16_le, encode_i16_le, row_count, write_rows};

use crate::error::RefError;
use crate::options::{RefOptions, meanref_path};
use crate::progress::Progress;

/// Number of values in a reference file of the given precision.
///
/// # Errors
/// I/O errors or a size that is not a whole number of values.
pub fn reference_len(path: &Path, precision: Precision) -> Result<u64, RefError> {
    let len = std::fs::metadata(path)?.len();
    let value_bytes = precision.bytes();
    if len % value_bytes as u64 != 0 {
        return Err(RefError::MisalignedReference {
            path: path.to_path_buf(),
            len,
            value_bytes,
        });
    }
    Ok(len / value_bytes as u64)
}

/// Sequential reader of reference values.
struct RefReader {
    reader: BufReader<File>,
    precision: Precision,
    bytes: Vec<u8>,
}

impl RefReader {
    fn open(path: &Path, precision: Precision) -> Result<Self, RefError> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            precision,
            bytes: Vec::new(),
        })
    }

    fn read(&mut self, n: usize, out: &mut Vec<f64>) -> Result<(), RefError> {
        self.bytes.resize(n * self.precision.bytes(), 0);
        self.reader.read_exact(&mut self.bytes)?;
        out.clear();
        match self.precision {
            Precision::Single => out.extend(
                self.bytes
                    .chunks_exact(4)
                    .map(|b| f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            ),
            Precision::Double => out.extend(self.bytes.chunks_exact(8).map(|b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            })),
        }
        Ok(())
    }
}

/// `x - r` truncated toward zero, saturated to the `i16` range.
///
/// # Example
/// ```
/// use dm_ref::subtract::subtract_sample;
/// assert_eq!(subtract_sample(10, 2.75), 7);
/// assert_eq!(subtract_sample(-10, 2.75), -12);
/// assert_eq!(subtract_sample(i16::MIN, 100.0), i16::MIN);
/// ```
#[must_use]
pub fn subtract_sample(x: i16, r: f64) -> i16 {
    // float-to-int `as` saturates
    (f64::from(x) - r).trunc() as i16
}

/// Subtract one reference value per row and zero `zero` channels.
fn apply(rows: &mut [i16], reference: &[f64], n_channels: usize, zero: &[usize]) {
    for (row, &r) in rows.chunks_exact_mut(n_channels).zip(reference) {
        for v in row.iter_mut() {
            *v = subtract_sample(*v, r);
        }
        for &c in zero {
            row[c] = 0;
        }
    }
}

/// Subtract `reference` from every channel of `dat`.
///
/// Writes `<stem>_meanref<ext>` next to `dat`, or overwrites `dat` when
/// `opts.inplace`. With `opts.zero_bad` the channels in `opts.bad` are set to
/// zero. Returns the path of the referenced data.
///
/// # Errors
/// Mismatched lengths, bad channel indices, or I/O failures. A partially
/// written output file is removed.
pub fn subtract_reference(dat: &Path, reference: &Path, opts: &RefOptions) -> Result<PathBuf, RefError> {
    let n_channels = opts.n_channels;
    let dat_rows = row_count(dat, n_channels)?;
    let ref_rows = reference_len(reference, opts.precision)?;
    if dat_rows != ref_rows {
        return Err(RefError::RowMismatch { dat_rows, ref_rows });
    }
    let zero: Vec<usize> = if opts.zero_bad {
        opts.bad.clone()
    } else {
        Vec::new()
    };
    if let Some(&index) = zero.iter().find(|&&c| c >= n_channels) {
        return Err(RefError::ChannelOutOfRange { index, n_channels });
    }
    if !zero.is_empty() {
        log::info!("zeroing channels {zero:?}");
    }
    log::debug!(
        "subtracting {} from {} ({n_channels} channels, {:?}, inplace={})",
        reference.display(),
        dat.display(),
        opts.precision,
        opts.inplace
    );

    let n_rows = dat_rows as usize;
    let batches = batch_limits(
        n_rows,
        batch_size(n_rows, n_channels * SAMPLE_BYTES, opts.batch_bytes),
    );
    let mut refs = RefReader::open(reference, opts.precision)?;

    if opts.inplace {
        subtract_inplace(dat, &mut refs, &batches, n_channels, &zero)?;
        return Ok(dat.to_path_buf());
    }

    let out_path = meanref_path(dat);
    let result = subtract_copy(dat, &out_path, &mut refs, &batches, n_channels, &zero);
    if result.is_err() {
        let _ = std::fs::remove_file(&out_path);
    }
    result.map(|()| out_path)
}

fn subtract_copy(
    dat: &Path,
    out_path: &Path,
    refs: &mut RefReader,
    batches: &[(usize, usize)],
    n_channels: usize,
    zero: &[usize],
) -> Result<(), RefError> {
    let mut reader = DatReader::open(dat, n_channels)?;
    let mut writer = BufWriter::new(File::create(out_path)?);
    let mut progress = Progress::new("subtract", batches.len());
    let (mut rows, mut reference, mut scratch) = (Vec::new(), Vec::new(), Vec::new());

    for &(start, end) in batches {
        reader.read_rows(end - start, &mut rows)?;
        refs.read(end - start, &mut reference)?;
        apply(&mut rows, &reference, n_channels, zero);
        write_rows(&mut writer, &rows, &mut scratch)?;
        progress.advance(start, end);
    }
    writer.flush()?;
    Ok(())
}

fn subtract_inplace(
    dat: &Path,
    refs: &mut RefReader,
    batches: &[(usize, usize)],
    n_channels: usize,
    zero: &[usize],
) -> Result<(), RefError> {
    let mut file = OpenOptions::new().read(true).write(true).open(dat)?;
    let row_bytes = (n_channels * SAMPLE_BYTES) as u64;
    let mut progress = Progress::new("subtract", batches.len());
    let (mut bytes, mut rows, mut reference) = (Vec::new(), Vec::new(), Vec::new());

    for &(start, end) in batches {
        let offset = start as u64 * row_bytes;
        bytes.resize((end - start) * n_channels * SAMPLE_BYTES, 0);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut bytes)?;
        rows.clear();
        decode_i16_le(&bytes, &mut rows);

        refs.read(end - start, &mut reference)?;
        apply(&mut rows, &reference, n_channels, zero);

        bytes.clear();
        encode_i16_le(&rows, &mut bytes);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        progress.advance(start, end);
    }
    file.flush()?;
    Ok(())
}
