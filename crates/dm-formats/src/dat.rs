//! Raw `.dat` recordings: little-endian `i16`, one row of `n_channels`
//! values per sample.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use dm_core::dataset::{DatasetFormat, DatasetMeta};
use dm_core::traits::SampleSource;

use crate::error::FormatError;

/// Bytes per stored value.
pub const SAMPLE_BYTES: usize = 2;

/// Decode little-endian `i16` values, appending to `out`.
pub fn decode_i16_le(bytes: &[u8], out: &mut Vec<i16>) {
    out.extend(
        bytes
            .chunks_exact(SAMPLE_BYTES)
            .map(|b| i16::from_le_bytes([b[0], b[1]])),
    );
}

/// Encode `values` as little-endian bytes, appending to `out`.
pub fn encode_i16_le(values: &[i16], out: &mut Vec<u8>) {
    out.reserve(values.len() * SAMPLE_BYTES);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Number of rows of a file, checking that it holds whole rows.
///
/// # Errors
/// `Misaligned` if the size is not a multiple of the row size.
pub fn row_count(path: &Path, n_channels: usize) -> Result<u64, FormatError> {
    let len = std::fs::metadata(path)
        .map_err(|_| FormatError::NotFound {
            path: path.to_path_buf(),
        })?
        .len();
    let row_bytes = (n_channels.max(1) * SAMPLE_BYTES) as u64;
    if len % row_bytes != 0 {
        return Err(FormatError::Misaligned {
            path: path.to_path_buf(),
            len,
            row_bytes,
        });
    }
    Ok(len / row_bytes)
}

/// Sequential batch reader over the rows of a `.dat` file.
pub struct DatReader {
    reader: BufReader<File>,
    n_channels: usize,
    bytes: Vec<u8>,
}

impl DatReader {
    /// Open `path` for reading rows of `n_channels` values.
    ///
    /// # Errors
    /// I/O errors opening the file.
    pub fn open(path: &Path, n_channels: usize) -> Result<Self, FormatError> {
        Ok(Self {
            reader: BufReader::with_capacity(1 << 20, File::open(path)?),
            n_channels,
            bytes: Vec::new(),
        })
    }

    /// Position the reader at `row`.
    ///
    /// # Errors
    /// Propagates seek errors.
    pub fn seek_row(&mut self, row: u64) -> Result<(), FormatError> {
        self.reader
            .seek(SeekFrom::Start(row * (self.n_channels * SAMPLE_BYTES) as u64))?;
        Ok(())
    }

    /// Read exactly `rows` rows into `out` (cleared first), interleaved.
    ///
    /// # Errors
    /// Propagates read errors, including an early end of file.
    pub fn read_rows(&mut self, rows: usize, out: &mut Vec<i16>) -> Result<(), FormatError> {
        self.bytes.resize(rows * self.n_channels * SAMPLE_BYTES, 0);
        self.reader.read_exact(&mut self.bytes)?;
        out.clear();
        decode_i16_le(&self.bytes, out);
        Ok(())
    }
}

/// Write interleaved rows to `w`, reusing `scratch` for the encoding.
///
/// # Errors
/// Propagates write errors.
pub fn write_rows<W: Write>(w: &mut W, values: &[i16], scratch: &mut Vec<u8>) -> Result<(), FormatError> {
    scratch.clear();
    encode_i16_le(values, scratch);
    w.write_all(scratch)?;
    Ok(())
}

/// Random-access [`SampleSource`] over a `.dat` file.
pub struct DatSource {
    meta: DatasetMeta,
    reader: DatReader,
    rows: Vec<i16>,
}

impl DatSource {
    /// Open `path` with the given recording parameters.
    ///
    /// # Errors
    /// Missing file or a size that is not a whole number of rows.
    pub fn open(
        path: &Path,
        n_channels: usize,
        sample_rate: f64,
        bit_volts: f64,
    ) -> Result<Self, FormatError> {
        let n_samples = row_count(path, n_channels)?;
        let meta = DatasetMeta {
            format: DatasetFormat::Dat,
            path: path.to_path_buf(),
            files: vec![PathBuf::from(path)],
            n_channels,
            sample_rate,
            n_samples,
            bit_volts,
        };
        Self::from_meta(meta)
    }

    /// Open the file described by `meta`.
    ///
    /// # Errors
    /// I/O errors opening the file.
    pub fn from_meta(meta: DatasetMeta) -> Result<Self, FormatError> {
        let reader = DatReader::open(&meta.path, meta.n_channels)?;
        Ok(Self {
            meta,
            reader,
            rows: Vec::new(),
        })
    }
}

impl SampleSource for DatSource {
    fn meta(&self) -> &DatasetMeta {
        &self.meta
    }

    fn read_window(&mut self, start: u64, len: usize, out: &mut [f32]) -> Result<()> {
        out.fill(0.0);
        let total = self.meta.n_samples;
        if start >= total || len == 0 {
            return Ok(());
        }
        let available = (total - start).min(len as u64) as usize;
        let n_channels = self.meta.n_channels;
        let scale = self.meta.bit_volts as f32;

        self.reader.seek_row(start)?;
        self.reader.read_rows(available, &mut self.rows)?;
        for (i, row) in self.rows.chunks_exact(n_channels).enumerate() {
            for (ch, &v) in row.iter().enumerate() {
                out[ch * len + i] = f32::from(v) * scale;
            }
        }
        Ok(())
    }
}
