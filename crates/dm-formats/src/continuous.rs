//! Open Ephys `.continuous` files.
//!
//! Layout: a 1024-byte ASCII header of `header.<key> = <value>;` statements,
//! then fixed-size records:
//!
//! | bytes | content                                  |
//! |-------|------------------------------------------|
//! | 8     | `i64` LE timestamp of the first sample   |
//! | 2     | `u16` LE samples in the record (1024)    |
//! | 2     | `u16` LE recording number                |
//! | 2048  | 1024 `i16` **big-endian** samples        |
//! | 10    | marker `0 1 2 3 4 5 6 7 8 255`           |

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dm_core::dataset::{DatasetFormat, DatasetMeta};
use dm_core::traits::SampleSource;

use crate::error::FormatError;

/// Size of the text header.
pub const HEADER_BYTES: usize = 1024;
/// Samples per record.
pub const BLOCK_SAMPLES: usize = 1024;
/// Size of one record.
pub const RECORD_BYTES: usize = 8 + 2 + 2 + 2 * BLOCK_SAMPLES + 10;
/// Trailer of every record.
pub const RECORD_MARKER: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 255];

/// Parsed `.continuous` header.
#[derive(Clone, Debug, PartialEq)]
pub struct ContinuousHeader {
    /// `header.format`.
    pub format: String,
    /// `header.version`.
    pub version: String,
    /// `header.channel`, e.g. `CH1`.
    pub channel: String,
    /// `header.date_created`.
    pub date_created: String,
    /// `header.sampleRate` in Hz.
    pub sample_rate: f64,
    /// `header.blockLength`.
    pub block_length: usize,
    /// `header.bitVolts`, microvolts per bit.
    pub bit_volts: f64,
}

/// Parse the 1024-byte header.
///
/// Unknown keys are ignored. `sampleRate` is mandatory; `bitVolts`
/// defaults to 0.195 and `blockLength` to 1024.
///
/// # Errors
/// `MissingHeaderField` if the sample rate is absent or unparsable.
pub fn parse_header(bytes: &[u8], path: &Path) -> Result<ContinuousHeader, FormatError> {
    let text = String::from_utf8_lossy(bytes);
    let mut header = ContinuousHeader {
        format: String::new(),
        version: String::new(),
        channel: String::new(),
        date_created: String::new(),
        sample_rate: 0.0,
        block_length: BLOCK_SAMPLES,
        bit_volts: 0.195,
    };

    for stmt in text.split([';', '\n']) {
        let Some((key, value)) = stmt.trim().split_once('=') else {
            continue;
        };
        let Some(key) = key.trim().strip_prefix("header.") else {
            continue;
        };
        let value = value.trim().trim_matches(['\'', '"']).trim();
        match key {
            "format" => header.format = value.to_string(),
            "version" => header.version = value.to_string(),
            "channel" => header.channel = value.to_string(),
            "date_created" => header.date_created = value.to_string(),
            "sampleRate" => header.sample_rate = value.parse().unwrap_or(0.0),
            "blockLength" => header.block_length = value.parse().unwrap_or(BLOCK_SAMPLES),
            "bitVolts" => header.bit_volts = value.parse().unwrap_or(header.bit_volts),
            _ => {}
        }
    }

    if header.sample_rate <= 0.0 {
        return Err(FormatError::MissingHeaderField {
            path: path.to_path_buf(),
            field: "sampleRate",
        });
    }
    Ok(header)
}

/// Read and parse the header at the start of `path`.
///
/// # Errors
/// I/O errors, a file shorter than the header, or a header without sample rate.
pub fn read_header(path: &Path) -> Result<ContinuousHeader, FormatError> {
    let mut file = File::open(path)?;
    let mut bytes = [0u8; HEADER_BYTES];
    file.read_exact(&mut bytes)?;
    parse_header(&bytes, path)
}

/// Number of whole records in a file of `file_len` bytes.
///
/// # Example
/// ```
/// use dm_formats::continuous::{record_count, HEADER_BYTES, RECORD_BYTES};
/// assert_eq!(record_count((HEADER_BYTES + 3 * RECORD_BYTES) as u64), 3);
/// assert_eq!(record_count(10), 0);
/// ```
#[must_use]
pub fn record_count(file_len: u64) -> u64 {
    file_len.saturating_sub(HEADER_BYTES as u64) / RECORD_BYTES as u64
}

/// One decoded record.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Timestamp of the first sample.
    pub timestamp: i64,
    /// Valid samples.
    pub n_samples: u16,
    /// Recording number.
    pub recording: u16,
    /// Raw ADC values.
    pub samples: Vec<i16>,
}

/// Decode one record from raw bytes.
///
/// # Errors
/// `BadMarker` or `BadBlockLength` on corrupt data.
pub fn decode_record(raw: &[u8; RECORD_BYTES], index: u64) -> Result<Record, FormatError> {
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&raw[0..8]);
    let n_samples = u16::from_le_bytes([raw[8], raw[9]]);
    let recording = u16::from_le_bytes([raw[10], raw[11]]);
    if usize::from(n_samples) > BLOCK_SAMPLES {
        return Err(FormatError::BadBlockLength {
            record: index,
            n_samples,
        });
    }
    if raw[RECORD_BYTES - 10..] != RECORD_MARKER {
        return Err(FormatError::BadMarker { record: index });
    }
    let samples = raw[12..12 + 2 * BLOCK_SAMPLES]
        .chunks_exact(2)
        .map(|b| i16::from_be_bytes([b[0], b[1]]))
        .collect();
    Ok(Record {
        timestamp: i64::from_le_bytes(ts),
        n_samples,
        recording,
        samples,
    })
}

/// Read the next record, `None` at a clean end of file.
///
/// # Errors
/// `Truncated` if the file ends inside a record, plus decode errors.
pub fn read_record<R: Read>(reader: &mut R, index: u64) -> Result<Option<Record>, FormatError> {
    let mut raw = [0u8; RECORD_BYTES];
    let mut filled = 0;
    while filled < RECORD_BYTES {
        match reader.read(&mut raw[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(None),
        RECORD_BYTES => decode_record(&raw, index).map(Some),
        _ => Err(FormatError::Truncated { record: index }),
    }
}

/// Write a header block holding the given parameters.
///
/// # Errors
/// Propagates write errors.
pub fn write_header<W: Write>(
    w: &mut W,
    channel: &str,
    sample_rate: f64,
    bit_volts: f64,
) -> std::io::Result<()> {
    let text = format!(
        "header.format = 'Open Ephys Data Format'; \n\
         header.version = 0.4;\n\
         header.header_bytes = {HEADER_BYTES};\n\
         header.description = 'each record contains one 64-bit timestamp, one 16-bit sample count (N), 1 uint16 recordingNumber, N 16-bit samples, and one 10-byte record marker (0 1 2 3 4 5 6 7 8 255)';\n\
         header.channel = '{channel}';\n\
         header.channelType = 'Continuous';\n\
         header.sampleRate = {sample_rate};\n\
         header.blockLength = {BLOCK_SAMPLES};\n\
         header.bufferSize = 1024;\n\
         header.bitVolts = {bit_volts};\n"
    );
    let mut block = [b' '; HEADER_BYTES];
    let len = text.len().min(HEADER_BYTES);
    block[..len].copy_from_slice(&text.as_bytes()[..len]);
    w.write_all(&block)
}

/// Write one full record; `samples` beyond a block are ignored, missing ones are zero.
///
/// # Errors
/// Propagates write errors.
pub fn write_record<W: Write>(
    w: &mut W,
    timestamp: i64,
    recording: u16,
    samples: &[i16],
) -> std::io::Result<()> {
    let mut raw = [0u8; RECORD_BYTES];
    raw[0..8].copy_from_slice(&timestamp.to_le_bytes());
    raw[8..10].copy_from_slice(&(BLOCK_SAMPLES as u16).to_le_bytes());
    raw[10..12].copy_from_slice(&recording.to_le_bytes());
    for (i, s) in samples.iter().take(BLOCK_SAMPLES).enumerate() {
        raw[12 + 2 * i..14 + 2 * i].copy_from_slice(&s.to_be_bytes());
    }
    raw[RECORD_BYTES - 10..].copy_from_slice(&RECORD_MARKER);
    w.write_all(&raw)
}

/// Channel number of a file named like `106_CH12.continuous`.
fn channel_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let idx = stem.rfind("CH")?;
    let digits: String = stem[idx + 2..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// `.continuous` files of `dir` ordered by channel number.
///
/// Files without a `CH<n>` channel tag (AUX, ADC) are skipped unless no
/// file carries one.
///
/// # Errors
/// Returns an error if the directory cannot be read.
pub fn channel_files(dir: &Path) -> Result<Vec<PathBuf>, FormatError> {
    let mut all: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("continuous"))
        })
        .collect();
    all.sort();

    let mut tagged: Vec<(u32, PathBuf)> = all
        .iter()
        .filter_map(|p| channel_number(p).map(|n| (n, p.clone())))
        .collect();
    if tagged.is_empty() {
        return Ok(all);
    }
    tagged.sort();
    Ok(tagged.into_iter().map(|(_, p)| p).collect())
}

/// Metadata of an Open Ephys recording directory, from headers and sizes only.
///
/// # Errors
/// No channel files, unreadable headers, or mismatched sample rates.
pub fn scan(dir: &Path) -> Result<DatasetMeta, FormatError> {
    let files = channel_files(dir)?;
    let Some(first) = files.first() else {
        return Err(FormatError::Unsupported {
            path: dir.to_path_buf(),
        });
    };
    let header = read_header(first)?;

    let mut n_records = u64::MAX;
    for path in &files {
        let h = read_header(path)?;
        if (h.sample_rate - header.sample_rate).abs() > f64::EPSILON {
            return Err(FormatError::MismatchedSampleRates {
                path: path.clone(),
                expected: header.sample_rate,
                found: h.sample_rate,
            });
        }
        let records = record_count(std::fs::metadata(path)?.len());
        if n_records != u64::MAX && records != n_records {
            log::warn!(
                "{} has {records} records, previous channels {n_records}; using the shortest",
                path.display()
            );
        }
        n_records = n_records.min(records);
    }

    Ok(DatasetMeta {
        format: DatasetFormat::OpenEphys,
        path: dir.to_path_buf(),
        n_channels: files.len(),
        files,
        sample_rate: header.sample_rate,
        n_samples: n_records * BLOCK_SAMPLES as u64,
        bit_volts: header.bit_volts,
    })
}

/// Reader over all channel files of a recording.
pub struct ContinuousSource {
    meta: DatasetMeta,
    readers: Vec<BufReader<File>>,
}

impl ContinuousSource {
    /// Open every channel file of `dir`.
    ///
    /// # Errors
    /// See [`scan`]; plus I/O errors opening the files.
    pub fn open(dir: &Path) -> Result<Self, FormatError> {
        let meta = scan(dir)?;
        Self::from_meta(meta)
    }

    /// Open the files listed in `meta`.
    ///
    /// # Errors
    /// I/O errors opening the files.
    pub fn from_meta(meta: DatasetMeta) -> Result<Self, FormatError> {
        let readers = meta
            .files
            .iter()
            .map(|p| File::open(p).map(|f| BufReader::with_capacity(RECORD_BYTES * 8, f)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { meta, readers })
    }
}

impl SampleSource for ContinuousSource {
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
        let first_record = start / BLOCK_SAMPLES as u64;
        let skip = (start % BLOCK_SAMPLES as u64) as usize;
        let scale = self.meta.bit_volts as f32;

        for (ch, reader) in self.readers.iter_mut().enumerate() {
            let dst = &mut out[ch * len..ch * len + available];
            reader.seek(SeekFrom::Start(
                HEADER_BYTES as u64 + first_record * RECORD_BYTES as u64,
            ))?;
            let mut written = 0;
            let mut index = first_record;
            let mut offset = skip;
            while written < available {
                let record = read_record(reader, index)
                    .with_context(|| format!("{}", self.meta.files[ch].display()))?
                    .ok_or(FormatError::Truncated { record: index })?;
                let take = (BLOCK_SAMPLES - offset).min(available - written);
                for (d, &s) in dst[written..written + take]
                    .iter_mut()
                    .zip(&record.samples[offset..offset + take])
                {
                    *d = f32::from(s) * scale;
                }
                written += take;
                offset = 0;
                index += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Write an `n_channels` recording where channel `c`, sample `i` holds `c * 1000 + i % 1000`.
    pub(crate) fn write_recording(dir: &Path, n_channels: usize, n_records: usize) {
        for c in 0..n_channels {
            let path = dir.join(format!("100_CH{}.continuous", c + 1));
            let mut f = std::io::BufWriter::new(File::create(path).unwrap());
            write_header(&mut f, &format!("CH{}", c + 1), 30_000.0, 1.0).unwrap();
            for r in 0..n_records {
                let samples: Vec<i16> = (0..BLOCK_SAMPLES)
                    .map(|i| (c * 1000 + (r * BLOCK_SAMPLES + i) % 1000) as i16)
                    .collect();
                write_record(&mut f, (r * BLOCK_SAMPLES) as i64, 0, &samples).unwrap();
            }
        }
    }

    #[test]
    fn header_fields_parsed() {
        let mut buf = Vec::new();
        write_header(&mut buf, "CH7", 25_000.0, 0.195).unwrap();
        assert_eq!(buf.len(), HEADER_BYTES);
        let h = parse_header(&buf, Path::new("x")).unwrap();
        assert_eq!(h.channel, "CH7");
        assert_eq!(h.format, "Open Ephys Data Format");
        assert_eq!(h.version, "0.4");
        assert!((h.sample_rate - 25_000.0).abs() < f64::EPSILON);
        assert!((h.bit_volts - 0.195).abs() < 1e-12);
        assert_eq!(h.block_length, 1024);
    }

    #[test]
    fn header_without_rate_rejected() {
        let err = parse_header(b"header.channel = 'CH1';", Path::new("x")).unwrap_err();
        assert!(matches!(
            err,
            FormatError::MissingHeaderField {
                field: "sampleRate",
                ..
            }
        ));
    }

    #[test]
    fn record_samples_are_big_endian() {
        let mut raw = Vec::new();
        write_record(&mut raw, 42, 3, &[1, -2, 300]).unwrap();
        assert_eq!(raw.len(), RECORD_BYTES);
        assert_eq!(&raw[12..14], &[0x00, 0x01]);
        let rec = read_record(&mut raw.as_slice(), 0).unwrap().unwrap();
        assert_eq!(rec.timestamp, 42);
        assert_eq!(rec.recording, 3);
        assert_eq!(rec.n_samples, 1024);
        assert_eq!(&rec.samples[..4], &[1, -2, 300, 0]);
    }

    #[test]
    fn corrupt_records_rejected() {
        let mut raw = Vec::new();
        write_record(&mut raw, 0, 0, &[]).unwrap();
        let mut bad = raw.clone();
        bad[RECORD_BYTES - 1] = 0;
        assert!(matches!(
            read_record(&mut bad.as_slice(), 5),
            Err(FormatError::BadMarker { record: 5 })
        ));
        assert!(matches!(
            read_record(&mut &raw[..100], 1),
            Err(FormatError::Truncated { record: 1 })
        ));
        assert!(read_record(&mut &raw[..0], 0).unwrap().is_none());
    }

    #[test]
    fn channel_files_ordered_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["100_CH10", "100_CH2", "100_CH1", "100_AUX1"] {
            std::fs::write(dir.path().join(format!("{name}.continuous")), b"").unwrap();
        }
        let names: Vec<String> = channel_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["100_CH1", "100_CH2", "100_CH10"]);
    }

    #[test]
    fn window_spans_record_boundary() {
        let dir = tempfile::tempdir().unwrap();
        write_recording(dir.path(), 2, 3);
        let mut src = ContinuousSource::open(dir.path()).unwrap();
        assert_eq!(src.meta().n_channels, 2);
        assert_eq!(src.meta().n_samples, 3 * 1024);

        let mut out = vec![0.0; 2 * 10];
        src.read_window(1020, 10, &mut out).unwrap();
        let expected: Vec<f32> = (1020..1030).map(|i| (i % 1000) as f32).collect();
        assert_eq!(&out[..10], expected.as_slice());
        assert!((out[10] - (1000.0 + 20.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn window_past_end_is_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        write_recording(dir.path(), 1, 1);
        let mut src = ContinuousSource::open(dir.path()).unwrap();
        let mut out = vec![1.0; 8];
        src.read_window(1020, 8, &mut out).unwrap();
        assert!((out[3] - 23.0).abs() < f32::EPSILON);
        assert!(out[4..].iter().all(|&v| v == 0.0));
    }
}
