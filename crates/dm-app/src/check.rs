use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use dm_core::config::DatasetConfig;
use dm_core::dataset::DatasetFormat;
use dm_core::probe::{find_probe, load_probe};
use dm_formats::continuous::{self, HEADER_BYTES, RECORD_BYTES, read_header, read_record, record_count};
use dm_formats::dat;
use dm_formats::target::{TargetKind, dat_parameters, detect};

/// One problem found in a recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    /// File the problem was found in.
    pub path: PathBuf,
    /// Description.
    pub message: String,
}

/// Outcome of [`check_target`].
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    /// Checked recording.
    pub target: PathBuf,
    /// Its format.
    pub format: DatasetFormat,
    /// Data and probe files inspected.
    pub files_checked: usize,
    /// Problems, in discovery order.
    pub issues: Vec<Issue>,
}

impl Report {
    fn new(target: &Path, format: DatasetFormat) -> Self {
        Self {
            target: target.to_path_buf(),
            format,
            files_checked: 0,
            issues: Vec::new(),
        }
    }

    fn issue(&mut self, path: &Path, message: impl Into<String>) {
        let message = message.into();
        log::debug!("{}: {message}", path.display());
        self.issues.push(Issue {
            path: path.to_path_buf(),
            message,
        });
    }

    /// No issues found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// Write a human readable summary.
    ///
    /// # Errors
    /// Propagates write errors.
    pub fn print<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for issue in &self.issues {
            writeln!(w, "{}: {}", issue.path.display(), issue.message)?;
        }
        if self.is_ok() {
            writeln!(
                w,
                "OK: {} ({}, {} files checked)",
                self.target.display(),
                self.format.label(),
                self.files_checked
            )
        } else {
            writeln!(w, "{} issue(s) in {}", self.issues.len(), self.target.display())
        }
    }
}

/// Verify the recording at `target`.
///
/// Open Ephys: headers, sample rates, file sizes, record markers, block
/// lengths, timestamp continuity and equal lengths across channels. Dat:
/// whole rows. Both: channel indices of a probe file found next to the data.
///
/// # Errors
/// Returns an error if the target is not a checkable recording.
pub fn check_target(target: &Path, n_channels: Option<usize>, defaults: &DatasetConfig) -> Result<Report> {
    match detect(target)? {
        TargetKind::Continuous(dir) => {
            let mut report = Report::new(&dir, DatasetFormat::OpenEphys);
            let files = continuous::channel_files(&dir)?;
            check_continuous(&files, &mut report);
            check_probe(&dir, files.len(), &mut report);
            Ok(report)
        }
        TargetKind::Dat(file) => {
            let mut report = Report::new(&file, DatasetFormat::Dat);
            let params = dat_parameters(&file, n_channels, defaults)?;
            report.files_checked += 1;
            if let Err(e) = dat::row_count(&file, params.n_channels) {
                report.issue(&file, e.to_string());
            }
            check_probe(&file, params.n_channels, &mut report);
            Ok(report)
        }
        TargetKind::Kwik(dir) => bail!("{}: kwik datasets cannot be checked", dir.display()),
    }
}

fn check_continuous(files: &[PathBuf], report: &mut Report) {
    let mut reference: Option<(f64, u64)> = None;
    for path in files {
        report.files_checked += 1;
        let header = match read_header(path) {
            Ok(h) => h,
            Err(e) => {
                report.issue(path, format!("unreadable header: {e}"));
                continue;
            }
        };
        let len = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => {
                report.issue(path, e.to_string());
                continue;
            }
        };
        let n_records = record_count(len);
        let trailing = len.saturating_sub(HEADER_BYTES as u64) % RECORD_BYTES as u64;
        if trailing != 0 {
            report.issue(path, format!("{trailing} bytes after the last whole record"));
        }

        match reference {
            None => reference = Some((header.sample_rate, n_records)),
            Some((rate, records)) => {
                if (rate - header.sample_rate).abs() > f64::EPSILON {
                    report.issue(path, format!("sample rate {} Hz, first channel {rate} Hz", header.sample_rate));
                }
                if records != n_records {
                    report.issue(path, format!("{n_records} records, first channel {records}"));
                }
            }
        }

        if let Err(e) = check_records(path, n_records, report) {
            report.issue(path, e.to_string());
        }
    }
}

/// Walk the records of one file checking markers and timestamp continuity.
fn check_records(path: &Path, n_records: u64, report: &mut Report) -> std::io::Result<()> {
    let mut reader = BufReader::with_capacity(RECORD_BYTES * 64, File::open(path)?);
    reader.seek(SeekFrom::Start(HEADER_BYTES as u64))?;

    // `Some(None)`: the previous record ends past `i64::MAX`.
    let mut expected: Option<Option<i64>> = None;
    let mut gaps = 0u64;
    let mut first_gap = None;
    for index in 0..n_records {
        let record = match read_record(&mut reader, index) {
            Ok(Some(r)) => r,
            Ok(None) => break,
            Err(e) => {
                report.issue(path, e.to_string());
                break;
            }
        };
        if let Some(ts) = expected
            && ts != Some(record.timestamp)
        {
            gaps += 1;
            first_gap.get_or_insert(index);
        }
        expected = Some(record.timestamp.checked_add(i64::from(record.n_samples)));
    }
    if let Some(first) = first_gap {
        report.issue(path, format!("{gaps} timestamp discontinuities, first at record {first}"));
    }
    Ok(())
}

fn check_probe(target: &Path, n_channels: usize, report: &mut Report) {
    let Some(prb) = find_probe(target) else {
        log::debug!("no probe file next to {}", target.display());
        return;
    };
    report.files_checked += 1;
    let layout = match load_probe(&prb).and_then(|p| Ok(p.layout()?)) {
        Ok(l) => l,
        Err(e) => {
            report.issue(&prb, format!("{e:#}"));
            return;
        }
    };
    let outside: Vec<usize> = layout.channels.iter().copied().filter(|&c| c >= n_channels).collect();
    if !outside.is_empty() {
        report.issue(&prb, format!("channels {outside:?} beyond the {n_channels} recorded"));
    }
    let orphans: Vec<usize> = layout
        .dead
        .iter()
        .copied()
        .filter(|c| !layout.channels.contains(c))
        .collect();
    if !orphans.is_empty() {
        report.issue(&prb, format!("dead channels {orphans:?} not listed in any group"));
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;

    use dm_formats::continuous::{write_header, write_record};

    use super::*;
    use crate::tests::{write_continuous, write_dat_file};

    #[test]
    fn clean_recording_passes() {
        let dir = tempfile::tempdir().unwrap();
        write_continuous(dir.path(), 3, 4);
        let report = check_target(dir.path(), None, &DatasetConfig::default()).unwrap();
        assert!(report.is_ok(), "{:?}", report.issues);
        assert_eq!(report.files_checked, 3);
    }

    #[test]
    fn continuous_defects_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_continuous(dir.path(), 2, 3);
        let ch2 = dir.path().join("100_CH2.continuous");

        // a jump in time plus a dangling half record
        let mut f = OpenOptions::new().append(true).open(&ch2).unwrap();
        write_record(&mut f, 1_000_000, 0, &[]).unwrap();
        f.write_all(&[0u8; 100]).unwrap();
        drop(f);

        let report = check_target(dir.path(), None, &DatasetConfig::default()).unwrap();
        let messages: Vec<&str> = report.issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(report.issues.len(), 3, "{messages:?}");
        assert!(messages[0].contains("100 bytes"));
        assert!(messages[1].contains("4 records, first channel 3"));
        assert!(messages[2].contains("first at record 3"));
        assert!(report.issues.iter().all(|i| i.path == ch2));
    }

    #[test]
    fn corrupt_marker_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("100_CH1.continuous");
        let mut f = File::create(&path).unwrap();
        write_header(&mut f, "CH1", 30_000.0, 0.195).unwrap();
        let mut raw = Vec::new();
        write_record(&mut raw, 0, 0, &[]).unwrap();
        let last = raw.len() - 1;
        raw[last] = 0;
        f.write_all(&raw).unwrap();
        drop(f);

        let report = check_target(dir.path(), None, &DatasetConfig::default()).unwrap();
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].message.contains("marker"));
    }

    #[test]
    fn dat_size_and_probe_checked() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rec.dat");
        write_dat_file(&file, 4, 10);
        std::fs::write(
            dir.path().join("probe.prb"),
            "channel_groups = {0: {'channels': [0, 1, 2, 5], 'dead_channels': [7]}}\n",
        )
        .unwrap();

        let report = check_target(&file, Some(4), &DatasetConfig::default()).unwrap();
        assert_eq!(report.files_checked, 2);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues[0].message.contains("[5]"));
        assert!(report.issues[1].message.contains("[7]"));

        let report = check_target(&file, Some(3), &DatasetConfig::default()).unwrap();
        assert!(report.issues[0].message.contains("not a multiple"));
    }

    #[test]
    fn report_summary() {
        let dir = tempfile::tempdir().unwrap();
        write_continuous(dir.path(), 1, 1);
        let report = check_target(dir.path(), None, &DatasetConfig::default()).unwrap();
        let mut out = Vec::new();
        report.print(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("OK: "));
    }

    #[test]
    fn timestamp_past_i64_is_a_discontinuity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("100_CH1.continuous");
        let mut f = File::create(&path).unwrap();
        write_header(&mut f, "CH1", 30_000.0, 0.195).unwrap();
        write_record(&mut f, i64::MAX, 0, &[]).unwrap();
        write_record(&mut f, 0, 0, &[]).unwrap();
        write_record(&mut f, 1024, 0, &[]).unwrap();
        drop(f);

        let report = check_target(dir.path(), None, &DatasetConfig::default()).unwrap();
        assert_eq!(report.issues.len(), 1, "{:?}", report.issues);
        assert!(report.issues[0].message.contains("1 timestamp discontinuities, first at record 1"));
    }
}
