use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dm_core::config::DatasetConfig;
use dm_core::dataset::{DatasetFormat, DatasetMeta, format_duration};
use dm_formats::target::{TargetKind, detect, metadata_from_target};

/// Summary of one recording found by [`gather`].
#[derive(Clone, Debug, PartialEq)]
pub struct EntryStats {
    /// Path relative to the inspected directory (`.` for the directory itself).
    pub name: String,
    /// Format label.
    pub format: &'static str,
    /// Channel count (0 when unknown).
    pub n_channels: usize,
    /// Sampling rate in Hz (0 when unknown).
    pub sample_rate: f64,
    /// Length in seconds.
    pub duration_secs: f64,
    /// Data files.
    pub n_files: usize,
    /// Total size of the data files.
    pub size_bytes: u64,
}

impl EntryStats {
    fn from_meta(name: String, meta: &DatasetMeta) -> Self {
        let size_bytes = meta
            .files
            .iter()
            .filter_map(|f| std::fs::metadata(f).ok())
            .map(|m| m.len())
            .sum();
        Self {
            name,
            format: meta.format.label(),
            n_channels: meta.n_channels,
            sample_rate: meta.sample_rate,
            duration_secs: meta.duration_secs(),
            n_files: meta.files.len(),
            size_bytes,
        }
    }
}

/// Recordings in `root` itself and among its direct entries, by name.
///
/// Entries that look like recordings but cannot be read are logged and
/// skipped.
///
/// # Errors
/// Returns an error if `root` cannot be listed.
pub fn gather(root: &Path, defaults: &DatasetConfig) -> Result<Vec<EntryStats>> {
    let mut out = Vec::new();
    if matches!(detect(root), Ok(TargetKind::Continuous(_) | TargetKind::Kwik(_))) {
        push_entry(&mut out, ".".into(), root, defaults);
    }

    let mut children: Vec<PathBuf> = std::fs::read_dir(root)
        .with_context(|| format!("cannot list {}", root.display()))?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                || p.extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("dat"))
        })
        .collect();
    children.sort();

    for child in children {
        if child.is_dir() && detect(&child).is_err() {
            log::debug!("{}: not a recording", child.display());
            continue;
        }
        let name = child
            .strip_prefix(root)
            .unwrap_or(&child)
            .display()
            .to_string();
        push_entry(&mut out, name, &child, defaults);
    }
    Ok(out)
}

fn push_entry(out: &mut Vec<EntryStats>, name: String, path: &Path, defaults: &DatasetConfig) {
    match metadata_from_target(path, None, defaults) {
        Ok(meta) => out.push(EntryStats::from_meta(name, &meta)),
        Err(e) => log::warn!("{}: {e:#}", path.display()),
    }
}

/// Human readable byte count, e.g. `1.5 KiB`.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Print `entries` as an aligned table.
///
/// # Errors
/// Propagates write errors.
pub fn print_table<W: Write>(entries: &[EntryStats], w: &mut W) -> std::io::Result<()> {
    if entries.is_empty() {
        return writeln!(w, "No recordings found.");
    }
    let header = ["Name", "Format", "Ch", "Fs", "Duration", "Files", "Size"];
    let rows: Vec<[String; 7]> = entries
        .iter()
        .map(|e| {
            let known = e.format != DatasetFormat::Kwik.label();
            [
                e.name.clone(),
                e.format.to_string(),
                if known { e.n_channels.to_string() } else { "?".into() },
                if known {
                    format!("{:.1}kHz", e.sample_rate / 1e3)
                } else {
                    "?".into()
                },
                if known {
                    format_duration(e.duration_secs)
                } else {
                    "?".into()
                },
                e.n_files.to_string(),
                format_size(e.size_bytes),
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[&str]| {
        cells
            .iter()
            .zip(widths)
            .map(|(c, width)| format!("{c:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
    };
    writeln!(w, "{}", line(&header).trim_end())?;
    writeln!(w, "{}", line(&widths.map(|n| "-".repeat(n)).each_ref().map(String::as_str)))?;
    for row in &rows {
        writeln!(w, "{}", line(&row.each_ref().map(String::as_str)).trim_end())?;
    }
    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    writeln!(w, "{} recording(s), {}", entries.len(), format_size(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{write_continuous, write_dat_file};

    #[test]
    fn finds_recordings_among_entries() {
        let dir = tempfile::tempdir().unwrap();
        let oe = dir.path().join("2014-10-30_16-07-29");
        std::fs::create_dir(&oe).unwrap();
        write_continuous(&oe, 2, 3);
        write_dat_file(&dir.path().join("raw.dat"), 64, 30_000);
        std::fs::create_dir(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes").join("a.txt"), "x").unwrap();

        let entries = gather(dir.path(), &DatasetConfig::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "2014-10-30_16-07-29");
        assert_eq!(entries[0].format, "OpenEphys");
        assert_eq!(entries[0].n_channels, 2);
        assert_eq!(entries[0].n_files, 2);
        assert_eq!(entries[1].name, "raw.dat");
        assert!((entries[1].duration_secs - 1.0).abs() < 1e-9);
        assert_eq!(entries[1].size_bytes, 64 * 2 * 30_000);
    }

    #[test]
    fn recording_dir_itself_is_listed() {
        let dir = tempfile::tempdir().unwrap();
        write_continuous(dir.path(), 1, 1);
        let entries = gather(dir.path(), &DatasetConfig::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, ".");
    }

    #[test]
    fn table_lists_every_entry() {
        let entries = vec![EntryStats {
            name: "raw.dat".into(),
            format: "dat",
            n_channels: 64,
            sample_rate: 30_000.0,
            duration_secs: 61.0,
            n_files: 1,
            size_bytes: 1536,
        }];
        let mut out = Vec::new();
        print_table(&entries, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Name"));
        assert!(text.contains("raw.dat"));
        assert!(text.contains("30.0kHz"));
        assert!(text.contains("01min:01s"));
        assert!(text.contains("1.5 KiB"));
        assert!(text.ends_with("1 recording(s), 1.5 KiB\n"));

        let mut out = Vec::new();
        print_table(&[], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No recordings found.\n");
    }
}
