use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use dm_core::config::DmConfig;
use dm_core::dataset::DatasetFormat;
use dm_core::probe::{ChannelLayout, find_probe, load_probe};
use dm_formats::target::metadata_from_target;
use dm_ref::{RefOptions, make_reference, reference};

use crate::cli::RefArgs;

/// Probe given with `-l`, else one found next to the data.
fn probe_for(args: &RefArgs, dat: &Path) -> Option<PathBuf> {
    if let Some(p) = &args.layout {
        return Some(p.clone());
    }
    let found = find_probe(dat)?;
    log::warn!("no layout given, using probe file {}", found.display());
    Some(found)
}

fn probe_layout(path: &Path, n_channels: usize) -> Result<ChannelLayout> {
    let layout = load_probe(path)?
        .layout()
        .with_context(|| format!("in {}", path.display()))?;
    Ok(layout.truncated(n_channels))
}

/// Run `dm ref`. Returns the referenced file, or the reference file with `-m`.
///
/// # Errors
/// Returns an error if the input is not a `.dat` recording, the probe file is
/// invalid or referencing fails.
pub fn run(args: &RefArgs, config: &DmConfig) -> Result<PathBuf> {
    let meta = metadata_from_target(&args.input, args.channels, &config.dataset)?;
    if meta.format != DatasetFormat::Dat {
        bail!(
            "{} is a {} recording, referencing needs a .dat file",
            args.input.display(),
            meta.format.label()
        );
    }
    let dat = meta.path.as_path();

    let probe = probe_for(args, dat);
    let dead = match &probe {
        Some(p) => probe_layout(p, meta.n_channels)?.dead,
        None => Vec::new(),
    };

    let mut opts = RefOptions::new(meta.n_channels, &config.reference);
    opts.good.clone_from(&args.good_channels);
    opts.bad = args.bad_channels.iter().chain(&dead).copied().collect();
    opts.bad.sort_unstable();
    opts.bad.dedup();
    opts.zero_bad = args.zero_bad_channels;
    opts.inplace = args.inplace;
    opts.keep |= args.keep;
    opts.out_dir.clone_from(&args.out);
    if let Some(p) = args.precision {
        opts.precision = p.into();
    }
    log::debug!("referencing options: {opts:?}");

    if args.make_only {
        let path = make_reference(dat, &opts)?;
        log::info!("reference written to {}", path.display());
        return Ok(path);
    }

    let outcome = reference(dat, args.reference.as_deref(), &opts)?;
    if let Some(kept) = &outcome.reference {
        log::info!("reference file at {}", kept.display());
    }
    if let Some(prb) = probe
        && !opts.inplace
    {
        let copy = outcome.output.with_extension("prb");
        match std::fs::copy(&prb, &copy) {
            Ok(_) => log::info!("probe copied to {}", copy.display()),
            Err(e) => log::warn!("could not copy {} to {}: {e}", prb.display(), copy.display()),
        }
    }
    Ok(outcome.output)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use dm_formats::dat::decode_i16_le;

    use super::*;
    use crate::cli::{Cli, Command};
    use crate::tests::{write_continuous, write_dat_file};

    fn ref_args(argv: &[&str]) -> RefArgs {
        let cli = Cli::try_parse_from(["dm", "ref"].into_iter().chain(argv.iter().copied())).unwrap();
        match cli.command {
            Command::Ref(args) => args,
            other => panic!("parsed {other:?}"),
        }
    }

    fn read_dat(path: &Path) -> Vec<i16> {
        let mut values = Vec::new();
        decode_i16_le(&std::fs::read(path).unwrap(), &mut values);
        values
    }

    #[test]
    fn probe_dead_channels_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let dat = dir.path().join("rec.dat");
        write_dat_file(&dat, 4, 50);
        let prb = dir.path().join("shank.prb");
        std::fs::write(&prb, "channel_groups = {0: {'channels': range(4), 'dead_channels': [3]}}\n").unwrap();

        let input = dat.to_str().unwrap();
        let out = run(&ref_args(&[input, "-C", "4", "-Z"]), &DmConfig::default()).unwrap();
        assert_eq!(out, dir.path().join("rec_meanref.dat"));

        // row r holds r..r+3, the mean over channels 0..3 is r+1
        let values = read_dat(&out);
        assert_eq!(values.len(), 200);
        for row in values.chunks_exact(4) {
            assert_eq!(row, [-1, 0, 1, 0]);
        }
        assert!(dir.path().join("rec_meanref.prb").is_file());
        assert!(!dir.path().join("rec_reference.dat").exists());
    }

    #[test]
    fn make_only_keeps_reference() {
        let dir = tempfile::tempdir().unwrap();
        let dat = dir.path().join("rec.dat");
        write_dat_file(&dat, 2, 10);
        let refs = dir.path().join("refs");
        std::fs::create_dir(&refs).unwrap();

        let args = ref_args(&[dat.to_str().unwrap(), "-C", "2", "-m", "-o", refs.to_str().unwrap()]);
        let out = run(&args, &DmConfig::default()).unwrap();
        assert_eq!(out, refs.join("rec_reference.dat"));
        // ten f32 means
        assert_eq!(std::fs::metadata(&out).unwrap().len(), 40);
        assert!(!dir.path().join("rec_meanref.dat").exists());
    }

    #[test]
    fn good_channels_conflict_with_probe_dead_channels() {
        let dir = tempfile::tempdir().unwrap();
        let dat = dir.path().join("rec.dat");
        write_dat_file(&dat, 4, 10);
        std::fs::write(
            dir.path().join("p.prb"),
            "channel_groups = {0: {'channels': [0, 1, 2, 3], 'dead_channels': [2]}}\n",
        )
        .unwrap();
        let args = ref_args(&[dat.to_str().unwrap(), "-C", "4", "-g", "0", "1"]);
        assert!(run(&args, &DmConfig::default()).is_err());
    }

    #[test]
    fn continuous_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_continuous(dir.path(), 2, 1);
        let err = run(&ref_args(&[dir.path().to_str().unwrap()]), &DmConfig::default()).unwrap_err();
        assert!(err.to_string().contains("OpenEphys"));
    }
}
