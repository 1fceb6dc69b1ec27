use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dm_core::config::Precision;

/// Data Manager: tools for multichannel electrophysiology recordings.
#[derive(Parser, Debug)]
#[command(name = "dm", version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(short, long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Debug mode: most verbose output.
    #[arg(short, long, global = true, default_value_t = false)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of `dm`.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Interactive shell session.
    Cli,
    /// Summarise the recordings in a directory.
    Stats {
        /// Directory to inspect.
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Verify the integrity of a recording.
    Check {
        /// Recording directory or `.dat` file.
        target: PathBuf,
        /// Channels in a `.dat` file.
        #[arg(short = 'C', long)]
        channels: Option<usize>,
    },
    /// Common average referencing of a `.dat` file.
    Ref(RefArgs),
    /// Browse the channels of a recording.
    Vis(VisArgs),
}

/// Reference file value type.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrecisionArg {
    /// 32-bit floats.
    Single,
    /// 64-bit floats.
    Double,
}

impl From<PrecisionArg> for Precision {
    fn from(p: PrecisionArg) -> Self {
        match p {
            PrecisionArg::Single => Precision::Single,
            PrecisionArg::Double => Precision::Double,
        }
    }
}

/// Arguments of `dm ref`.
#[derive(Args, Debug, PartialEq)]
pub struct RefArgs {
    /// Dat file.
    pub input: PathBuf,
    /// Directory to store the reference file in.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
    /// Existing reference file to subtract.
    #[arg(short, long)]
    pub reference: Option<PathBuf>,
    /// Dead channel indices.
    #[arg(short, long = "bad-channels", num_args = 1..)]
    pub bad_channels: Vec<usize>,
    /// Indices of the channels to average.
    #[arg(short, long = "good-channels", num_args = 1.., conflicts_with = "bad_channels")]
    pub good_channels: Option<Vec<usize>>,
    /// Number of channels in the input file.
    #[arg(short = 'C', long)]
    pub channels: Option<usize>,
    /// Set bad channels to zero.
    #[arg(short = 'Z', long = "zero-bad-channels")]
    pub zero_bad_channels: bool,
    /// Subtract the reference in place.
    #[arg(short, long)]
    pub inplace: bool,
    /// Only create the reference file.
    #[arg(short, long = "make-only", conflicts_with = "reference")]
    pub make_only: bool,
    /// Probe file defining the channel layout.
    #[arg(short, long)]
    pub layout: Option<PathBuf>,
    /// Keep the intermediate reference file.
    #[arg(short, long)]
    pub keep: bool,
    /// Reference file precision (default from the config).
    #[arg(long, value_enum)]
    pub precision: Option<PrecisionArg>,
}

/// Arguments of `dm vis`.
#[derive(Args, Debug, PartialEq)]
pub struct VisArgs {
    /// Open Ephys directory or `.dat` file.
    pub target: PathBuf,
    /// Channels in a `.dat` file.
    #[arg(short = 'C', long)]
    pub channels: Option<usize>,
    /// Plot rows per column.
    #[arg(long)]
    pub rows: Option<usize>,
    /// Plot columns.
    #[arg(long)]
    pub cols: Option<usize>,
}

impl Cli {
    /// Log filter: `--debug` wins over `--log-level`.
    #[must_use]
    pub fn level_filter(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Trace
        } else {
            self.log_level.parse().unwrap_or(log::LevelFilter::Warn)
        }
    }
}
