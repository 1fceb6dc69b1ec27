//! Interactive `dm>` command shell.

use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Result;
use dm_core::config::DmConfig;

use crate::{check, stats};

const PROMPT: &str = "dm> ";
const INTRO: &str = "Data Manager shell. Type help for the list of commands.";

const HELP: &[(&str, &str)] = &[
    ("greet [name]", "say hello"),
    ("stats [path]", "summarise the recordings in a directory"),
    ("check target", "verify the integrity of a recording"),
    ("help", "this list"),
    ("exit, quit", "leave the shell (also Ctrl-D)"),
];

/// Line-oriented shell over the `stats` and `check` commands.
pub struct Shell {
    config: DmConfig,
}

impl Shell {
    /// Shell using `config` for dataset defaults.
    #[must_use]
    pub fn new(config: DmConfig) -> Self {
        Self { config }
    }

    /// Read commands from `input` until `exit`, `quit` or end of input.
    ///
    /// # Errors
    /// Returns an error only if reading `input` or writing `out` fails;
    /// command failures are printed and the loop continues.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, out: &mut W) -> Result<()> {
        writeln!(out, "{INTRO}")?;
        let mut line = String::new();
        loop {
            write!(out, "{PROMPT}")?;
            out.flush()?;
            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }
            if self.onecmd(line.trim(), out)? {
                break;
            }
        }
        writeln!(out, "Done.")?;
        Ok(())
    }

    /// Execute one command line. Returns `true` when the shell should stop.
    ///
    /// # Errors
    /// Returns an error only if writing to `out` fails.
    pub fn onecmd<W: Write>(&self, line: &str, out: &mut W) -> Result<bool> {
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            return Ok(false);
        };
        let arg = words.collect::<Vec<_>>().join(" ");
        log::trace!("shell command {cmd:?} {arg:?}");

        let result = match cmd {
            "exit" | "quit" | "EOF" => return Ok(true),
            "help" | "?" => {
                for (usage, about) in HELP {
                    writeln!(out, "  {usage:<14} {about}")?;
                }
                Ok(())
            }
            "greet" => {
                if arg.is_empty() {
                    writeln!(out, "hi there!")?;
                } else {
                    writeln!(out, "hello {arg}")?;
                }
                Ok(())
            }
            "stats" => {
                let path = if arg.is_empty() { "." } else { arg.as_str() };
                stats::gather(Path::new(path), &self.config.dataset)
                    .and_then(|entries| Ok(stats::print_table(&entries, out)?))
            }
            "check" if arg.is_empty() => {
                writeln!(out, "usage: check target")?;
                Ok(())
            }
            "check" => check::check_target(Path::new(&arg), None, &self.config.dataset)
                .and_then(|report| Ok(report.print(out)?)),
            other => {
                writeln!(out, "*** Unknown syntax: {other}")?;
                Ok(())
            }
        };

        if let Err(e) = result {
            log::debug!("shell command {cmd} failed: {e:?}");
            writeln!(out, "error: {e:#}")?;
        }
        Ok(false)
    }
}
