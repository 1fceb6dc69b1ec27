use std::path::{Path, PathBuf};

use dm_core::config::{Precision, ReferenceConfig};

use crate::error::RefError;

/// Parameters shared by reference creation and subtraction.
#[derive(Clone, Debug, PartialEq)]
pub struct RefOptions {
    /// Channels per row of the `.dat` file.
    pub n_channels: usize,
    /// Channels to average. `None` means all channels not listed in `bad`.
    pub good: Option<Vec<usize>>,
    /// Channels excluded from the mean (and zeroed with `zero_bad`).
    pub bad: Vec<usize>,
    /// Set bad channels to zero in the output.
    pub zero_bad: bool,
    /// Overwrite the input instead of writing `<stem>_meanref<ext>`.
    pub inplace: bool,
    /// Keep a reference file created during [`crate::reference`].
    pub keep: bool,
    /// Value type of the reference file.
    pub precision: Precision,
    /// Directory for the reference file (defaults to the input's directory).
    pub out_dir: Option<PathBuf>,
    /// Upper bound on `.dat` bytes held per batch.
    pub batch_bytes: usize,
}

impl RefOptions {
    /// Options for `n_channels` channels, with precision, batching and keep
    /// taken from `config`.
    #[must_use]
    pub fn new(n_channels: usize, config: &ReferenceConfig) -> Self {
        Self {
            n_channels,
            good: None,
            bad: Vec::new(),
            zero_bad: false,
            inplace: false,
            keep: config.keep,
            precision: config.precision,
            out_dir: None,
            batch_bytes: config.batch_bytes,
        }
    }

    /// Channels entering the mean, ascending and deduplicated.
    ///
    /// # Errors
    /// `ExclusiveSelection`, `ChannelOutOfRange` or `NoChannels`.
    pub fn selected_channels(&self) -> Result<Vec<usize>, RefError> {
        if self.good.is_some() && !self.bad.is_empty() {
            return Err(RefError::ExclusiveSelection);
        }
        self.check_range(self.good.iter().flatten().chain(&self.bad))?;

        let mut selected: Vec<usize> = match &self.good {
            Some(good) => good.clone(),
            None => (0..self.n_channels)
                .filter(|c| !self.bad.contains(c))
                .collect(),
        };
        selected.sort_unstable();
        selected.dedup();
        if selected.is_empty() {
            return Err(RefError::NoChannels);
        }
        Ok(selected)
    }

    fn check_range<'a>(&self, indices: impl IntoIterator<Item = &'a usize>) -> Result<(), RefError> {
        match indices.into_iter().find(|&&i| i >= self.n_channels) {
            Some(&index) => Err(RefError::ChannelOutOfRange {
                index,
                n_channels: self.n_channels,
            }),
            None => Ok(()),
        }
    }
}

/// `dir/<stem><suffix><ext>`, where `dir` defaults to the parent of `path`.
fn sibling(path: &Path, suffix: &str, dir: Option<&Path>) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    match dir.or_else(|| path.parent()) {
        Some(d) => d.join(name),
        None => PathBuf::from(name),
    }
}

/// Where the reference of `dat` is written.
///
/// # Example
/// ```
/// use std::path::Path;
/// use dm_ref::options::reference_path;
/// assert_eq!(reference_path(Path::new("d/rec.dat"), None), Path::new("d/rec_reference.dat"));
/// assert_eq!(
///     reference_path(Path::new("d/rec.dat"), Some(Path::new("out"))),
///     Path::new("out/rec_reference.dat")
/// );
/// ```
#[must_use]
pub fn reference_path(dat: &Path, out_dir: Option<&Path>) -> PathBuf {
    sibling(dat, "_reference", out_dir)
}

/// Where the referenced copy of `dat` is written.
#[must_use]
pub fn meanref_path(dat: &Path) -> PathBuf {
    sibling(dat, "_meanref", None)
}
