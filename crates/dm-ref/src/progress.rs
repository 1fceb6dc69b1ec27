/// Batch progress reported through `log`: every batch at debug level, every
/// tenth of the work at info level.
pub struct Progress {
    label: &'static str,
    total: usize,
    done: usize,
    last_decile: usize,
}

impl Progress {
    /// Progress over `total` batches.
    #[must_use]
    pub fn new(label: &'static str, total: usize) -> Self {
        Self {
            label,
            total,
            done: 0,
            last_decile: 0,
        }
    }

    /// Record the batch `start..end` as finished. Returns the percentage when
    /// a new tenth was reached.
    pub fn advance(&mut self, start: usize, end: usize) -> Option<usize> {
        self.done += 1;
        log::debug!("{}: rows {start}..{end}", self.label);
        let decile = self.done * 10 / self.total.max(1);
        if decile > self.last_decile {
            self.last_decile = decile;
            let percent = decile * 10;
            log::info!("{}: {percent}%", self.label);
            Some(percent)
        } else {
            None
        }
    }
}
