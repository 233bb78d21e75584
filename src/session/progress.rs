//! Frame bookkeeping over the driver's progress index.

/// Detects newly completed frames from successive progress readings.
///
/// Any change of index counts as progress, including the wrap back to 0 that the
/// driver performs at the end of each run-till-abort cycle. Repeated readings of the
/// same index never do, so each index is fetched at most once.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: u32,
}

impl ProgressTracker {
    /// Tracker for an acquisition that has not produced a frame yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading. Returns how many frames completed since the previous one.
    ///
    /// A reading below the previous one is a cycle reset: the counter restarted at 0, so
    /// `index + 1` frames completed. Only the most recent of them can still be fetched.
    pub fn observe(&mut self, index: u32) -> u32 {
        let advanced = if index >= self.last {
            index - self.last
        } else {
            index + 1
        };
        self.last = index;
        advanced
    }

    /// Last index observed.
    pub fn last_index(&self) -> u32 {
        self.last
    }
}
