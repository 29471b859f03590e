use log::info;

/// Logs the number of finished jobs, densely at first and more sparsely as the count grows.
pub(crate) struct Progress {
    label: String,
    total: u64,
    done: u64,
}

/// Distance between two reports at the given count.
fn report_interval(done: u64) -> u64 {
    match done {
        0..100 => 1,
        100..1_000 => 25,
        1_000..10_000 => 100,
        _ => 1_000,
    }
}

fn is_reported(done: u64) -> bool {
    done % report_interval(done) == 0
}

impl Progress {
    pub(crate) fn new(label: String, total: u64) -> Self {
        info!("{label}: {total} tiles to check");
        Self {
            label,
            total,
            done: 0,
        }
    }

    /// Adds finished jobs. Returns whether a report has been logged.
    pub(crate) fn advance(&mut self, jobs: u64) -> bool {
        let previous = self.done;
        self.done = self.done.saturating_add(jobs);
        let report = jobs > 0
            && (self.done >= self.total || (previous + 1..=self.done).any(is_reported));
        if report {
            info!("{}: {} of {} tiles checked", self.label, self.done, self.total);
        }
        report
    }

    #[cfg(test)]
    pub(crate) fn done(&self) -> u64 {
        self.done
    }
}
