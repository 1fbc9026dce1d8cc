//! Runtime statistics (spec §4.L): a handful of lock-free counters that
//! are always updated (the fetch_add cost is not worth a cfg switch) but
//! only ever reported when `CRT_STATS` is set. Grounded on
//! `examples/original_source/src/hcpp-runtime.cpp`'s `print_stats`, which
//! emits the same four fields in the same order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Default)]
pub struct Stats {
    pub push_out_deq: AtomicU64,
    pub push_in_deq: AtomicU64,
    pub steals_in_deq: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders the fixed `CRT_STATS` report: a header line naming the
    /// fields, then elapsed milliseconds and the three counters,
    /// tab-separated -- matching the original's two `printf`s
    /// (`hcpp-runtime.cpp`'s header line followed by the `%.3f`-millisecond
    /// values line) so downstream scripts parsing it don't need to change.
    pub fn report(&self, start: Instant) -> String {
        let millis = start.elapsed().as_secs_f64() * 1000.0;
        format!(
            "time.mu\ttotalPushOutDeq\ttotalPushInDeq\ttotalStealsInDeq\n{:.3}\t{}\t{}\t{}",
            millis,
            self.push_out_deq.load(Ordering::Relaxed),
            self.push_in_deq.load(Ordering::Relaxed),
            self.steals_in_deq.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering::Relaxed;

    #[test]
    fn report_reflects_counters() {
        let stats = Stats::new();
        stats.push_out_deq.fetch_add(3, Relaxed);
        stats.push_in_deq.fetch_add(5, Relaxed);
        stats.steals_in_deq.fetch_add(2, Relaxed);

        let report = stats.report(Instant::now());
        let mut lines = report.lines();
        assert_eq!(
            lines.next().unwrap(),
            "time.mu\ttotalPushOutDeq\ttotalPushInDeq\ttotalStealsInDeq"
        );

        let fields: Vec<&str> = lines.next().unwrap().split('\t').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[1], "3");
        assert_eq!(fields[2], "5");
        assert_eq!(fields[3], "2");
        assert!(lines.next().is_none());
    }

    #[test]
    fn steals_never_exceed_pushes_in_well_behaved_run() {
        let stats = Stats::new();
        stats.push_in_deq.fetch_add(10, Relaxed);
        stats.steals_in_deq.fetch_add(4, Relaxed);
        assert!(stats.steals_in_deq.load(Relaxed) <= stats.push_in_deq.load(Relaxed));
    }
}
