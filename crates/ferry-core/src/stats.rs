//! Session counters and the end-of-run summary.

use std::time::{Duration, Instant};

/// Why a session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The requested range was exhausted.
    Completed,
    /// An external stop request was observed.
    Stopped,
    /// The consecutive-error threshold was reached.
    CircuitOpen,
}

/// Running counters owned by the orchestrator for one session.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub processed: u64,
    pub skipped: u64,
    pub total_bytes: u64,
    pub started_at: Instant,
}

impl TransferStats {
    pub fn start() -> Self {
        Self {
            processed: 0,
            skipped: 0,
            total_bytes: 0,
            started_at: Instant::now(),
        }
    }

    pub fn record_success(&mut self, bytes: u64) {
        self.processed += 1;
        self.total_bytes += bytes;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn summarize(&self, halt: HaltReason) -> TransferSummary {
        TransferSummary::new(
            self.processed,
            self.skipped,
            self.total_bytes,
            self.started_at.elapsed(),
            halt,
        )
    }
}

/// Report produced once a session ends, for any reason.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub processed: u64,
    pub skipped: u64,
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub average_bytes_per_sec: u64,
    pub halt: HaltReason,
}

impl TransferSummary {
    pub fn new(
        processed: u64,
        skipped: u64,
        total_bytes: u64,
        elapsed: Duration,
        halt: HaltReason,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let average_bytes_per_sec = if secs > 0.0 {
            (total_bytes as f64 / secs) as u64
        } else {
            0
        };
        Self {
            processed,
            skipped,
            total_bytes,
            elapsed,
            average_bytes_per_sec,
            halt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_average() {
        let summary = TransferSummary::new(3, 1, 3000, Duration::from_secs(3), HaltReason::Completed);
        assert_eq!(summary.average_bytes_per_sec, 1000);
    }

    #[test]
    fn test_counters() {
        let mut stats = TransferStats::start();
        stats.record_success(10);
        stats.record_success(5);
        stats.record_skip();
        let summary = stats.summarize(HaltReason::Stopped);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_bytes, 15);
        assert_eq!(summary.halt, HaltReason::Stopped);
    }
}
