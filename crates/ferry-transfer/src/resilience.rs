//! Per-file retry control and the session-wide circuit breaker.
//!
//! Each fault is classified by [`decide`], a pure function of the fault, the
//! file's remaining budget, and the policy. The controller applies the
//! decision: it waits, retries, or skips the file. Every fault also counts
//! against the [`CircuitBreaker`], which is shared by all files of a session
//! and trips after a run of consecutive faults.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ferry_core::{ItemId, ProgressEvent, ProgressSink, RelayConfig, SkipReason};
use ferry_store::TransferFault;

// ─────────────────────────────────────────────────────────────────────────────
// Circuit breaker
// ─────────────────────────────────────────────────────────────────────────────

/// Counts consecutive faults across every file of a session.
///
/// Any success resets the count. Once the count reaches the threshold the
/// breaker stays open until reset.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            threshold: threshold.max(1),
        }
    }

    /// Record one fault. Returns the new consecutive count.
    pub fn record_fault(&self) -> u32 {
        self.consecutive.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.consecutive() >= self.threshold
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Close the breaker for a new session.
    pub fn reset(&self) {
        self.record_success();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy and classification
// ─────────────────────────────────────────────────────────────────────────────

/// Retry budget and wait times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Upper bound on a server-requested rate-limit wait.
    pub flood_wait_cap: Duration,
    pub stale_retry_delay: Duration,
    pub error_retry_delay: Duration,
}

impl From<&RelayConfig> for RetryPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            flood_wait_cap: config.flood_wait_cap,
            stale_retry_delay: config.stale_retry_delay,
            error_retry_delay: config.error_retry_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

/// Per-file retry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempts_remaining: u32,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts_remaining: policy.max_retries,
        }
    }
}

/// What to do after a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again.
    RetryAfter {
        wait: Duration,
        /// Whether this retry used up one unit of the budget.
        consumes_budget: bool,
    },
    /// Skip the file immediately; retrying cannot help.
    Abandon,
    /// Budget exhausted.
    GiveUp,
}

/// Classify a fault and update the retry budget.
///
/// Rate limiting never consumes budget. Resource exhaustion zeroes it.
pub fn decide(fault: &TransferFault, state: &mut RetryState, policy: &RetryPolicy) -> RetryDecision {
    match fault {
        TransferFault::RateLimited { seconds } => RetryDecision::RetryAfter {
            wait: Duration::from_secs(*seconds).min(policy.flood_wait_cap),
            consumes_budget: false,
        },
        TransferFault::ResourceExhausted(_) => {
            state.attempts_remaining = 0;
            RetryDecision::Abandon
        }
        TransferFault::StaleReference => consume(state, policy.stale_retry_delay),
        TransferFault::Other { .. } => consume(state, policy.error_retry_delay),
    }
}

fn consume(state: &mut RetryState, wait: Duration) -> RetryDecision {
    state.attempts_remaining = state.attempts_remaining.saturating_sub(1);
    if state.attempts_remaining == 0 {
        RetryDecision::GiveUp
    } else {
        RetryDecision::RetryAfter {
            wait,
            consumes_budget: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// One retryable unit of work, typically "stream this file to the
/// destination".
#[async_trait]
pub trait Attempt: Send {
    type Output: Send;

    /// Make one attempt. `number` starts at 1.
    async fn attempt(&mut self, number: u32) -> Result<Self::Output, TransferFault>;

    /// Name used in progress events.
    fn label(&self) -> String;
}

/// How one file's attempt loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome<T> {
    Succeeded(T),
    /// Budget exhausted; the session continues.
    Skipped(SkipReason),
    /// Not retryable; the session continues.
    FatallySkipped(SkipReason),
    /// The circuit breaker tripped; the session must stop.
    Halted,
}

/// Runs the attempt loop for one file.
pub struct TransferResilienceController<'a> {
    policy: RetryPolicy,
    breaker: &'a CircuitBreaker,
    progress: Arc<dyn ProgressSink>,
}

impl<'a> TransferResilienceController<'a> {
    pub fn new(
        policy: RetryPolicy,
        breaker: &'a CircuitBreaker,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            policy,
            breaker,
            progress,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt `work` until it succeeds, the budget runs out, or the breaker
    /// trips.
    pub async fn run<A: Attempt>(&self, item: ItemId, work: &mut A) -> FileOutcome<A::Output> {
        let mut state = RetryState::new(&self.policy);
        let mut number = 0u32;

        loop {
            number += 1;
            let label = work.label();
            self.report(ProgressEvent::AttemptStarted {
                item,
                file_name: label.clone(),
                attempt: number,
                max_attempts: self.policy.max_retries,
            })
            .await;

            let fault = match work.attempt(number).await {
                Ok(output) => {
                    self.breaker.record_success();
                    debug!(item = item.0, attempt = number, "attempt succeeded");
                    return FileOutcome::Succeeded(output);
                }
                Err(fault) => fault,
            };

            let consecutive = self.breaker.record_fault();
            warn!(
                item = item.0,
                file = %label,
                attempt = number,
                kind = fault.label(),
                error = %fault,
                consecutive,
                "attempt failed"
            );

            if self.breaker.is_open() {
                warn!(
                    item = item.0,
                    consecutive,
                    threshold = self.breaker.threshold(),
                    "circuit breaker open, halting session"
                );
                return FileOutcome::Halted;
            }

            match decide(&fault, &mut state, &self.policy) {
                RetryDecision::RetryAfter { wait, .. } => {
                    info!(
                        item = item.0,
                        wait_ms = wait.as_millis() as u64,
                        remaining = state.attempts_remaining,
                        "backing off"
                    );
                    self.report(ProgressEvent::Backoff {
                        item,
                        reason: fault.label().to_string(),
                        wait,
                    })
                    .await;
                    tokio::time::sleep(wait).await;
                }
                RetryDecision::Abandon => {
                    return FileOutcome::FatallySkipped(SkipReason::ResourceExhausted);
                }
                RetryDecision::GiveUp => {
                    return FileOutcome::Skipped(SkipReason::RetriesExhausted {
                        attempts: number,
                        last_error: fault.to_string(),
                    });
                }
            }
        }
    }

    async fn report(&self, event: ProgressEvent) {
        if let Err(e) = self.progress.report(event).await {
            debug!(error = %e, "progress update dropped");
        }
    }
}
