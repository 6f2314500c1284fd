//! Sweep completion detection.
//!
//! After `:INIT` the operation condition register is polled until the
//! completion criterion holds. Status queries that collide with the end of a
//! sweep fail intermittently, so failed polls are classified: transient
//! failures wait for the backoff and retry, permanent ones end the sweep.
//! The whole wait is bounded by a deadline and can be cancelled through an
//! [`AbortHandle`].
//!
//! ```text
//!  Armed ──baseline──▶ Polling ──criterion met──▶ Done
//!                       │  ▲
//!                       └──┘ pending / transient failure
//! ```

use crate::commands::STATUS_QUERY;
use pv_core::{
    CommandChannel, CommunicationError, CommunicationErrorKind, CompletionConfig, CompletionMode,
    SweepError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for timeouts too long to represent (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Bit 10 of the operation condition register: the instrument is idle.
pub const OPERATION_IDLE: u32 = 1 << 10;

/// One reply to the status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentStatus {
    raw: String,
}

impl InstrumentStatus {
    /// Wrap a status reply.
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into().trim().to_string(),
        }
    }

    /// Reply text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Reply decoded as a register value (`"1024"`, `"+1.024000E+03"`).
    pub fn register(&self) -> Option<u32> {
        if let Ok(value) = self.raw.trim_start_matches('+').parse::<u32>() {
            return Some(value);
        }
        let value = self.raw.parse::<f64>().ok()?;
        if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
            Some(value as u32)
        } else {
            None
        }
    }
}

/// When a status reply means the acquisition is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCriterion {
    /// Any reply that differs from the baseline read right after `:INIT`.
    StatusChanged,
    /// All given register bits are set.
    MaskSet(u32),
}

impl Default for CompletionCriterion {
    fn default() -> Self {
        CompletionCriterion::MaskSet(OPERATION_IDLE)
    }
}

impl CompletionCriterion {
    /// Evaluate a status reply against the baseline.
    ///
    /// For `MaskSet` an unparseable reply is an error message, not a verdict.
    pub fn evaluate(
        &self,
        baseline: &InstrumentStatus,
        status: &InstrumentStatus,
    ) -> Result<bool, String> {
        match self {
            CompletionCriterion::StatusChanged => Ok(status != baseline),
            CompletionCriterion::MaskSet(mask) => status
                .register()
                .map(|register| register & mask == *mask)
                .ok_or_else(|| format!("status reply '{}' is not a register value", status.raw())),
        }
    }
}

/// Bounds and criterion of the completion wait.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    /// Deadline measured from `:INIT`.
    pub timeout: Duration,
    /// Wait after a transient status failure.
    pub backoff: Duration,
    /// Completion criterion.
    pub criterion: CompletionCriterion,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self::from(&CompletionConfig::default())
    }
}

impl From<&CompletionConfig> for CompletionSettings {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            timeout: Duration::try_from_secs_f64(config.timeout_s.max(0.0))
                .unwrap_or(FAR_FUTURE),
            backoff: Duration::from_millis(config.backoff_ms),
            criterion: match config.mode {
                CompletionMode::IdleBit => CompletionCriterion::MaskSet(config.idle_mask),
                CompletionMode::StatusChanged => CompletionCriterion::StatusChanged,
            },
        }
    }
}

/// Cancels a running acquisition from another task.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create an un-triggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a consumed request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Classification of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Criterion met.
    Complete(InstrumentStatus),
    /// Reply received, criterion not met.
    Pending(InstrumentStatus),
    /// Query failed in a way that may clear on retry.
    TransientFailure(CommunicationError),
    /// Query failed permanently.
    FatalFailure(CommunicationError),
}

impl PollOutcome {
    /// Classify the result of one status query.
    pub fn classify(
        reply: Result<String, CommunicationError>,
        baseline: &InstrumentStatus,
        criterion: CompletionCriterion,
    ) -> Self {
        match reply {
            Ok(raw) => {
                let status = InstrumentStatus::new(raw);
                match criterion.evaluate(baseline, &status) {
                    Ok(true) => PollOutcome::Complete(status),
                    Ok(false) => PollOutcome::Pending(status),
                    Err(message) => PollOutcome::TransientFailure(CommunicationError::new(
                        CommunicationErrorKind::Protocol,
                        STATUS_QUERY,
                        message,
                    )),
                }
            }
            Err(err) if err.is_transient() => PollOutcome::TransientFailure(err),
            Err(err) => PollOutcome::FatalFailure(err),
        }
    }
}

/// Summary of a finished wait.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    /// Status that satisfied the criterion.
    pub status: InstrumentStatus,
    /// Status queries issued, baseline included.
    pub polls: u64,
    /// Failed queries that were retried.
    pub transient_failures: u64,
    /// Time from arming to completion.
    pub elapsed: Duration,
}

/// Runs the completion state machine against a channel.
#[derive(Debug)]
pub struct CompletionPoller<'a> {
    settings: &'a CompletionSettings,
    abort: &'a AbortHandle,
}

impl<'a> CompletionPoller<'a> {
    /// Poller bound to the given settings and abort handle.
    pub fn new(settings: &'a CompletionSettings, abort: &'a AbortHandle) -> Self {
        Self { settings, abort }
    }

    /// Wait for the acquisition started by `:INIT` to finish.
    pub async fn wait<C>(&self, channel: &mut C) -> Result<CompletionReport, SweepError>
    where
        C: CommandChannel + ?Sized,
    {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.settings.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut polls = 0u64;
        let mut transient_failures = 0u64;

        let baseline = loop {
            self.check_bounds(started, deadline, polls)?;
            polls += 1;
            match self.query_status(channel, started, deadline, polls).await? {
                Ok(raw) => break InstrumentStatus::new(raw),
                Err(err) if err.is_transient() => {
                    transient_failures += 1;
                    tracing::warn!(error = %err, "baseline status query failed, retrying");
                    self.back_off(deadline).await;
                }
                Err(err) => return Err(err.into()),
            }
        };
        tracing::debug!(status = %baseline.raw(), "armed");

        loop {
            self.check_bounds(started, deadline, polls)?;
            polls += 1;
            let reply = self.query_status(channel, started, deadline, polls).await?;
            match PollOutcome::classify(reply, &baseline, self.settings.criterion) {
                PollOutcome::Complete(status) => {
                    let report = CompletionReport {
                        status,
                        polls,
                        transient_failures,
                        elapsed: started.elapsed(),
                    };
                    tracing::debug!(?report, "acquisition complete");
                    return Ok(report);
                }
                PollOutcome::Pending(_) => tokio::task::yield_now().await,
                PollOutcome::TransientFailure(err) => {
                    transient_failures += 1;
                    tracing::warn!(error = %err, polls, "status query failed, retrying");
                    self.back_off(deadline).await;
                }
                PollOutcome::FatalFailure(err) => return Err(err.into()),
            }
        }
    }

    fn check_bounds(
        &self,
        started: Instant,
        deadline: Instant,
        polls: u64,
    ) -> Result<(), SweepError> {
        if self.abort.is_aborted() {
            return Err(SweepError::Aborted);
        }
        if Instant::now() >= deadline {
            return Err(SweepError::Timeout {
                elapsed: started.elapsed(),
                polls,
            });
        }
        Ok(())
    }

    /// One status query, cut short by the deadline.
    async fn query_status<C>(
        &self,
        channel: &mut C,
        started: Instant,
        deadline: Instant,
        polls: u64,
    ) -> Result<Result<String, CommunicationError>, SweepError>
    where
        C: CommandChannel + ?Sized,
    {
        tokio::time::timeout_at(deadline, channel.query(STATUS_QUERY))
            .await
            .map_err(|_| SweepError::Timeout {
                elapsed: started.elapsed(),
                polls,
            })
    }

    async fn back_off(&self, deadline: Instant) {
        let wake = Instant::now()
            .checked_add(self.settings.backoff)
            .map_or(deadline, |wake| wake.min(deadline));
        tokio::time::sleep_until(wake).await;
    }
}
