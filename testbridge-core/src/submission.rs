//! Submission orchestrator: create run, upload results in batches, finalize.
//!
//! ```text
//! Idle -> RunCreating -> RunCreated -> Uploading -> Finalizing -> Done
//!              \________________________\-> Failed
//! ```
//!
//! The run is created empty before any result is attached, so a run exists
//! remotely even when the upload fails halfway; it is never rolled back.
//! Every remote call goes through the shared retry policy and races both the
//! overall deadline and the cancellation signal.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SubmissionConfig;
use crate::contract::{AckStatus, NewRun, RemoteRun, TestOpsClient};
use crate::error::{RemoteError, SubmissionError};
use crate::events::{NoopSink, Phase, ProgressSink, SubmissionEvent};
use crate::model::{CaseResult, Run};
use crate::retry::RetryPolicy;

static NOOP_SINK: NoopSink = NoopSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    RunCreating,
    RunCreated,
    Uploading,
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub case_external_id: String,
    pub reason: String,
    pub retriable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub create_run: Duration,
    pub upload: Duration,
    pub finalize: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub run_id: String,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub errors: Vec<FailureRecord>,
    /// Present when performance monitoring is enabled.
    pub timings: Option<PhaseTimings>,
}

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    /// Stops new remote calls. Calls already in flight are abandoned.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

enum Interrupt {
    Timeout,
    Cancelled,
}

/// Deadline and cancellation shared by every call of one submission.
struct Guard {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Option<CancelSignal>,
}

impl Guard {
    fn new(timeout: Option<Duration>, cancel: Option<CancelSignal>) -> Self {
        Self {
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        if self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(Interrupt::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupt::Timeout);
        }
        let mut cancel = self.cancel.clone();
        tokio::select! {
            out = fut => Ok(out),
            _ = until(self.deadline) => Err(Interrupt::Timeout),
            _ = cancelled(cancel.as_mut()) => Err(Interrupt::Cancelled),
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), Interrupt> {
        self.run(tokio::time::sleep(delay)).await
    }

    fn error(&self, interrupt: Interrupt, run_id: Option<&str>) -> SubmissionError {
        let run_id = run_id.map(str::to_string);
        match interrupt {
            Interrupt::Timeout => SubmissionError::TimeoutExceeded {
                timeout: self.timeout.unwrap_or_default(),
                run_id,
            },
            Interrupt::Cancelled => SubmissionError::Cancelled { run_id },
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(signal: Option<&mut CancelSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

/// A case that did not make it, with the error that stopped it.
struct CaseFailure {
    position: usize,
    external_id: String,
    error: RemoteError,
}

impl CaseFailure {
    fn record(&self) -> FailureRecord {
        FailureRecord {
            case_external_id: self.external_id.clone(),
            reason: self.error.to_string(),
            retriable: self.error.is_retryable(),
        }
    }
}

/// Drives one submission against a [`TestOpsClient`].
pub struct Submitter<'a, C: TestOpsClient + ?Sized> {
    client: &'a C,
    config: &'a SubmissionConfig,
    policy: RetryPolicy,
    sink: &'a dyn ProgressSink,
    cancel: Option<CancelSignal>,
    state: SubmissionState,
}

impl<'a, C: TestOpsClient + ?Sized> Submitter<'a, C> {
    pub fn new(client: &'a C, config: &'a SubmissionConfig) -> Self {
        Self {
            client,
            config,
            policy: config.retry_policy(),
            sink: &NOOP_SINK,
            cancel: None,
            state: SubmissionState::Idle,
        }
    }

    pub fn with_sink(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    /// Submits `run` and returns the aggregated outcome. Per-case failures are
    /// part of the outcome; run creation failure, strict mode, timeout and
    /// cancellation are errors.
    pub async fn submit(&mut self, run: Run) -> Result<SubmissionOutcome, SubmissionError> {
        let result = self.drive(run).await;
        self.state = match &result {
            Ok(_) => SubmissionState::Done,
            Err(e) => {
                error!(error = %e, run_id = e.run_id().unwrap_or("-"), "[SUBMIT] Submission failed");
                SubmissionState::Failed
            }
        };
        result
    }

    async fn drive(&mut self, run: Run) -> Result<SubmissionOutcome, SubmissionError> {
        let started = Instant::now();
        let guard = Guard::new(self.config.timeout(), self.cancel.clone());
        let total = run.len();

        info!(
            run_name = %run.name,
            project_key = %run.project_key,
            source = %run.source,
            total,
            "[SUBMIT] Starting submission"
        );
        self.sink.emit(SubmissionEvent::Started {
            run_name: run.name.clone(),
            total,
        });
        self.sink
            .emit(SubmissionEvent::progress(Phase::Starting, 0, total, "starting"));

        // --- Create the run ---
        self.state = SubmissionState::RunCreating;
        self.sink
            .emit(SubmissionEvent::progress(Phase::CreatingRun, 0, total, run.name.clone()));
        self.sink.emit(SubmissionEvent::BeforeRunCreated {
            name: run.name.clone(),
        });
        let remote_run = self.create_run(&run, &guard).await?;
        self.state = SubmissionState::RunCreated;
        info!(run_id = %remote_run.uid, "[SUBMIT] Run created");
        self.sink
            .emit(SubmissionEvent::AfterRunCreated(remote_run.clone()));
        let created_at = Instant::now();

        // --- Upload results ---
        self.state = SubmissionState::Uploading;
        let batch_size = self.config.effective_batch_size(total);
        let mut outcome = SubmissionOutcome {
            run_id: remote_run.uid.clone(),
            succeeded_count: 0,
            failed_count: 0,
            errors: Vec::new(),
            timings: None,
        };
        let mut current = 0;
        for (index, batch) in run.case_results.chunks(batch_size).enumerate() {
            let label = batch_label(index, batch);
            debug!(batch = index + 1, size = batch.len(), label = %label, "[SUBMIT] Uploading batch");
            let failures = self
                .upload_batch(&run.project_key, &remote_run, batch, &guard)
                .await?;

            if self.config.strict_mode {
                if let Some(first) = failures.into_iter().next() {
                    return Err(SubmissionError::Strict {
                        run_id: remote_run.uid.clone(),
                        case_external_id: first.external_id,
                        source: first.error,
                    });
                }
                outcome.succeeded_count += batch.len();
            } else {
                outcome.succeeded_count += batch.len() - failures.len();
                outcome.failed_count += failures.len();
                outcome.errors.extend(failures.iter().map(CaseFailure::record));
            }

            current += batch.len();
            self.sink
                .emit(SubmissionEvent::progress(Phase::Uploading, current, total, label));
        }
        let uploaded_at = Instant::now();

        // --- Finalize ---
        self.state = SubmissionState::Finalizing;
        self.sink
            .emit(SubmissionEvent::progress(Phase::Finalizing, total, total, "finalizing"));
        match guard
            .run(self.client.finalize_run(&run.project_key, &remote_run))
            .await
        {
            Ok(Ok(())) => debug!(run_id = %remote_run.uid, "[SUBMIT] Run finalized"),
            Ok(Err(e)) => warn!(run_id = %remote_run.uid, error = %e, "[SUBMIT] Finalizing run failed"),
            Err(interrupt) => return Err(guard.error(interrupt, Some(remote_run.uid.as_str()))),
        }
        let finished_at = Instant::now();

        if self.config.enable_performance_monitoring {
            let timings = PhaseTimings {
                create_run: created_at - started,
                upload: uploaded_at - created_at,
                finalize: finished_at - uploaded_at,
                total: finished_at - started,
            };
            info!(
                create_run_ms = timings.create_run.as_millis() as u64,
                upload_ms = timings.upload.as_millis() as u64,
                finalize_ms = timings.finalize.as_millis() as u64,
                total_ms = timings.total.as_millis() as u64,
                "[SUBMIT] Phase timings"
            );
            outcome.timings = Some(timings);
        }

        info!(
            run_id = %outcome.run_id,
            succeeded = outcome.succeeded_count,
            failed = outcome.failed_count,
            "[SUBMIT] Submission complete"
        );
        self.sink.emit(SubmissionEvent::Succeeded {
            run_id: outcome.run_id.clone(),
            succeeded: outcome.succeeded_count,
            failed: outcome.failed_count,
        });
        Ok(outcome)
    }

    async fn create_run(&self, run: &Run, guard: &Guard) -> Result<RemoteRun, SubmissionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = NewRun {
                name: run.name.clone(),
                case_uids: Vec::new(),
            };
            let result = guard
                .run(self.client.create_run(&run.project_key, request))
                .await
                .map_err(|i| guard.error(i, None))?;
            match result {
                Ok(remote_run) => return Ok(remote_run),
                Err(e) if e.is_retryable() && self.policy.allows_retry_after(attempt) => {
                    let delay = self.policy.backoff_for(attempt, &e);
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "[SUBMIT] Retrying run creation");
                    guard.sleep(delay).await.map_err(|i| guard.error(i, None))?;
                }
                Err(e) => {
                    return Err(SubmissionError::RunCreation {
                        name: run.name.clone(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Submits one batch, retrying the whole call on transient failure and
    /// re-sending only the cases that came back transient. Returns the
    /// failures in batch order. In strict mode the first attempt that records
    /// a failure ends the batch; pending retries are dropped.
    async fn upload_batch(
        &self,
        project_key: &str,
        remote_run: &RemoteRun,
        batch: &[CaseResult],
        guard: &Guard,
    ) -> Result<Vec<CaseFailure>, SubmissionError> {
        let interrupted = |i| guard.error(i, Some(remote_run.uid.as_str()));
        let mut pending: Vec<usize> = (0..batch.len()).collect();
        let mut failures: Vec<CaseFailure> = Vec::new();
        let mut attempt = 0;

        while !pending.is_empty() {
            attempt += 1;
            let can_retry = self.policy.allows_retry_after(attempt);
            let payload: Vec<CaseResult> = pending.iter().map(|&i| batch[i].clone()).collect();
            let result = guard
                .run(self.client.submit_results(project_key, remote_run, &payload))
                .await
                .map_err(interrupted)?;

            let retry: Vec<(usize, RemoteError)> = match result {
                Err(e) => pending.iter().map(|&i| (i, e.clone())).collect(),
                Ok(acks) => {
                    let by_id: HashMap<&str, &AckStatus> = acks
                        .iter()
                        .map(|ack| (ack.external_id.as_str(), &ack.status))
                        .collect();
                    let mut retry = Vec::new();
                    for &i in &pending {
                        let case = &batch[i];
                        match by_id.get(case.external_id.as_str()) {
                            Some(AckStatus::Accepted) => {}
                            Some(AckStatus::Failed(e)) => retry.push((i, e.clone())),
                            None => retry.push((
                                i,
                                RemoteError::transient("case not acknowledged by remote"),
                            )),
                        }
                    }
                    retry
                }
            };

            let mut next = Vec::new();
            let mut delay = Duration::ZERO;
            for (i, error) in retry {
                if error.is_retryable() && can_retry {
                    delay = delay.max(self.policy.backoff_for(attempt, &error));
                    next.push(i);
                } else {
                    warn!(
                        case = %batch[i].external_id,
                        attempt,
                        retriable = error.is_retryable(),
                        error = %error,
                        "[SUBMIT] Case failed"
                    );
                    failures.push(CaseFailure {
                        position: i,
                        external_id: batch[i].external_id.clone(),
                        error,
                    });
                }
            }

            if self.config.strict_mode && !failures.is_empty() {
                break;
            }
            if !next.is_empty() {
                warn!(attempt, cases = next.len(), delay_ms = delay.as_millis() as u64, "[SUBMIT] Retrying cases");
                guard.sleep(delay).await.map_err(interrupted)?;
            }
            pending = next;
        }

        failures.sort_by_key(|f| f.position);
        Ok(failures)
    }
}

/// Names the suites a batch covers, e.g. `api` or `api, ui (+2)`.
fn batch_label(index: usize, batch: &[CaseResult]) -> String {
    let mut suites: Vec<&str> = Vec::new();
    for case in batch {
        if !suites.contains(&case.suite.as_str()) {
            suites.push(&case.suite);
        }
    }
    match suites.as_slice() {
        [] => format!("batch {}", index + 1),
        [one] => (*one).to_string(),
        [a, b] => format!("{a}, {b}"),
        [a, b, rest @ ..] => format!("{a}, {b} (+{})", rest.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CaseStatus;
    use std::collections::BTreeMap;

    fn case(suite: &str, id: &str) -> CaseResult {
        CaseResult {
            external_id: id.into(),
            suite: suite.into(),
            name: id.into(),
            status: CaseStatus::Passed,
            duration_ms: 1,
            message: None,
            stack_trace: None,
            custom_fields: BTreeMap::new(),
        }
    }

    #[test]
    fn batch_label_summarises_suites() {
        assert_eq!(batch_label(0, &[]), "batch 1");
        assert_eq!(batch_label(0, &[case("api", "1"), case("api", "2")]), "api");
        assert_eq!(batch_label(0, &[case("api", "1"), case("ui", "2")]), "api, ui");
        assert_eq!(
            batch_label(
                0,
                &[case("a", "1"), case("b", "2"), case("c", "3"), case("d", "4")]
            ),
            "a, b (+2)"
        );
    }

    #[tokio::test]
    async fn cancel_signal_fires_after_cancel() {
        let (handle, signal) = cancellation();
        assert!(!signal.is_cancelled());
        handle.cancel();
        assert!(signal.is_cancelled());
        let mut waiting = signal.clone();
        waiting.cancelled().await;
    }
}
