//! Progress events emitted during a submission.
//!
//! The orchestrator reports through a [`ProgressSink`]. Sinks only observe:
//! they cannot fail and cannot influence control flow.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::contract::RemoteRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Starting,
    CreatingRun,
    Uploading,
    Finalizing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionProgress {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionEvent {
    Started {
        run_name: String,
        total: usize,
    },
    Progress(SubmissionProgress),
    BeforeRunCreated {
        name: String,
    },
    AfterRunCreated(RemoteRun),
    Succeeded {
        run_id: String,
        succeeded: usize,
        failed: usize,
    },
}

impl SubmissionEvent {
    pub fn progress(phase: Phase, current: usize, total: usize, label: impl Into<String>) -> Self {
        SubmissionEvent::Progress(SubmissionProgress {
            phase,
            current,
            total,
            label: label.into(),
        })
    }
}

/// Receiver of submission events. Every method has a no-op default.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, _event: SubmissionEvent) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SubmissionEvent>,
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: SubmissionEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("progress receiver dropped, event discarded");
        }
    }
}

/// Creates a channel-backed sink and its receiving end.
pub fn channel() -> (ChannelSink, mpsc::UnboundedReceiver<SubmissionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, rx)
}

/// Drains everything currently buffered in `rx`.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<SubmissionEvent>) -> Vec<SubmissionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
