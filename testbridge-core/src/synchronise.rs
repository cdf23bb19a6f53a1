//! High-level pipeline: ingest → normalize → filter → submit.
//!
//! This module wires the individual stages together for one configured run.
//! It implements a coordinated pipeline that:
//!   - Resolves the configured data path (file, directory or glob) and parses every match
//!   - Merges the parsed documents into one canonical [`Run`]
//!   - Drops cases a previous sync already uploaded (ignore list, watermark)
//!   - Submits the remaining cases through a [`TestOpsClient`] via [`Submitter`]
//!
//! # Major Types
//! - [`Prepared`]: everything known before the first remote call
//! - [`SyncReport`]: submission outcome plus everything collected on the way
//!
//! # Error Handling
//! Per-file parse failures and data-quality warnings are collected into the
//! report. Only an ingest that yields nothing, or a fatal submission error,
//! aborts the pipeline with a [`SyncError`].
//!
//! # Navigation
//! - Offline stages only: [`prepare`]
//! - Main entrypoint: [`synchronise`]

use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info};

use crate::config::SynchroniseConfig;
use crate::contract::TestOpsClient;
use crate::error::{IngestError, ParseError, SyncError};
use crate::events::ProgressSink;
use crate::filter;
use crate::ingest;
use crate::model::{Run, RunDocument, Warning};
use crate::normalize;
use crate::submission::{CancelSignal, SubmissionOutcome, Submitter};

/// Result of the offline stages.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub run: Run,
    pub documents: Vec<RunDocument>,
    pub parse_failures: Vec<ParseError>,
    pub warnings: Vec<Warning>,
    /// Cases removed by the incremental filter.
    pub filtered_out: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub outcome: SubmissionOutcome,
    #[serde(serialize_with = "display_all")]
    pub parse_failures: Vec<ParseError>,
    pub warnings: Vec<Warning>,
    pub filtered_out: usize,
}

fn display_all<S: serde::Serializer>(errors: &[ParseError], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(errors.iter().map(ToString::to_string))
}

/// Runs ingest, normalization and the incremental filter.
pub async fn prepare(config: &SynchroniseConfig) -> Result<Prepared, IngestError> {
    let report = ingest::parse_all(&config.ingest.data_path, config.ingest.concurrency).await?;
    info!(
        parsed = report.documents.len(),
        failed = report.failures.len(),
        "[SYNC] Ingest finished"
    );

    let normalized = normalize::merge(&report.documents, &config.run, &config.mapping);
    let mut warnings = normalized.warnings;
    info!(
        cases = normalized.run.len(),
        warnings = warnings.len(),
        "[SYNC] Normalized run"
    );

    let ignore: HashSet<String> = config.incremental.ignore.iter().cloned().collect();
    let filtered = filter::filter(
        normalized.run,
        &ignore,
        config.incremental.watermark.as_deref(),
    );
    warnings.extend(filtered.warnings);

    Ok(Prepared {
        run: filtered.run,
        documents: report.documents,
        parse_failures: report.failures,
        warnings,
        filtered_out: filtered.removed,
    })
}

/// Runs the whole pipeline for `config` against `client`.
pub async fn synchronise<C>(
    config: &SynchroniseConfig,
    client: &C,
    sink: &dyn ProgressSink,
    cancel: Option<CancelSignal>,
) -> Result<SyncReport, SyncError>
where
    C: TestOpsClient + ?Sized,
{
    info!("[SYNC] Starting synchronisation pipeline");

    let prepared = prepare(config).await.map_err(|e| {
        error!(error = %e, "[SYNC][ERROR] Ingest failed");
        SyncError::from(e)
    })?;

    let mut submitter = Submitter::new(client, &config.submission).with_sink(sink);
    if let Some(signal) = cancel {
        submitter = submitter.with_cancel(signal);
    }
    let outcome = submitter.submit(prepared.run).await?;

    info!(
        run_id = %outcome.run_id,
        succeeded = outcome.succeeded_count,
        failed = outcome.failed_count,
        parse_failures = prepared.parse_failures.len(),
        filtered_out = prepared.filtered_out,
        "[SYNC] Synchronisation complete"
    );

    Ok(SyncReport {
        outcome,
        parse_failures: prepared.parse_failures,
        warnings: prepared.warnings,
        filtered_out: prepared.filtered_out,
    })
}
