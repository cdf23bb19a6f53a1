use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::model::Run;
use crate::retry::RetryPolicy;

/// Everything one synchronisation needs, as loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchroniseConfig {
    pub run: RunSpec,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub mapping: FieldMapping,
    #[serde(default)]
    pub incremental: IncrementalConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
}

impl SynchroniseConfig {
    pub fn trace_loaded(&self) {
        info!(
            project_key = %self.run.project_key,
            run_name = %self.run.name,
            data_path = %self.ingest.data_path,
            mapped_fields = self.mapping.len(),
            ignored = self.incremental.ignore.len(),
            watermark = self.incremental.watermark.as_deref().unwrap_or("-"),
            strict_mode = self.submission.strict_mode,
            "Loaded SynchroniseConfig"
        );
        debug!(?self, "SynchroniseConfig loaded (full debug)");
    }
}

/// Identity of the run to create remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub project_key: String,
    pub name: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    Run::DEFAULT_SOURCE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// File, directory or glob pattern.
    pub data_path: String,
    /// Upper bound on files parsed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

/// Target type of a retyped custom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    List,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Bool => "bool",
            FieldKind::List => "list",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<FieldKind>,
}

/// Custom field mapping table, keyed by source field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(pub BTreeMap<String, FieldRule>);

impl FieldMapping {
    pub fn get(&self, key: &str) -> Option<&FieldRule> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Previously migrated cases to leave out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncrementalConfig {
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Last successfully uploaded external id.
    #[serde(default)]
    pub watermark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Total attempts per remote call, the first one included.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Deadline for the whole submission. `None` waits forever.
    pub timeout_ms: Option<u64>,
    pub strict_mode: bool,
    /// Cases per `submit_results` call. Defaults to all cases at once, or one
    /// case per call in strict mode.
    pub batch_size: Option<usize>,
    pub enable_performance_monitoring: bool,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            timeout_ms: Some(300_000),
            strict_mode: false,
            batch_size: None,
            enable_performance_monitoring: false,
        }
    }
}

impl SubmissionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms.max(self.retry_delay_ms)),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Batch size actually used for a run of `total` cases. Never zero.
    pub fn effective_batch_size(&self, total: usize) -> usize {
        let size = match self.batch_size {
            Some(size) => size,
            None if self.strict_mode => 1,
            None => total,
        };
        size.max(1)
    }
}
