//! Canonical data model shared by every pipeline stage.
//!
//! Parsers produce [`RunDocument`]s made of [`Suite`]s and source-level
//! [`CaseRecord`]s. The normaliser turns those into a single [`Run`] of
//! [`CaseResult`]s, which is what gets submitted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Which parser produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceFormat {
    Structured,
    JunitXml,
}

impl SourceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Structured => "structured",
            SourceFormat::JunitXml => "junit-xml",
        }
    }
}

/// Canonical case status.
///
/// The variant order doubles as marker precedence: when a source reports more
/// than one terminal marker for a case, the greatest one wins
/// (error > failure > skipped > passed).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Skipped,
    Failed,
    Error,
}

impl CaseStatus {
    /// Resolves runner vocabulary into a canonical status. Returns `None` for
    /// words we do not recognise; callers map those to [`CaseStatus::Error`].
    pub fn from_vocabulary(raw: &str) -> Option<CaseStatus> {
        let status = match raw.trim().to_ascii_lowercase().as_str() {
            "passed" | "pass" | "success" | "succeeded" | "ok" => CaseStatus::Passed,
            "failed" | "fail" | "failure" => CaseStatus::Failed,
            "skipped" | "skip" | "pending" | "ignored" | "disabled" | "todo" => {
                CaseStatus::Skipped
            }
            "error" | "errored" | "broken" => CaseStatus::Error,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Passed => "passed",
            CaseStatus::Skipped => "skipped",
            CaseStatus::Failed => "failed",
            CaseStatus::Error => "error",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A custom field value: a scalar or a list of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Converts a JSON value. Nested objects and nulls have no field
    /// representation and yield `None`; array members are stringified.
    pub fn from_json(value: &serde_json::Value) -> Option<FieldValue> {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(FieldValue::Number),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Array(items) => Some(FieldValue::List(
                items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Text rendering used when a field is retyped to a string.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::List(items) => items.join(","),
        }
    }
}

/// Duration exactly as the source expressed it. Coercion into milliseconds
/// happens in the normaliser.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawDuration {
    #[default]
    Absent,
    /// Seconds, e.g. a JUnit `time="0.125"` attribute.
    Seconds(String),
    Millis(String),
}

/// One test case as it appeared in a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRecord {
    pub external_id: Option<String>,
    pub name: String,
    pub status: CaseStatus,
    pub duration: RawDuration,
    pub message: Option<String>,
    pub stack_trace: Option<String>,
    pub custom_fields: BTreeMap<String, FieldValue>,
}

impl CaseRecord {
    pub fn new(name: impl Into<String>, status: CaseStatus) -> Self {
        Self {
            external_id: None,
            name: name.into(),
            status,
            duration: RawDuration::Absent,
            message: None,
            stack_trace: None,
            custom_fields: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suite {
    pub name: String,
    pub cases: Vec<CaseRecord>,
}

/// One parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDocument {
    pub path: PathBuf,
    pub source_format: SourceFormat,
    pub suites: Vec<Suite>,
    pub raw_metadata: BTreeMap<String, String>,
}

impl RunDocument {
    pub fn case_count(&self) -> usize {
        self.suites.iter().map(|s| s.cases.len()).sum()
    }
}

/// A canonical, submittable test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub external_id: String,
    pub suite: String,
    pub name: String,
    pub status: CaseStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, FieldValue>,
}

/// The merged run handed to the submission orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub name: String,
    pub project_key: String,
    pub source: String,
    pub case_results: Vec<CaseResult>,
}

impl Run {
    pub const DEFAULT_SOURCE: &'static str = "junit-xml";

    pub fn len(&self) -> usize {
        self.case_results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.case_results.is_empty()
    }

    /// Number of cases per canonical status, in status order.
    pub fn status_counts(&self) -> BTreeMap<CaseStatus, usize> {
        let mut counts = BTreeMap::new();
        for case in &self.case_results {
            *counts.entry(case.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Non-fatal data-quality findings collected while preparing a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    InvalidDuration {
        case: String,
        raw: String,
    },
    FieldRetype {
        case: String,
        field: String,
        target: String,
    },
    WatermarkNotApplied {
        watermark: String,
        reason: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::InvalidDuration { case, raw } => {
                write!(f, "case {case}: duration {raw:?} is invalid, using 0ms")
            }
            Warning::FieldRetype {
                case,
                field,
                target,
            } => write!(
                f,
                "case {case}: field {field} cannot be converted to {target}, kept as is"
            ),
            Warning::WatermarkNotApplied { watermark, reason } => write!(
                f,
                "watermark {watermark} was not applied ({reason}); all cases are kept"
            ),
        }
    }
}
