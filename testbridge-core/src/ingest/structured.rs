//! Structured JSON result documents.
//!
//! Two shapes are accepted:
//!
//! ```json
//! {"suites": [{"name": "api", "cases": [{"name": "login", "status": "passed"}]}]}
//! {"results": [{"suite": "api", "name": "login", "status": "passed"}]}
//! ```
//!
//! Case keys: `id`, `name` (required), `status`, `duration_ms`, `duration`
//! (seconds), `message`, `stack_trace`, `fields`. Any structural problem
//! rejects the whole document.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::error::{ParseError, ParseErrorKind};
use crate::model::{CaseRecord, CaseStatus, FieldValue, RawDuration, RunDocument, SourceFormat, Suite};

/// Top-level keys that identify a structured document.
pub const SHAPE_KEYS: [&str; 2] = ["suites", "results"];

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    suites: Option<Vec<RawSuite>>,
    #[serde(default)]
    results: Option<Vec<RawCase>>,
}

#[derive(Debug, Deserialize)]
struct RawSuite {
    name: String,
    #[serde(default)]
    cases: Vec<RawCase>,
}

#[derive(Debug, Deserialize)]
struct RawCase {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    duration_ms: Option<Value>,
    #[serde(default)]
    duration: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "stackTrace")]
    stack_trace: Option<String>,
    #[serde(default)]
    suite: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

/// Whether `value` has the top-level shape of a structured document.
pub fn is_structured(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| SHAPE_KEYS.iter().any(|key| obj.contains_key(*key)))
}

pub fn parse(path: &Path, value: Value) -> Result<RunDocument, ParseError> {
    let invalid = |message: String| ParseError::new(path, ParseErrorKind::Validation, message);

    let raw_metadata = value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(key, _)| !SHAPE_KEYS.contains(&key.as_str()))
                .filter_map(|(key, v)| scalar_text(v).map(|text| (key.clone(), text)))
                .collect::<BTreeMap<_, _>>()
        })
        .ok_or_else(|| invalid("top level is not an object".to_string()))?;

    let raw: RawDocument =
        serde_json::from_value(value).map_err(|e| invalid(format!("unexpected document shape: {e}")))?;
    if raw.suites.is_none() && raw.results.is_none() {
        return Err(invalid("document has neither `suites` nor `results`".to_string()));
    }

    let mut suites: Vec<Suite> = Vec::new();
    for raw_suite in raw.suites.unwrap_or_default() {
        let mut cases = Vec::with_capacity(raw_suite.cases.len());
        for (index, raw_case) in raw_suite.cases.into_iter().enumerate() {
            cases.push(case_record(raw_case, &raw_suite.name, index).map_err(&invalid)?);
        }
        suites.push(Suite {
            name: raw_suite.name,
            cases,
        });
    }

    let fallback = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string());
    for (index, mut raw_case) in raw.results.unwrap_or_default().into_iter().enumerate() {
        let suite_name = raw_case.suite.take().unwrap_or_else(|| fallback.clone());
        let record = case_record(raw_case, &suite_name, index).map_err(&invalid)?;
        match suites.iter_mut().find(|s| s.name == suite_name) {
            Some(suite) => suite.cases.push(record),
            None => suites.push(Suite {
                name: suite_name,
                cases: vec![record],
            }),
        }
    }

    Ok(RunDocument {
        path: path.to_path_buf(),
        source_format: SourceFormat::Structured,
        suites,
        raw_metadata,
    })
}

fn case_record(raw: RawCase, suite: &str, index: usize) -> Result<CaseRecord, String> {
    let name = match raw.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Err(format!("case #{} in suite {suite} has no name", index + 1)),
    };

    let external_id = match raw.id {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => return Err(format!("case {name}: id {other} is not a string or number")),
    };

    let status = match raw.status.as_deref() {
        Some(word) => CaseStatus::from_vocabulary(word).unwrap_or_else(|| {
            warn!(case = %name, status = word, "unknown status, recording as error");
            CaseStatus::Error
        }),
        None => {
            warn!(case = %name, "missing status, recording as error");
            CaseStatus::Error
        }
    };

    let duration = match (raw.duration_ms, raw.duration) {
        (Some(ms), _) if !ms.is_null() => RawDuration::Millis(duration_text(&ms)),
        (_, Some(secs)) if !secs.is_null() => RawDuration::Seconds(duration_text(&secs)),
        _ => RawDuration::Absent,
    };

    let custom_fields = raw
        .fields
        .iter()
        .filter_map(|(key, v)| FieldValue::from_json(v).map(|fv| (key.clone(), fv)))
        .collect();

    Ok(CaseRecord {
        external_id,
        name,
        status,
        duration,
        message: raw.message,
        stack_trace: raw.stack_trace,
        custom_fields,
    })
}

fn duration_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
