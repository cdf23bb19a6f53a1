//! Merges parsed documents into one canonical [`Run`].

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::config::{FieldKind, FieldMapping, RunSpec};
use crate::model::{CaseRecord, CaseResult, FieldValue, RawDuration, Run, RunDocument, Warning};

/// Prefix of ids computed from suite and case names.
pub const DERIVED_ID_PREFIX: &str = "tb-";

#[derive(Debug, Clone)]
pub struct Normalized {
    pub run: Run,
    pub warnings: Vec<Warning>,
}

/// Concatenates every case of every document, first document first, suites
/// and cases in source order.
pub fn merge(documents: &[RunDocument], spec: &RunSpec, mapping: &FieldMapping) -> Normalized {
    let mut warnings = Vec::new();
    let mut case_results = Vec::with_capacity(documents.iter().map(RunDocument::case_count).sum());
    let mut seen = HashSet::new();

    for document in documents {
        debug!(path = %document.path.display(), cases = document.case_count(), "merging document");
        for suite in &document.suites {
            for record in &suite.cases {
                let case = canonical_case(&suite.name, record, mapping, &mut warnings);
                if !seen.insert(case.external_id.clone()) {
                    warn!(
                        external_id = %case.external_id,
                        suite = %case.suite,
                        case = %case.name,
                        "duplicate case id in run"
                    );
                }
                case_results.push(case);
            }
        }
    }

    Normalized {
        run: Run {
            name: spec.name.clone(),
            project_key: spec.project_key.clone(),
            source: spec.source.clone(),
            case_results,
        },
        warnings,
    }
}

fn canonical_case(
    suite: &str,
    record: &CaseRecord,
    mapping: &FieldMapping,
    warnings: &mut Vec<Warning>,
) -> CaseResult {
    let external_id = record
        .external_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| derive_external_id(suite, &record.name));

    let duration_ms = match coerce_duration(&record.duration) {
        Ok(ms) => ms,
        Err(raw) => {
            warn!(case = %record.name, raw = %raw, "invalid duration, using 0ms");
            warnings.push(Warning::InvalidDuration {
                case: external_id.clone(),
                raw,
            });
            0
        }
    };

    let custom_fields = map_fields(&record.custom_fields, mapping, &external_id, warnings);

    CaseResult {
        external_id,
        suite: suite.to_string(),
        name: record.name.clone(),
        status: record.status,
        duration_ms,
        message: record.message.clone(),
        stack_trace: record.stack_trace.clone(),
        custom_fields,
    }
}

/// Stable id for a case without a native one: `tb-` followed by the first
/// 16 hex digits of SHA-256 over `suite \0 name`.
pub fn derive_external_id(suite: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(suite.as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{DERIVED_ID_PREFIX}{}", &digest[..16])
}

/// Converts a source duration into whole milliseconds, rounding half away
/// from zero. Returns the raw text when it is negative or not a number.
pub fn coerce_duration(raw: &RawDuration) -> Result<u64, String> {
    let (text, scale) = match raw {
        RawDuration::Absent => return Ok(0),
        RawDuration::Seconds(text) => (text, 1000.0),
        RawDuration::Millis(text) => (text, 1.0),
    };
    let value: f64 = text.trim().parse().map_err(|_| text.clone())?;
    let ms = (value * scale).round();
    if !ms.is_finite() || ms < 0.0 || ms > u64::MAX as f64 {
        return Err(text.clone());
    }
    Ok(ms as u64)
}

fn map_fields(
    fields: &BTreeMap<String, FieldValue>,
    mapping: &FieldMapping,
    case: &str,
    warnings: &mut Vec<Warning>,
) -> BTreeMap<String, FieldValue> {
    let mut mapped = BTreeMap::new();
    for (key, value) in fields {
        let Some(rule) = mapping.get(key) else {
            mapped.insert(key.clone(), value.clone());
            continue;
        };
        let target = rule.rename.clone().unwrap_or_else(|| key.clone());
        let value = match rule.kind {
            None => value.clone(),
            Some(kind) => retype(value, kind).unwrap_or_else(|| {
                warnings.push(Warning::FieldRetype {
                    case: case.to_string(),
                    field: key.clone(),
                    target: kind.as_str().to_string(),
                });
                value.clone()
            }),
        };
        mapped.insert(target, value);
    }
    mapped
}

fn retype(value: &FieldValue, kind: FieldKind) -> Option<FieldValue> {
    match (kind, value) {
        (FieldKind::String, v) => Some(FieldValue::Text(v.render())),
        (FieldKind::Number, FieldValue::Number(n)) => Some(FieldValue::Number(*n)),
        (FieldKind::Number, FieldValue::Text(s)) => s.trim().parse().ok().map(FieldValue::Number),
        (FieldKind::Number, _) => None,
        (FieldKind::Bool, FieldValue::Bool(b)) => Some(FieldValue::Bool(*b)),
        (FieldKind::Bool, FieldValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(FieldValue::Bool(true)),
            "false" | "no" | "0" => Some(FieldValue::Bool(false)),
            _ => None,
        },
        (FieldKind::Bool, FieldValue::Number(n)) if *n == 0.0 || *n == 1.0 => {
            Some(FieldValue::Bool(*n == 1.0))
        }
        (FieldKind::Bool, _) => None,
        (FieldKind::List, FieldValue::List(items)) => Some(FieldValue::List(items.clone())),
        (FieldKind::List, FieldValue::Text(s)) => Some(FieldValue::List(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        (FieldKind::List, v) => Some(FieldValue::List(vec![v.render()])),
    }
}
