//! Incremental filtering: leave out cases a previous sync already uploaded.

use std::collections::HashSet;
use tracing::{info, warn};

use crate::model::{Run, Warning};

#[derive(Debug, Clone)]
pub struct Filtered {
    pub run: Run,
    /// Number of cases dropped by the ignore list and the watermark.
    pub removed: usize,
    pub warnings: Vec<Warning>,
}

/// Drops ignored cases, then cases at or before `watermark`.
///
/// The watermark only applies when it and every remaining case id are
/// unsigned integers; any other id makes the order unknown, in which case
/// all cases are kept and a [`Warning::WatermarkNotApplied`] is returned.
pub fn filter(run: Run, ignore: &HashSet<String>, watermark: Option<&str>) -> Filtered {
    let Run {
        name,
        project_key,
        source,
        case_results,
    } = run;
    let before = case_results.len();
    let mut warnings = Vec::new();

    let mut kept: Vec<_> = case_results
        .into_iter()
        .filter(|case| !ignore.contains(&case.external_id))
        .collect();
    let ignored = before - kept.len();

    if let Some(mark) = watermark {
        match watermark_order(mark, kept.iter().map(|c| c.external_id.as_str())) {
            Ok(limit) => {
                kept.retain(|case| {
                    case.external_id
                        .trim()
                        .parse::<u64>()
                        .map(|id| id > limit)
                        .unwrap_or(true)
                });
            }
            Err(reason) => {
                warn!(watermark = mark, reason = %reason, "[FILTER] Watermark not applied");
                warnings.push(Warning::WatermarkNotApplied {
                    watermark: mark.to_string(),
                    reason,
                });
            }
        }
    }

    let removed = before - kept.len();
    info!(
        before,
        ignored,
        below_watermark = removed - ignored,
        remaining = kept.len(),
        "[FILTER] Incremental filter applied"
    );

    Filtered {
        run: Run {
            name,
            project_key,
            source,
            case_results: kept,
        },
        removed,
        warnings,
    }
}

/// Numeric value of the watermark, if every id shares its total order.
fn watermark_order<'a>(mark: &str, mut ids: impl Iterator<Item = &'a str>) -> Result<u64, String> {
    let limit = mark
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("watermark {mark:?} is not numeric"))?;
    match ids.find(|id| id.trim().parse::<u64>().is_err()) {
        Some(id) => Err(format!("case id {id:?} is not numeric")),
        None => Ok(limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaseResult, CaseStatus};
    use std::collections::BTreeMap;

    fn run(ids: &[&str]) -> Run {
        Run {
            name: "r".into(),
            project_key: "P".into(),
            source: Run::DEFAULT_SOURCE.into(),
            case_results: ids
                .iter()
                .map(|id| CaseResult {
                    external_id: id.to_string(),
                    suite: "s".into(),
                    name: format!("case {id}"),
                    status: CaseStatus::Passed,
                    duration_ms: 0,
                    message: None,
                    stack_trace: None,
                    custom_fields: BTreeMap::new(),
                })
                .collect(),
        }
    }

    fn ids(filtered: &Filtered) -> Vec<&str> {
        filtered
            .run
            .case_results
            .iter()
            .map(|c| c.external_id.as_str())
            .collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ignore_list_removes_exactly_the_listed_ids() {
        let ignore = set(&["id1", "id2"]);
        for order in [
            vec!["id1", "a", "id2", "b", "c"],
            vec!["c", "b", "a", "id2", "id1"],
        ] {
            let filtered = filter(run(&order), &ignore, None);
            let expected: Vec<&str> = order
                .iter()
                .copied()
                .filter(|id| *id != "id1" && *id != "id2")
                .collect();
            assert_eq!(ids(&filtered), expected);
            assert_eq!(filtered.removed, 2);
            assert!(filtered.warnings.is_empty());
        }
    }

    #[test]
    fn numeric_watermark_drops_cases_at_or_before_it() {
        let filtered = filter(run(&["3", "10", "11", "7", "12"]), &HashSet::new(), Some("10"));
        assert_eq!(ids(&filtered), vec!["11", "12"]);
        assert_eq!(filtered.removed, 3);
    }

    #[test]
    fn non_numeric_ids_leave_the_run_untouched_and_warn() {
        let filtered = filter(run(&["1", "tb-abc", "5"]), &HashSet::new(), Some("2"));
        assert_eq!(ids(&filtered), vec!["1", "tb-abc", "5"]);
        assert!(matches!(
            filtered.warnings.as_slice(),
            [Warning::WatermarkNotApplied { watermark, .. }] if watermark == "2"
        ));

        let filtered = filter(run(&["1", "5"]), &HashSet::new(), Some("yesterday"));
        assert_eq!(ids(&filtered), vec!["1", "5"]);
        assert_eq!(filtered.warnings.len(), 1);
    }

    #[test]
    fn ignore_list_runs_before_watermark_check() {
        let filtered = filter(run(&["tb-x", "4", "9"]), &set(&["tb-x"]), Some("4"));
        assert_eq!(ids(&filtered), vec!["9"]);
        assert!(filtered.warnings.is_empty());
    }
}
