//! Format detection, glob expansion and parallel parsing of result files.

pub mod junit;
pub mod structured;

use futures::stream::{self, StreamExt};
use globset::GlobBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IngestError, ParseError, ParseErrorKind};
use crate::model::RunDocument;

/// Extensions picked up when the data path is a directory.
const REPORT_EXTENSIONS: [&str; 2] = ["xml", "json"];

/// Documents that parsed, next to the files that did not.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub documents: Vec<RunDocument>,
    pub failures: Vec<ParseError>,
}

/// Reads and parses a single file.
pub fn parse_file(path: &Path) -> Result<RunDocument, ParseError> {
    let bytes = fs::read(path).map_err(|e| ParseError::new(path, ParseErrorKind::Io, e.to_string()))?;
    let content = String::from_utf8(bytes).map_err(|e| {
        let offset = e.utf8_error().valid_up_to() as u64;
        ParseError::new(path, ParseErrorKind::UnsupportedFormat, "content is not valid UTF-8")
            .at_offset(offset)
    })?;
    parse_content(path, &content)
}

/// Detects the format of `content` and parses it.
pub fn parse_content(path: &Path, content: &str) -> Result<RunDocument, ParseError> {
    let body = content.trim_start_matches('\u{feff}').trim_start();
    if body.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
            ParseError::new(path, ParseErrorKind::Malformed, e.to_string()).at_line(e.line())
        })?;
        if structured::is_structured(&value) {
            debug!(path = %path.display(), "detected structured result document");
            return structured::parse(path, value);
        }
        return Err(ParseError::new(
            path,
            ParseErrorKind::UnsupportedFormat,
            "JSON document has neither `suites` nor `results`",
        ));
    }
    debug!(path = %path.display(), "attempting JUnit XML");
    junit::parse(path, content)
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Literal directory prefix of a glob pattern, used as the walk root.
fn glob_base(pattern: &str) -> PathBuf {
    let literal: Vec<&str> = pattern
        .split('/')
        .take_while(|segment| !is_glob(segment))
        .collect();
    let base = literal.join("/");
    if base.is_empty() {
        if pattern.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        }
    } else {
        PathBuf::from(base)
    }
}

fn is_report_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| REPORT_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Expands a file path, directory or glob pattern into a sorted file list.
pub fn resolve_paths(pattern: &str) -> Result<Vec<PathBuf>, IngestError> {
    let no_match = || IngestError::NoFilesMatched {
        pattern: pattern.to_string(),
    };

    if !is_glob(pattern) {
        let path = Path::new(pattern);
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        if !path.is_dir() {
            return Err(no_match());
        }
        let mut files: Vec<PathBuf> = walk_files(path)
            .filter(|p| is_report_file(p))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(no_match());
        }
        return Ok(files);
    }

    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| IngestError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?
        .compile_matcher();

    let base = glob_base(pattern);
    let implicit_base = base == Path::new(".") && !pattern.starts_with("./");
    let mut files: Vec<PathBuf> = walk_files(&base)
        .map(|p| {
            if implicit_base {
                p.strip_prefix(".").map(Path::to_path_buf).unwrap_or(p)
            } else {
                p
            }
        })
        .filter(|p| matcher.is_match(p))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(no_match());
    }
    Ok(files)
}

fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

/// Resolves `pattern` and parses every match, at most `concurrency` files at
/// a time. Results keep path order. Fails only when nothing matched or
/// nothing parsed.
pub async fn parse_all(pattern: &str, concurrency: usize) -> Result<ParseReport, IngestError> {
    let paths = resolve_paths(pattern)?;
    info!(pattern, files = paths.len(), "[INGEST] Resolved input files");

    let results: Vec<Result<RunDocument, ParseError>> = stream::iter(paths)
        .map(|path| async move {
            let fallback = path.clone();
            match tokio::task::spawn_blocking(move || parse_file(&path)).await {
                Ok(result) => result,
                Err(e) => Err(ParseError::new(
                    fallback,
                    ParseErrorKind::Io,
                    format!("parser task failed: {e}"),
                )),
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = ParseReport::default();
    for result in results {
        match result {
            Ok(document) => {
                info!(
                    path = %document.path.display(),
                    format = document.source_format.as_str(),
                    suites = document.suites.len(),
                    cases = document.case_count(),
                    "[INGEST] Parsed file"
                );
                report.documents.push(document);
            }
            Err(e) => {
                warn!(error = %e, "[INGEST] Failed to parse file");
                report.failures.push(e);
            }
        }
    }

    if report.documents.is_empty() {
        return Err(IngestError::NothingParsed {
            failures: report.failures,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, write};
    use tempfile::tempdir;

    const PASSING_XML: &str = r#"<testsuite name="s"><testcase name="a"/></testsuite>"#;

    #[test]
    fn json_without_known_keys_is_unsupported() {
        let err = parse_content(Path::new("x.json"), r#"{"tests": []}"#).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnsupportedFormat);
    }

    #[test]
    fn broken_json_is_malformed_with_line() {
        let err = parse_content(Path::new("x.json"), "{\n\"suites\": [\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Malformed);
        assert!(err.line.is_some());
    }

    #[test]
    fn glob_base_stops_at_first_wildcard() {
        assert_eq!(glob_base("reports/**/*.xml"), PathBuf::from("reports"));
        assert_eq!(glob_base("/tmp/out/*.xml"), PathBuf::from("/tmp/out"));
        assert_eq!(glob_base("*.xml"), PathBuf::from("."));
    }

    #[test]
    fn resolve_glob_matches_sorted_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        create_dir_all(&nested).unwrap();
        write(dir.path().join("b.xml"), PASSING_XML).unwrap();
        write(dir.path().join("a.xml"), PASSING_XML).unwrap();
        write(dir.path().join("notes.txt"), "x").unwrap();
        write(nested.join("c.xml"), PASSING_XML).unwrap();

        let pattern = format!("{}/*.xml", dir.path().display());
        let files = resolve_paths(&pattern).unwrap();
        assert_eq!(files, vec![dir.path().join("a.xml"), dir.path().join("b.xml")]);

        let recursive = format!("{}/**/*.xml", dir.path().display());
        assert_eq!(resolve_paths(&recursive).unwrap().len(), 3);
    }

    #[test]
    fn directory_yields_report_files() {
        let dir = tempdir().unwrap();
        write(dir.path().join("a.xml"), PASSING_XML).unwrap();
        write(dir.path().join("b.json"), r#"{"results": []}"#).unwrap();
        write(dir.path().join("c.log"), "x").unwrap();
        let files = resolve_paths(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn zero_matches_is_an_error() {
        let dir = tempdir().unwrap();
        let pattern = format!("{}/*.xml", dir.path().display());
        assert!(matches!(
            resolve_paths(&pattern),
            Err(IngestError::NoFilesMatched { .. })
        ));
        assert!(matches!(
            resolve_paths("/definitely/not/here.xml"),
            Err(IngestError::NoFilesMatched { .. })
        ));
    }

    #[tokio::test]
    async fn one_bad_file_does_not_stop_the_others() {
        let dir = tempdir().unwrap();
        write(dir.path().join("1-good.xml"), PASSING_XML).unwrap();
        write(dir.path().join("2-bad.xml"), "<testsuite><testcase>").unwrap();
        write(dir.path().join("3-good.json"), r#"{"results":[{"name":"x","status":"ok"}]}"#).unwrap();
        let pattern = format!("{}/*", dir.path().display());

        let report = parse_all(&pattern, 2).await.unwrap();
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("2-bad.xml"));
        assert!(report.documents[0].path.ends_with("1-good.xml"));
        assert!(report.documents[1].path.ends_with("3-good.json"));
    }

    #[tokio::test]
    async fn nothing_parsed_is_fatal() {
        let dir = tempdir().unwrap();
        write(dir.path().join("a.xml"), "plain text").unwrap();
        let pattern = format!("{}/*.xml", dir.path().display());
        match parse_all(&pattern, 4).await {
            Err(IngestError::NothingParsed { failures }) => assert_eq!(failures.len(), 1),
            other => panic!("expected NothingParsed, got {other:?}"),
        }
    }
}
