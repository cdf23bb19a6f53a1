//! JUnit-style XML reports.
//!
//! Accepts a `<testsuites>` or `<testsuite>` root, any number of sibling or
//! nested `<testsuite>` elements, and `<failure>`, `<error>` and `<skipped>`
//! markers on each `<testcase>`. Cases belong to their innermost suite.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{ParseError, ParseErrorKind};
use crate::model::{CaseRecord, CaseStatus, FieldValue, RawDuration, RunDocument, SourceFormat, Suite};

pub fn parse(path: &Path, content: &str) -> Result<RunDocument, ParseError> {
    let body = content.trim_start_matches('\u{feff}').trim_start();
    if !body.starts_with('<') {
        return Err(ParseError::new(
            path,
            ParseErrorKind::UnsupportedFormat,
            "content is neither a structured result document nor XML",
        ));
    }

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut builder = Builder::new(default_suite_name(path));
    let mut depth = 0usize;

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event()
            .map_err(|e| malformed(path, content, position, e.to_string()))?;
        // End of the element just read; leading whitespace is skipped.
        let element_end = reader.buffer_position() as u64;
        let step = match event {
            Event::Start(e) => {
                depth += 1;
                builder.open(&e, false)
            }
            Event::Empty(e) => builder.open(&e, true),
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                builder.close(e.local_name().as_ref());
                Ok(())
            }
            Event::Text(t) => match t.unescape() {
                Ok(text) => {
                    builder.text(&text);
                    Ok(())
                }
                Err(e) => Err(Step::Malformed(e.to_string())),
            },
            Event::CData(c) => {
                builder.text(&String::from_utf8_lossy(&c));
                Ok(())
            }
            Event::Eof => break,
            _ => Ok(()),
        };
        match step {
            Ok(()) => {}
            Err(Step::NotJunit(root)) => {
                return Err(ParseError::new(
                    path,
                    ParseErrorKind::UnsupportedFormat,
                    format!("root element <{root}> is not a JUnit report"),
                ));
            }
            Err(Step::Malformed(message)) => {
                return Err(malformed(path, content, element_end, message));
            }
        }
    }

    if !builder.root_seen {
        return Err(ParseError::new(
            path,
            ParseErrorKind::UnsupportedFormat,
            "document has no root element",
        ));
    }
    if depth != 0 {
        let end = content.len() as u64;
        return Err(malformed(path, content, end, "unexpected end of document".to_string()));
    }

    Ok(builder.finish(path))
}

fn default_suite_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}

fn malformed(path: &Path, content: &str, offset: u64, message: String) -> ParseError {
    ParseError::new(path, ParseErrorKind::Malformed, message)
        .at_line(line_at(content, offset))
        .at_offset(offset)
}

/// 1-based line containing byte `offset`.
fn line_at(content: &str, offset: u64) -> usize {
    let end = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
    content.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

fn attributes(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>, Step> {
    let mut map = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Step::Malformed(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| Step::Malformed(err.to_string()))?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

enum Step {
    NotJunit(String),
    Malformed(String),
}

struct OpenCase {
    record: CaseRecord,
    /// Whether text events currently belong to the winning marker.
    collecting: bool,
    in_properties: bool,
}

struct Builder {
    fallback_suite: String,
    root_seen: bool,
    raw_metadata: BTreeMap<String, String>,
    suites: Vec<Suite>,
    stack: Vec<usize>,
    implicit: Option<usize>,
    case: Option<OpenCase>,
}

impl Builder {
    fn new(fallback_suite: String) -> Self {
        Self {
            fallback_suite,
            root_seen: false,
            raw_metadata: BTreeMap::new(),
            suites: Vec::new(),
            stack: Vec::new(),
            implicit: None,
            case: None,
        }
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), Step> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

        if !self.root_seen {
            if name != "testsuites" && name != "testsuite" {
                return Err(Step::NotJunit(name));
            }
            self.root_seen = true;
            self.raw_metadata.extend(attributes(e)?);
        }

        match name.as_str() {
            "testsuite" => {
                let attrs = attributes(e)?;
                let suite_name = attrs
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| self.fallback_suite.clone());
                self.suites.push(Suite {
                    name: suite_name,
                    cases: Vec::new(),
                });
                if !empty {
                    self.stack.push(self.suites.len() - 1);
                }
            }
            "testcase" => {
                let attrs = attributes(e)?;
                let name = match attrs.get("name") {
                    Some(name) if !name.trim().is_empty() => name.clone(),
                    _ => return Err(Step::Malformed("<testcase> without a name".to_string())),
                };
                let mut record = CaseRecord::new(name, CaseStatus::Passed);
                record.external_id = attrs.get("id").cloned();
                if let Some(time) = attrs.get("time") {
                    record.duration = RawDuration::Seconds(time.clone());
                }
                for key in ["classname", "file", "line"] {
                    if let Some(value) = attrs.get(key) {
                        record
                            .custom_fields
                            .insert(key.to_string(), FieldValue::Text(value.clone()));
                    }
                }
                self.case = Some(OpenCase {
                    record,
                    collecting: false,
                    in_properties: false,
                });
                if empty {
                    self.close_case();
                }
            }
            "failure" | "error" | "skipped" => {
                let attrs = attributes(e)?;
                if let Some(open) = self.case.as_mut() {
                    let marker = match name.as_str() {
                        "error" => CaseStatus::Error,
                        "failure" => CaseStatus::Failed,
                        _ => CaseStatus::Skipped,
                    };
                    if marker >= open.record.status {
                        if marker > open.record.status {
                            open.record.message = None;
                            open.record.stack_trace = None;
                        }
                        open.record.status = marker;
                        if let Some(message) = attrs.get("message") {
                            open.record.message = Some(message.clone());
                        }
                        open.collecting = !empty;
                    } else {
                        debug!(case = %open.record.name, marker = %marker, "lower precedence marker ignored");
                    }
                }
            }
            "properties" => {
                if let Some(open) = self.case.as_mut() {
                    open.in_properties = !empty;
                }
            }
            "property" => {
                let attrs = attributes(e)?;
                if let (Some(key), Some(value)) = (attrs.get("name"), attrs.get("value")) {
                    match self.case.as_mut() {
                        Some(open) if open.in_properties => {
                            open.record
                                .custom_fields
                                .insert(key.clone(), FieldValue::Text(value.clone()));
                        }
                        Some(_) => {}
                        None => {
                            self.raw_metadata.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"testsuite" => {
                self.stack.pop();
            }
            b"testcase" => self.close_case(),
            b"failure" | b"error" | b"skipped" => {
                if let Some(open) = self.case.as_mut() {
                    open.collecting = false;
                }
            }
            b"properties" => {
                if let Some(open) = self.case.as_mut() {
                    open.in_properties = false;
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(open) = self.case.as_mut() {
            if open.collecting && !text.is_empty() {
                match open.record.stack_trace.as_mut() {
                    Some(trace) => {
                        trace.push('\n');
                        trace.push_str(text);
                    }
                    None => open.record.stack_trace = Some(text.to_string()),
                }
            }
        }
    }

    fn close_case(&mut self) {
        let Some(open) = self.case.take() else {
            return;
        };
        let index = match self.stack.last() {
            Some(index) => *index,
            None => match self.implicit {
                Some(index) => index,
                None => {
                    self.suites.push(Suite {
                        name: self.fallback_suite.clone(),
                        cases: Vec::new(),
                    });
                    let index = self.suites.len() - 1;
                    self.implicit = Some(index);
                    index
                }
            },
        };
        self.suites[index].cases.push(open.record);
    }

    fn finish(self, path: &Path) -> RunDocument {
        RunDocument {
            path: path.to_path_buf(),
            source_format: SourceFormat::JunitXml,
            suites: self
                .suites
                .into_iter()
                .filter(|s| !s.cases.is_empty())
                .collect(),
            raw_metadata: self.raw_metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(xml: &str) -> Result<RunDocument, ParseError> {
        parse(Path::new("report.xml"), xml)
    }

    fn statuses(doc: &RunDocument) -> Vec<CaseStatus> {
        doc.suites
            .iter()
            .flat_map(|s| s.cases.iter().map(|c| c.status))
            .collect()
    }

    #[test]
    fn testcases_without_markers_are_passed() {
        let doc = parse_str(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuite name="math" tests="3">
  <testcase name="adds" classname="MathTest" time="0.010"/>
  <testcase name="subtracts" classname="MathTest" time="0.5"></testcase>
  <testcase name="divides" classname="MathTest"/>
</testsuite>"#,
        )
        .unwrap();
        assert_eq!(doc.source_format, SourceFormat::JunitXml);
        assert_eq!(doc.case_count(), 3);
        assert!(statuses(&doc).iter().all(|s| *s == CaseStatus::Passed));
        let cases = &doc.suites[0].cases;
        assert_eq!(cases[0].duration, RawDuration::Seconds("0.010".into()));
        assert_eq!(cases[2].duration, RawDuration::Absent);
        assert_eq!(
            cases[0].custom_fields.get("classname"),
            Some(&FieldValue::Text("MathTest".into()))
        );
        assert_eq!(doc.raw_metadata.get("tests").map(String::as_str), Some("3"));
    }

    #[test]
    fn markers_map_to_statuses() {
        let doc = parse_str(
            r#"<testsuite name="s">
  <testcase name="a"><failure message="expected 1">assert failed at line 3</failure></testcase>
  <testcase name="b"><error message="boom" type="NullPointer"/></testcase>
  <testcase name="c"><skipped/></testcase>
  <testcase name="d"/>
</testsuite>"#,
        )
        .unwrap();
        assert_eq!(
            statuses(&doc),
            vec![
                CaseStatus::Failed,
                CaseStatus::Error,
                CaseStatus::Skipped,
                CaseStatus::Passed
            ]
        );
        let failed = &doc.suites[0].cases[0];
        assert_eq!(failed.message.as_deref(), Some("expected 1"));
        assert_eq!(failed.stack_trace.as_deref(), Some("assert failed at line 3"));
    }

    #[test]
    fn error_takes_precedence_over_failure_and_skipped() {
        let doc = parse_str(
            r#"<testsuite name="s">
  <testcase name="all"><skipped message="skip"/><error message="err">trace</error><failure message="fail"/></testcase>
  <testcase name="fail-skip"><skipped/><failure message="fail"/></testcase>
</testsuite>"#,
        )
        .unwrap();
        let cases = &doc.suites[0].cases;
        assert_eq!(cases[0].status, CaseStatus::Error);
        assert_eq!(cases[0].message.as_deref(), Some("err"));
        assert_eq!(cases[0].stack_trace.as_deref(), Some("trace"));
        assert_eq!(cases[1].status, CaseStatus::Failed);
    }

    #[test]
    fn multiple_and_nested_suites_keep_source_order() {
        let doc = parse_str(
            r#"<testsuites name="all">
  <testsuite name="outer">
    <testcase name="o1"/>
    <testsuite name="inner">
      <testcase name="i1"/>
    </testsuite>
    <testcase name="o2"/>
  </testsuite>
  <testsuite name="second"><testcase name="s1"/></testsuite>
  <testsuite name="empty"/>
</testsuites>"#,
        )
        .unwrap();
        let names: Vec<(&str, Vec<&str>)> = doc
            .suites
            .iter()
            .map(|s| (s.name.as_str(), s.cases.iter().map(|c| c.name.as_str()).collect()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("outer", vec!["o1", "o2"]),
                ("inner", vec!["i1"]),
                ("second", vec!["s1"]),
            ]
        );
        assert_eq!(doc.raw_metadata.get("name").map(String::as_str), Some("all"));
    }

    #[test]
    fn case_properties_become_custom_fields() {
        let doc = parse_str(
            r#"<testsuite name="s">
  <properties><property name="env" value="ci"/></properties>
  <testcase name="a">
    <properties><property name="owner" value="qa-team"/></properties>
    <system-out>noise</system-out>
  </testcase>
</testsuite>"#,
        )
        .unwrap();
        let case = &doc.suites[0].cases[0];
        assert_eq!(
            case.custom_fields.get("owner"),
            Some(&FieldValue::Text("qa-team".into()))
        );
        assert_eq!(case.stack_trace, None);
        assert_eq!(doc.raw_metadata.get("env").map(String::as_str), Some("ci"));
    }

    #[test]
    fn cdata_body_is_kept_as_stack_trace() {
        let doc = parse_str(
            r#"<testsuite name="s"><testcase name="a"><failure><![CDATA[at Foo.bar(Foo.java:10)]]></failure></testcase></testsuite>"#,
        )
        .unwrap();
        assert_eq!(
            doc.suites[0].cases[0].stack_trace.as_deref(),
            Some("at Foo.bar(Foo.java:10)")
        );
    }

    #[test]
    fn foreign_root_is_unsupported() {
        let err = parse_str("<html><body/></html>").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnsupportedFormat);
        let err = parse_str("just some text").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnsupportedFormat);
    }

    #[test]
    fn broken_xml_reports_line() {
        let err = parse_str("<testsuite name=\"s\">\n<testcase name=\"a\">\n</testsuite>").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Malformed);
        assert!(err.line.is_some());
        assert!(err.offset.is_some());
    }

    #[test]
    fn truncated_document_is_malformed() {
        let err = parse_str("<testsuite name=\"s\">\n<testcase name=\"a\"/>\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Malformed);
    }

    #[test]
    fn nameless_testcase_is_malformed_at_its_line() {
        let err = parse_str("<testsuite name=\"s\">\n<testcase name=\"a\"/>\n<testcase/>\n<testcase/>\n</testsuite>")
            .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Malformed);
        assert_eq!(err.line, Some(3));
        assert!(err.message.contains("without a name"));

        let err = parse_str("<testsuite><testcase name=\" \"/></testsuite>").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Malformed);
    }
}
