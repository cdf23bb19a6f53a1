use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::path::Path;
use tempfile::{tempdir, NamedTempFile};

const REPORT: &str = r#"<testsuite name="api" tests="2">
  <testcase name="get" time="0.5"/>
  <testcase name="post"><failure message="boom"/></testcase>
</testsuite>"#;

/// Creates a minimal config file pointing at `data_path`.
fn create_minimal_config(data_path: &Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        format!(
            "run:\n  project_key: DEMO\n  name: nightly\ningest:\n  data_path: \"{}\"\n",
            data_path.display()
        ),
    )
    .expect("Writing temp config failed");
    config
}

#[test]
fn inspect_prints_json_summary() {
    let dir = tempdir().unwrap();
    write(dir.path().join("api.xml"), REPORT).unwrap();
    let config = create_minimal_config(dir.path());

    let mut cmd = Command::cargo_bin("testbridge").expect("Binary exists");
    cmd.arg("inspect").arg("--config").arg(config.path());

    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("\"cases\": 2")
                .and(predicate::str::contains("\"passed\": 1"))
                .and(predicate::str::contains("\"failed\": 1"))
                .and(predicate::str::contains("\"project_key\": \"DEMO\"")),
        );
}

#[test]
fn inspect_data_flag_overrides_config() {
    let dir = tempdir().unwrap();
    write(dir.path().join("api.xml"), REPORT).unwrap();
    let config = create_minimal_config(&dir.path().join("missing"));

    let mut cmd = Command::cargo_bin("testbridge").expect("Binary exists");
    cmd.arg("inspect")
        .arg("--config")
        .arg(config.path())
        .arg("--data")
        .arg(dir.path().join("*.xml"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"files_parsed\": 1"));
}

#[test]
fn inspect_fails_when_no_file_matches() {
    let dir = tempdir().unwrap();
    let config = create_minimal_config(&dir.path().join("*.xml"));

    let mut cmd = Command::cargo_bin("testbridge").expect("Binary exists");
    cmd.arg("inspect").arg("--config").arg(config.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no files matched"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use testbridge::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Inspect {
            config: std::path::PathBuf::from("dummy.yaml"),
            data: None,
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
