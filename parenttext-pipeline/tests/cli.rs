use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::tempdir;
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry};

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn load_flows_config(pipeline_version: &str) -> Value {
    json!({
        "meta": {"pipeline_version": pipeline_version},
        "flows_outputbasename": "parenttext_all",
        "sources": {
            "flows": {"format": "json", "files_dict": {"core": "core.json"}},
        },
        "steps": [
            {"id": "load", "type": "load_flows", "sources": ["flows"]},
            {"id": "expire", "type": "update_expiration_times", "default_expiration_time": 60},
        ],
    })
}

#[test]
fn compile_flows_writes_output_from_cached_sources() {
    let dir = tempdir().unwrap();
    write_json(&dir.path().join("config.json"), &load_flows_config("1.0.0"));
    fs::create_dir_all(dir.path().join("input/flows")).unwrap();
    write_json(
        &dir.path().join("input/flows/core.json"),
        &json!({"flows": [{"name": "welcome", "uuid": "u1"}]}),
    );

    let mut cmd = Command::cargo_bin("parenttext-pipeline").expect("Binary exists");
    cmd.current_dir(dir.path()).arg("run").arg("compile_flows");
    cmd.assert().success();

    let compiled: Value =
        serde_json::from_slice(&fs::read(dir.path().join("output/parenttext_all.json")).unwrap()).unwrap();
    assert_eq!(compiled["flows"][0]["expire_after_minutes"], 60);
}

#[test]
fn newer_config_version_is_rejected_before_any_work() {
    let dir = tempdir().unwrap();
    write_json(&dir.path().join("config.json"), &load_flows_config("99.0.0"));

    let mut cmd = Command::cargo_bin("parenttext-pipeline").expect("Binary exists");
    cmd.arg("run")
        .arg("--config")
        .arg(dir.path())
        .arg("compile_flows");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("newer than actual pipeline version"));

    assert!(!dir.path().join("output").exists(), "nothing ran");
}

#[test]
fn missing_config_fails() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("parenttext-pipeline").expect("Binary exists");
    cmd.arg("run")
        .arg("--config")
        .arg(dir.path())
        .arg("pull_data");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no configuration found"));
}

#[test]
fn unknown_operation_is_a_usage_error() {
    let mut cmd = Command::cargo_bin("parenttext-pipeline").expect("Binary exists");
    cmd.arg("run").arg("deploy");
    cmd.assert().failure().stderr(predicate::str::contains("invalid value"));
}

#[test]
fn convert_config_writes_current_layout() {
    let dir = tempdir().unwrap();
    let legacy = dir.path().join("legacy.json");
    let converted = dir.path().join("config.json");
    write_json(
        &legacy,
        &json!({
            "sources": [{"filename": "parenttext_all", "spreadsheet_ids": ["1flows"], "split_no": 2}],
            "model": "models.parenttext_models",
            "languages": [],
            "translation_repo": "https://github.com/IDEMSInternational/plh-translations",
            "folder_within_repo": "translations",
            "qr_treatment": "none",
        }),
    );

    let mut cmd = Command::cargo_bin("parenttext-pipeline").expect("Binary exists");
    cmd.arg("convert-config")
        .arg("--input")
        .arg(&legacy)
        .arg("--output")
        .arg(&converted);
    cmd.assert().success();

    let value: Value = serde_json::from_slice(&fs::read(&converted).unwrap()).unwrap();
    assert_eq!(value["meta"]["pipeline_version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(value["output_split_number"], 2);
    assert_eq!(value["steps"][0]["type"], "create_flows");
}

#[test]
fn convert_config_refuses_current_layout() {
    let dir = tempdir().unwrap();
    let current = dir.path().join("config.json");
    write_json(&current, &load_flows_config("1.0.0"));

    let mut cmd = Command::cargo_bin("parenttext-pipeline").expect("Binary exists");
    cmd.arg("convert-config")
        .arg("--input")
        .arg(&current)
        .arg("--output")
        .arg(dir.path().join("out.json"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("already in the current configuration layout"));
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
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

    use parenttext_pipeline::cli::{run, Cli, Commands, Operation};

    let cli = Cli {
        command: Commands::Run {
            config: std::path::PathBuf::from("does-not-exist.json"),
            operations: vec![Operation::PullData],
        },
    };

    let result = run(cli).await;
    assert!(result.is_err(), "missing config must fail");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
