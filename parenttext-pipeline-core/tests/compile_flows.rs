use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parenttext_pipeline_core::compile_flows::{apply_steps, run};
use parenttext_pipeline_core::config::{Config, StepKind};
use parenttext_pipeline_core::contract::{MockExternalTool, ToolStatus};
use parenttext_pipeline_core::error::{PipelineError, StepError, ToolError};
use parenttext_pipeline_core::steps::{StepContext, StepHandler, StepOutcome, StepRegistry};
use serde_json::{json, Value};
use tempfile::tempdir;

/// Writes a marker artifact and records the input it was given.
struct Producing {
    seen: Arc<Mutex<Vec<Option<PathBuf>>>>,
}

#[async_trait]
impl StepHandler for Producing {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        self.seen.lock().unwrap().push(ctx.input.map(Path::to_path_buf));
        let output = ctx.output_path();
        fs::write(&output, json!({"flows": [{"name": ctx.step.id}]}).to_string()).unwrap();
        Ok(StepOutcome::Produced(output))
    }
}

struct Checking {
    seen: Arc<Mutex<Vec<Option<PathBuf>>>>,
}

#[async_trait]
impl StepHandler for Checking {
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        self.seen.lock().unwrap().push(ctx.input.map(Path::to_path_buf));
        Ok(StepOutcome::Unchanged)
    }
}

/// Steps write into the temp dir, which `run` normally creates; it is created
/// here too so `apply_steps` can be driven directly.
fn config_with_steps(root: &Path, steps: Value) -> Config {
    let config = Config::from_value(json!({
        "meta": {"pipeline_version": "1.0.0"},
        "flows_outputbasename": "parenttext_all",
        "outputpath": root.join("output"),
        "temppath": root.join("temp"),
        "inputpath": root.join("input"),
        "sources": {
            "flows": {"format": "json", "files_dict": {"core": "core.json"}},
        },
        "steps": steps,
    }))
    .expect("config should load");
    fs::create_dir_all(&config.temppath).unwrap();
    config
}

fn fake_registry(seen: &Arc<Mutex<Vec<Option<PathBuf>>>>) -> StepRegistry {
    let mut registry = StepRegistry::empty();
    registry
        .register(StepKind::LoadFlows, Arc::new(Producing { seen: seen.clone() }))
        .register(StepKind::FixArgQrTranslation, Arc::new(Producing { seen: seen.clone() }))
        .register(StepKind::OverallIntegrityCheck, Arc::new(Checking { seen: seen.clone() }));
    registry
}

#[tokio::test]
async fn test_unchanged_steps_pass_the_previous_artifact_on() {
    let root = tempdir().unwrap();
    let config = config_with_steps(
        root.path(),
        json!([
            {"id": "load", "type": "load_flows", "sources": ["flows"]},
            {"id": "check", "type": "overall_integrity_check"},
            {"id": "fix", "type": "fix_arg_qr_translation"},
            {"id": "check_again", "type": "overall_integrity_check"},
        ]),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = fake_registry(&seen);

    let report = run(&config, &registry, &MockExternalTool::new()).await.unwrap();

    let first = root.path().join("temp/parenttext_all_1_load.json");
    let third = root.path().join("temp/parenttext_all_3_fix.json");
    assert_eq!(
        *seen.lock().unwrap(),
        vec![None, Some(first.clone()), Some(first), Some(third.clone())],
        "each step sees the artifact of the last producing step"
    );
    assert_eq!(report.final_artifact, third);
    assert_eq!(report.outputs, vec![root.path().join("output/parenttext_all.json")]);
    assert_eq!(
        fs::read(&report.outputs[0]).unwrap(),
        fs::read(&third).unwrap()
    );
}

#[tokio::test]
async fn test_no_producing_step_is_an_error() {
    let root = tempdir().unwrap();
    let config = config_with_steps(
        root.path(),
        json!([{"id": "check", "type": "overall_integrity_check"}]),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));

    let err = apply_steps(&config, &fake_registry(&seen), &MockExternalTool::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StepError::NoArtifact), "got {err:?}");
}

#[tokio::test]
async fn test_step_without_handler_is_reported() {
    let root = tempdir().unwrap();
    let config = config_with_steps(
        root.path(),
        json!([
            {"id": "load", "type": "load_flows", "sources": ["flows"]},
            {"id": "qr", "type": "qr_treatment", "qr_treatment": "move"},
        ]),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));

    let err = apply_steps(&config, &fake_registry(&seen), &MockExternalTool::new())
        .await
        .unwrap_err();

    assert!(matches!(&err, StepError::NoHandler(kind) if kind == "qr_treatment"), "got {err:?}");
    assert_eq!(seen.lock().unwrap().len(), 1, "steps before the failure ran");
}

#[tokio::test]
async fn test_load_flows_and_update_expiration_times_end_to_end() {
    let root = tempdir().unwrap();
    let config = Config::from_value(json!({
        "meta": {"pipeline_version": "1.0.0"},
        "flows_outputbasename": "parenttext_all",
        "outputpath": root.path().join("output"),
        "temppath": root.path().join("temp"),
        "inputpath": root.path().join("input"),
        "sources": {
            "flows": {"format": "json", "files_dict": {"core": "core.json", "extra": "extra.json"}},
            "expiration_times": {
                "format": "json",
                "files_dict": {"special_expiration_file": "expiration.json"},
            },
        },
        "steps": [
            {"id": "load", "type": "load_flows", "sources": ["flows"]},
            {
                "id": "expire",
                "type": "update_expiration_times",
                "sources": ["expiration_times"],
                "default_expiration_time": 1440,
            },
            {"id": "integrity", "type": "overall_integrity_check"},
        ],
    }))
    .unwrap();

    let flows_cache = root.path().join("input/flows");
    fs::create_dir_all(&flows_cache).unwrap();
    fs::write(
        flows_cache.join("core.json"),
        json!({
            "version": "13",
            "flows": [
                {"name": "welcome", "uuid": "u1", "expire_after_minutes": 10080, "metadata": {"expires": 10080}},
                {"name": "survey", "uuid": "u2", "expire_after_minutes": 10080, "metadata": {}},
            ],
        })
        .to_string(),
    )
    .unwrap();
    fs::write(
        flows_cache.join("extra.json"),
        json!({"flows": [{"name": "goodbye", "uuid": "u3"}], "triggers": [{"flow": {"uuid": "u3"}}]}).to_string(),
    )
    .unwrap();
    let expiration_cache = root.path().join("input/expiration_times");
    fs::create_dir_all(&expiration_cache).unwrap();
    fs::write(
        expiration_cache.join("special_expiration_file.json"),
        json!({"survey": 60}).to_string(),
    )
    .unwrap();

    let mut tool = MockExternalTool::new();
    tool.expect_invoke()
        .withf(|invocation| invocation.subcommand() == Some("overall_integrity_check"))
        .times(1)
        .returning(|_| Ok(ToolStatus::SUCCESS));

    let report = run(&config, &StepRegistry::standard(), &tool).await.unwrap();

    assert_eq!(
        report.final_artifact,
        root.path().join("temp/parenttext_all_2_expire.json")
    );
    let compiled: Value = serde_json::from_slice(&fs::read(&report.outputs[0]).unwrap()).unwrap();
    let flows = compiled["flows"].as_array().unwrap();
    assert_eq!(flows.len(), 3);
    assert_eq!(flows[0]["expire_after_minutes"], 1440);
    assert_eq!(flows[0]["metadata"]["expires"], 1440);
    assert_eq!(flows[1]["expire_after_minutes"], 60, "specific time beats the default");
    assert!(flows[1]["metadata"].get("expires").is_none(), "absent metadata.expires is not added");
    assert_eq!(flows[2]["expire_after_minutes"], 1440);
    assert_eq!(compiled["triggers"].as_array().unwrap().len(), 1);
    assert_eq!(compiled["version"], "13");
}

#[tokio::test]
async fn test_failing_tool_aborts_the_run() {
    let root = tempdir().unwrap();
    let config = config_with_steps(
        root.path(),
        json!([
            {"id": "load", "type": "load_flows", "sources": ["flows"]},
            {"id": "hasanyword", "type": "has_any_word_check"},
        ]),
    );
    let flows_cache = root.path().join("input/flows");
    fs::create_dir_all(&flows_cache).unwrap();
    fs::write(flows_cache.join("core.json"), json!({"flows": []}).to_string()).unwrap();

    let mut tool = MockExternalTool::new();
    tool.expect_invoke()
        .times(1)
        .returning(|_| Ok(ToolStatus { code: Some(2) }));

    let err = run(&config, &StepRegistry::standard(), &tool).await.unwrap_err();

    assert!(
        matches!(
            err,
            PipelineError::Step(StepError::Tool(ToolError::Failed { code: Some(2), .. }))
        ),
        "got {err:?}"
    );
    assert!(
        !root.path().join("output/parenttext_all.json").exists(),
        "nothing is split after a failed step"
    );
}
