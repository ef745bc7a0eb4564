use std::collections::HashSet;
use std::fs;
use std::path::Path;

use parenttext_pipeline_core::config::Config;
use parenttext_pipeline_core::flow_graph::FlowGraph;
use parenttext_pipeline_core::split::split;
use serde_json::{json, Value};
use tempfile::tempdir;

fn config_for(root: &Path, split_number: usize) -> Config {
    Config::from_value(json!({
        "meta": {"pipeline_version": "1.0.0"},
        "flows_outputbasename": "parenttext_all",
        "output_split_number": split_number,
        "outputpath": root.join("output"),
        "temppath": root.join("temp"),
        "inputpath": root.join("input"),
    }))
    .expect("config should load")
}

fn flow(name: &str) -> Value {
    json!({"name": name, "uuid": format!("uuid-{name}"), "nodes": []})
}

fn flow_event(flow_name: &str) -> Value {
    json!({
        "event_type": "F",
        "flow": {"name": flow_name, "uuid": format!("uuid-{flow_name}")},
    })
}

fn trigger(flow_name: &str) -> Value {
    json!({
        "trigger_type": "K",
        "keywords": [flow_name],
        "flow": {"name": flow_name, "uuid": format!("uuid-{flow_name}")},
    })
}

fn read_graph(path: &Path) -> FlowGraph {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn test_single_output_is_byte_identical_copy() {
    let root = tempdir().unwrap();
    let config = config_for(root.path(), 1);
    let input = root.path().join("compiled.json");
    // Deliberately odd formatting; it must survive untouched.
    let content = "{\"flows\":[ {\"name\":\"a\"} ],\n  \"version\": \"13\"}";
    fs::write(&input, content).unwrap();

    let written = split(&config, &input).unwrap();

    assert_eq!(written, vec![root.path().join("output/parenttext_all.json")]);
    assert_eq!(fs::read_to_string(&written[0]).unwrap(), content);
}

#[test]
fn test_seven_flows_into_three_files_keeps_every_flow_once() {
    let root = tempdir().unwrap();
    let config = config_for(root.path(), 3);
    let names: Vec<String> = (1..=7).map(|i| format!("flow_{i}")).collect();
    let graph = json!({
        "version": "13",
        "site": "https://rapidpro.idems.international",
        "flows": names.iter().map(|n| flow(n)).collect::<Vec<_>>(),
        "campaigns": [],
        "triggers": [],
    });
    let input = root.path().join("compiled.json");
    fs::write(&input, graph.to_string()).unwrap();

    let written = split(&config, &input).unwrap();

    assert_eq!(written.len(), 3);
    let mut seen = Vec::new();
    let mut sizes = Vec::new();
    for (index, path) in written.iter().enumerate() {
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(format!("parenttext_all_{}.json", index + 1).as_str())
        );
        let batch = read_graph(path);
        assert_eq!(batch.rest.get("version"), Some(&json!("13")), "top-level keys are carried over");
        sizes.push(batch.flows.len());
        seen.extend(batch.flows.iter().map(|f| f["name"].as_str().unwrap().to_owned()));
    }
    assert_eq!(sizes, vec![2, 2, 3]);
    assert_eq!(seen, names, "flows keep their order and appear exactly once");

    let text = fs::read_to_string(&written[0]).unwrap();
    assert!(text.contains("\n    \"flows\""), "batches use 4-space indentation");
}

#[test]
fn test_batches_only_reference_their_own_flows() {
    let root = tempdir().unwrap();
    let config = config_for(root.path(), 2);
    let graph = json!({
        "flows": [flow("a"), flow("b"), flow("c"), flow("d")],
        "campaigns": [
            {
                "name": "mixed",
                "events": [
                    flow_event("a"),
                    flow_event("c"),
                    {"event_type": "M", "message": {"eng": "hello"}, "flow": {"name": "d"}},
                ],
            },
            {"name": "unstarted", "events": []},
        ],
        "triggers": [trigger("a"), trigger("d")],
    });
    let input = root.path().join("compiled.json");
    fs::write(&input, graph.to_string()).unwrap();

    let written = split(&config, &input).unwrap();

    for path in &written {
        let batch = read_graph(path);
        let names: HashSet<&str> = batch.flow_names();
        let uuids: HashSet<&str> = batch.flow_uuids();
        for campaign in &batch.campaigns {
            for event in campaign["events"].as_array().unwrap() {
                let target = event["flow"]["name"].as_str().unwrap();
                assert!(names.contains(target), "{path:?}: event for {target} outside batch");
            }
        }
        for trigger in &batch.triggers {
            let target = trigger["flow"]["uuid"].as_str().unwrap();
            assert!(uuids.contains(target), "{path:?}: trigger for {target} outside batch");
        }
        assert!(
            batch.campaigns.iter().any(|c| c["name"] == "unstarted"),
            "campaigns without events are kept in every batch"
        );
    }

    let first = read_graph(&written[0]);
    assert_eq!(first.campaigns[0]["events"].as_array().unwrap().len(), 1);
    let second = read_graph(&written[1]);
    let mixed = second.campaigns.iter().find(|c| c["name"] == "mixed").unwrap();
    assert_eq!(mixed["events"].as_array().unwrap().len(), 2);
}

#[test]
fn test_campaign_lands_only_in_the_batch_of_its_flow() {
    let root = tempdir().unwrap();
    let config = config_for(root.path(), 2);
    let graph = json!({
        "flows": [flow("f1"), flow("f2")],
        "campaigns": [{"name": "c", "events": [flow_event("f1")]}],
        "triggers": [],
    });
    let input = root.path().join("compiled.json");
    fs::write(&input, graph.to_string()).unwrap();

    let written = split(&config, &input).unwrap();

    let first = read_graph(&written[0]);
    let second = read_graph(&written[1]);
    assert_eq!(first.flows.len(), 1);
    assert_eq!(first.campaigns.len(), 1);
    assert_eq!(second.flows.len(), 1);
    assert!(second.campaigns.is_empty(), "campaign whose events all left is removed");
}

#[test]
fn test_fewer_flows_than_outputs_still_writes_every_file() {
    let root = tempdir().unwrap();
    let config = config_for(root.path(), 3);
    let input = root.path().join("compiled.json");
    fs::write(&input, json!({"flows": [flow("a"), flow("b")]}).to_string()).unwrap();

    let written = split(&config, &input).unwrap();

    let sizes: Vec<usize> = written.iter().map(|p| read_graph(p).flows.len()).collect();
    assert_eq!(sizes, vec![0, 0, 2]);
}
