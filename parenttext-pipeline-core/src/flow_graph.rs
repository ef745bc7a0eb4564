//! RapidPro flow-graph documents: `flows`, `campaigns` and `triggers`.
//!
//! Entries are kept as raw JSON so fields this crate does not know about survive
//! a load/save cycle untouched.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Campaign event types that start a flow and therefore follow it into a batch.
pub const FLOW_EVENT_TYPES: [&str; 2] = ["F", "M"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    pub flows: Vec<Value>,
    #[serde(default)]
    pub campaigns: Vec<Value>,
    #[serde(default)]
    pub triggers: Vec<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl FlowGraph {
    pub fn load(path: &Path) -> Result<FlowGraph, std::io::Error> {
        let content = fs::read(path)?;
        serde_json::from_slice(&content).map_err(std::io::Error::from)
    }

    pub fn flow_names(&self) -> HashSet<&str> {
        self.flows.iter().filter_map(flow_name).collect()
    }

    pub fn flow_uuids(&self) -> HashSet<&str> {
        self.flows.iter().filter_map(flow_uuid).collect()
    }

    /// Combines several documents into one; array sections are concatenated and
    /// other top-level keys keep their first value.
    pub fn merge(graphs: impl IntoIterator<Item = FlowGraph>) -> FlowGraph {
        let mut merged = FlowGraph::default();
        for graph in graphs {
            merged.flows.extend(graph.flows);
            merged.campaigns.extend(graph.campaigns);
            merged.triggers.extend(graph.triggers);
            for (key, value) in graph.rest {
                if let Some(existing) = merged.rest.get_mut(&key) {
                    if let (Value::Array(existing), Value::Array(more)) = (existing, value) {
                        existing.extend(more);
                    }
                } else {
                    merged.rest.insert(key, value);
                }
            }
        }
        merged
    }
}

/// Serialises with 4-space indentation.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

pub fn flow_name(flow: &Value) -> Option<&str> {
    flow.get("name").and_then(Value::as_str)
}

pub fn flow_uuid(flow: &Value) -> Option<&str> {
    flow.get("uuid").and_then(Value::as_str)
}

/// Sets `expire_after_minutes` from `specifics` (keyed by flow name) or `default`,
/// mirroring it into `metadata.expires` only when that key already exists.
/// Returns false when neither source provides a value; the flow is then untouched.
pub fn set_expiration(flow: &mut Value, default: Option<u32>, specifics: &Map<String, Value>) -> bool {
    let expiration = flow_name(flow)
        .and_then(|name| specifics.get(name).cloned())
        .or_else(|| default.map(Value::from));
    let Some(expiration) = expiration else {
        return false;
    };
    let Some(flow) = flow.as_object_mut() else {
        return false;
    };

    flow.insert("expire_after_minutes".to_owned(), expiration.clone());
    if let Some(metadata) = flow.get_mut("metadata").and_then(Value::as_object_mut) {
        if metadata.contains_key("expires") {
            metadata.insert("expires".to_owned(), expiration);
        }
    }
    true
}

fn event_flow_name(event: &Value) -> Option<&str> {
    event
        .get("flow")
        .and_then(|flow| flow.get("name"))
        .and_then(Value::as_str)
}

/// Trims a campaign to the events that start a flow in `flow_names`.
///
/// A campaign that had no events to begin with is returned unchanged; one whose
/// events are all removed yields `None`.
pub fn edit_campaign(campaign: &Value, flow_names: &HashSet<&str>) -> Option<Value> {
    let events = campaign
        .get("events")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if events.is_empty() {
        return Some(campaign.clone());
    }

    let campaign_name = campaign.get("name").and_then(Value::as_str).unwrap_or_default();
    let kept: Vec<Value> = events
        .iter()
        .filter(|event| {
            let event_type = event.get("event_type").and_then(Value::as_str);
            let keep = event_type.is_some_and(|t| FLOW_EVENT_TYPES.contains(&t))
                && event_flow_name(event).is_some_and(|name| flow_names.contains(name));
            if !keep {
                tracing::info!(
                    campaign = campaign_name,
                    event_type = ?event_type,
                    flow = ?event_flow_name(event),
                    "[SPLIT] Dropping campaign event"
                );
            }
            keep
        })
        .cloned()
        .collect();

    if kept.is_empty() {
        tracing::info!(campaign = campaign_name, "[SPLIT] Dropping campaign without events");
        return None;
    }

    let mut edited = campaign.clone();
    if let Some(obj) = edited.as_object_mut() {
        obj.insert("events".to_owned(), Value::Array(kept));
    }
    Some(edited)
}

/// True when the trigger's flow is one of `flow_uuids`.
pub fn trigger_in_batch(trigger: &Value, flow_uuids: &HashSet<&str>) -> bool {
    trigger
        .get("flow")
        .and_then(|flow| flow.get("uuid"))
        .and_then(Value::as_str)
        .is_some_and(|uuid| flow_uuids.contains(uuid))
}
