//! Splits the final flow-graph document into deployable output files.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::SplitError;
use crate::flow_graph::{edit_campaign, flow_uuid, to_pretty_json, trigger_in_batch, FlowGraph};

/// Index ranges of `total` flows cut into `parts` batches of `total / parts`,
/// with the last batch taking whatever is left over.
pub fn batch_ranges(total: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let batch_size = total / parts;
    (0..parts)
        .map(|i| {
            let start = i * batch_size;
            let end = if i + 1 == parts { total } else { start + batch_size };
            start..end
        })
        .collect()
}

/// Builds the document for one batch of flows, dropping every campaign event
/// and trigger that points outside the batch.
pub fn batch_document(graph: &FlowGraph, range: Range<usize>) -> FlowGraph {
    let flows = graph.flows[range].to_vec();
    let mut batch = FlowGraph {
        flows,
        campaigns: Vec::new(),
        triggers: Vec::new(),
        rest: graph.rest.clone(),
    };

    let names = batch.flow_names();
    let campaigns: Vec<Value> = graph
        .campaigns
        .iter()
        .filter_map(|campaign| edit_campaign(campaign, &names))
        .collect();

    let uuids = batch.flow_uuids();
    let triggers: Vec<Value> = graph
        .triggers
        .iter()
        .filter(|trigger| {
            let keep = trigger_in_batch(trigger, &uuids);
            if !keep {
                info!(
                    trigger_flow = ?trigger.get("flow").and_then(flow_uuid),
                    "[SPLIT] Dropping trigger"
                );
            }
            keep
        })
        .cloned()
        .collect();

    batch.campaigns = campaigns;
    batch.triggers = triggers;
    batch
}

/// Writes the compiled flows to the output directory.
///
/// With a split number of 1 the input is copied byte for byte to
/// `{basename}.json`; otherwise `{basename}_{i}.json` files (1-indexed) are written.
pub fn split(config: &Config, input: &Path) -> Result<Vec<PathBuf>, SplitError> {
    let out_dir = &config.outputpath;
    fs::create_dir_all(out_dir).map_err(|e| SplitError::Io {
        path: out_dir.clone(),
        source: e,
    })?;
    let basename = &config.flows_outputbasename;
    let parts = config.output_split_number;

    if parts <= 1 {
        let dest = out_dir.join(format!("{basename}.json"));
        fs::copy(input, &dest).map_err(|e| SplitError::Io {
            path: dest.clone(),
            source: e,
        })?;
        info!(input = ?input, output = ?dest, "[SPLIT] Copied flows to output");
        return Ok(vec![dest]);
    }

    let content = fs::read(input).map_err(|e| SplitError::Io {
        path: input.to_path_buf(),
        source: e,
    })?;
    let graph: FlowGraph = serde_json::from_slice(&content).map_err(|e| SplitError::Json {
        path: input.to_path_buf(),
        source: e,
    })?;

    let total = graph.flows.len();
    if total / parts == 0 {
        warn!(
            flows = total,
            parts, "[SPLIT] Fewer flows than output files, all flows land in the last file"
        );
    }

    let mut written = Vec::with_capacity(parts);
    for (index, range) in batch_ranges(total, parts).into_iter().enumerate() {
        let batch = batch_document(&graph, range);
        let dest = out_dir.join(format!("{basename}_{}.json", index + 1));
        let bytes = to_pretty_json(&batch).map_err(|e| SplitError::Json {
            path: dest.clone(),
            source: e,
        })?;
        fs::write(&dest, bytes).map_err(|e| SplitError::Io {
            path: dest.clone(),
            source: e,
        })?;
        info!(
            output = ?dest,
            flows = batch.flows.len(),
            campaigns = batch.campaigns.len(),
            triggers = batch.triggers.len(),
            "[SPLIT] Wrote batch"
        );
        written.push(dest);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remainder_goes_to_last_batch() {
        assert_eq!(batch_ranges(7, 3), vec![0..2, 2..4, 4..7]);
        assert_eq!(batch_ranges(6, 3), vec![0..2, 2..4, 4..6]);
        assert_eq!(batch_ranges(2, 3), vec![0..0, 0..0, 0..2]);
    }
}
