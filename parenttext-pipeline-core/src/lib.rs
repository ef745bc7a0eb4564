#![doc = "parenttext-pipeline-core: config resolution, incremental source pulls, step execution and flow splitting for the ParentText content pipeline."]

//! The CLI crate only parses arguments and wires concrete collaborators; every
//! operation (`pull_data`, `compile_flows`, `pot_output`) lives here.
//!
//! # Layout
//! - [`config`] and [`config_converter`]: typed configuration and legacy conversion.
//! - [`pull_data`], [`keywords`], [`remote`]: the source resolver.
//! - [`steps`], [`compile_flows`], [`split`], [`flow_graph`]: step execution and output.
//! - [`meta`]: pull metadata and the version gate.
//! - [`contract`], [`tools`]: interfaces to external collaborators.

pub mod compile_flows;
pub mod config;
pub mod config_converter;
pub mod contract;
pub mod error;
pub mod flow_graph;
pub mod fs_util;
pub mod keywords;
pub mod meta;
pub mod pot_output;
pub mod pull_data;
pub mod remote;
pub mod split;
pub mod steps;
pub mod tools;

/// Version of the running pipeline, checked against `meta.pipeline_version` of a config.
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");
