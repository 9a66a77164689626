#![doc = include_str!("../README.md")]

pub mod driver;
pub mod graph;
pub mod runtime;
pub mod stages;
pub mod synth;

pub use driver::{Pipeline, PipelineConfig, PipelineMetrics, PipelineReport, run_concurrent};
pub use graph::{LinkConfig, PipelineGraph, TaskConfig, TaskKind};
pub use runtime::{BackendKind, available_backends, create_execution_context};
