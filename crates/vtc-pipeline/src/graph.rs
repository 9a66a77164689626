//! Versioned JSON description of a pipeline.
//!
//! ```json
//! {
//!   "graph_schema_version": 1,
//!   "backend": "host",
//!   "tasks": [
//!     { "kind": "demux", "id": "src", "locator": "clip.ivf" },
//!     { "kind": "decode", "id": "dec", "codec": "raw",
//!       "coded_width": 1920, "coded_height": 1080 }
//!   ],
//!   "links": [ { "from": ["src", 0], "to": ["dec", 0] } ]
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vtc_container::open_source;
use vtc_core::context::{ContextConfig, ExecutionContext};
use vtc_core::encoder_options::EncoderOptions;
use vtc_core::error::{EngineError, Result};
use vtc_core::task::Task;
use vtc_core::types::{CodecId, ColorSpec, Interpolation, MuxingParams, PixelFormat, Rational};

use crate::driver::{Pipeline, PipelineConfig, topological_order};
use crate::runtime::{BackendKind, create_execution_context};
use crate::stages::{
    ConvertSurface, DecodeFrame, DemuxFrame, DownloadSurface, EncodeFrame, MuxFrame,
    ResizeSurface, UploadFrame,
};

pub const GRAPH_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Demux,
    Decode,
    Encode,
    Convert,
    Resize,
    Upload,
    Download,
    Mux,
}

impl TaskKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Demux => "demux",
            Self::Decode => "decode",
            Self::Encode => "encode",
            Self::Convert => "convert",
            Self::Resize => "resize",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Mux => "mux",
        }
    }

    /// `(inputs, outputs)` of the stage this kind builds.
    pub const fn arity(self) -> (usize, usize) {
        match self {
            Self::Demux => (DemuxFrame::NUM_INPUTS, DemuxFrame::NUM_OUTPUTS),
            Self::Decode => (DecodeFrame::NUM_INPUTS, DecodeFrame::NUM_OUTPUTS),
            Self::Encode => (EncodeFrame::NUM_INPUTS, EncodeFrame::NUM_OUTPUTS),
            Self::Convert => (ConvertSurface::NUM_INPUTS, ConvertSurface::NUM_OUTPUTS),
            Self::Resize => (ResizeSurface::NUM_INPUTS, ResizeSurface::NUM_OUTPUTS),
            Self::Upload => (UploadFrame::NUM_INPUTS, UploadFrame::NUM_OUTPUTS),
            Self::Download => (DownloadSurface::NUM_INPUTS, DownloadSurface::NUM_OUTPUTS),
            Self::Mux => (MuxFrame::NUM_INPUTS, MuxFrame::NUM_OUTPUTS),
        }
    }

    /// Whether input `port` must be linked. Only the mux audio input is optional.
    pub const fn input_required(self, port: usize) -> bool {
        !matches!(self, Self::Mux) || port == MuxFrame::VIDEO
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_encode_format() -> PixelFormat {
    PixelFormat::Nv12
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskConfig {
    Demux {
        id: String,
        locator: String,
    },
    Decode {
        id: String,
        codec: CodecId,
        #[serde(default = "default_pool_size")]
        pool_size: usize,
        coded_width: u32,
        coded_height: u32,
    },
    Encode {
        id: String,
        #[serde(default)]
        options: EncoderOptions,
        #[serde(default = "default_encode_format")]
        format: PixelFormat,
        width: u32,
        height: u32,
    },
    Convert {
        id: String,
        width: u32,
        height: u32,
        from: PixelFormat,
        to: PixelFormat,
        #[serde(default)]
        color: ColorSpec,
    },
    Resize {
        id: String,
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
        format: PixelFormat,
        #[serde(default)]
        interpolation: Interpolation,
    },
    Upload {
        id: String,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    Download {
        id: String,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    Mux {
        id: String,
        locator: String,
        /// Derived from the producer of the video input when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<MuxingParams>,
    },
}

impl TaskConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::Demux { id, .. }
            | Self::Decode { id, .. }
            | Self::Encode { id, .. }
            | Self::Convert { id, .. }
            | Self::Resize { id, .. }
            | Self::Upload { id, .. }
            | Self::Download { id, .. }
            | Self::Mux { id, .. } => id,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Demux { .. } => TaskKind::Demux,
            Self::Decode { .. } => TaskKind::Decode,
            Self::Encode { .. } => TaskKind::Encode,
            Self::Convert { .. } => TaskKind::Convert,
            Self::Resize { .. } => TaskKind::Resize,
            Self::Upload { .. } => TaskKind::Upload,
            Self::Download { .. } => TaskKind::Download,
            Self::Mux { .. } => TaskKind::Mux,
        }
    }
}

/// Output `from.1` of task `from.0` feeds input `to.1` of task `to.0`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub from: (String, usize),
    pub to: (String, usize),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineGraph {
    pub graph_schema_version: u32,
    #[serde(default)]
    pub backend: BackendKind,
    /// Device ordinal for the CUDA backends.
    #[serde(default)]
    pub device: usize,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub config: PipelineConfig,
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self {
            graph_schema_version: GRAPH_SCHEMA_VERSION,
            backend: BackendKind::default(),
            device: 0,
            context: ContextConfig::default(),
            config: PipelineConfig::default(),
            tasks: Vec::new(),
            links: Vec::new(),
        }
    }
}

fn wiring(msg: String) -> EngineError {
    EngineError::Wiring(format!("graph validation failed: {msg}"))
}

impl PipelineGraph {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|err| EngineError::Config(format!("Invalid pipeline graph JSON: {err}")))?;

        let Some(version_value) = value.get("graph_schema_version") else {
            return Err(EngineError::Config(format!(
                "Graph schema mismatch: expected {GRAPH_SCHEMA_VERSION}, got missing"
            )));
        };
        let Some(version) = version_value.as_u64() else {
            return Err(EngineError::Config(format!(
                "Graph schema mismatch: expected {GRAPH_SCHEMA_VERSION}, got non-integer"
            )));
        };
        if version != u64::from(GRAPH_SCHEMA_VERSION) {
            return Err(EngineError::Config(format!(
                "Graph schema mismatch: expected {GRAPH_SCHEMA_VERSION}, got {version}"
            )));
        }

        serde_json::from_value(value)
            .map_err(|err| EngineError::Config(format!("Invalid pipeline graph JSON: {err}")))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!(
                "Failed to read pipeline graph from {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&data)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| EngineError::Config(format!("Failed to encode pipeline graph: {err}")))
    }

    fn task_index(&self) -> Result<HashMap<&str, usize>> {
        let mut index = HashMap::with_capacity(self.tasks.len());
        for (i, task) in self.tasks.iter().enumerate() {
            if task.id().trim().is_empty() {
                return Err(wiring(format!("task #{i} has an empty id")));
            }
            if index.insert(task.id(), i).is_some() {
                return Err(wiring(format!("duplicate task id `{}`", task.id())));
            }
        }
        Ok(index)
    }

    /// Task feeding input `port` of task `id`, if linked.
    fn producer(&self, id: &str, port: usize) -> Option<&TaskConfig> {
        let link = self.links.iter().find(|l| l.to.0 == id && l.to.1 == port)?;
        self.tasks.iter().find(|t| t.id() == link.from.0)
    }

    /// Structural checks: schema, ids, ports, producers, acyclicity and
    /// whether every mux can obtain its stream parameters.
    pub fn validate(&self) -> Result<()> {
        if self.graph_schema_version != GRAPH_SCHEMA_VERSION {
            return Err(EngineError::Config(format!(
                "Graph schema mismatch: expected {GRAPH_SCHEMA_VERSION}, got {}",
                self.graph_schema_version
            )));
        }
        if self.tasks.is_empty() {
            return Err(wiring("at least one task is required".into()));
        }
        let index = self.task_index()?;

        let lookup = |id: &str| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| wiring(format!("link references unknown task `{id}`")))
        };
        let mut fed = BTreeSet::new();
        let mut edges = Vec::with_capacity(self.links.len());
        for link in &self.links {
            let src = lookup(link.from.0.as_str())?;
            let dst = lookup(link.to.0.as_str())?;
            let (_, outputs) = self.tasks[src].kind().arity();
            let (inputs, _) = self.tasks[dst].kind().arity();
            if link.from.1 >= outputs {
                return Err(wiring(format!(
                    "`{}` has {outputs} output(s), link uses port {}",
                    link.from.0, link.from.1
                )));
            }
            if link.to.1 >= inputs {
                return Err(wiring(format!(
                    "`{}` has {inputs} input(s), link uses port {}",
                    link.to.0, link.to.1
                )));
            }
            if !fed.insert((dst, link.to.1)) {
                return Err(wiring(format!(
                    "input {} of `{}` has more than one producer",
                    link.to.1, link.to.0
                )));
            }
            edges.push((src, dst));
        }

        for (i, task) in self.tasks.iter().enumerate() {
            let kind = task.kind();
            let (inputs, _) = kind.arity();
            for port in 0..inputs {
                if kind.input_required(port) && !fed.contains(&(i, port)) {
                    return Err(wiring(format!(
                        "required input {port} of {kind} task `{}` is not linked",
                        task.id()
                    )));
                }
            }
        }

        if topological_order(self.tasks.len(), edges).is_none() {
            return Err(wiring("links contain a cycle".into()));
        }

        for task in &self.tasks {
            if let TaskConfig::Mux {
                id, params: None, ..
            } = task
            {
                match self.producer(id, MuxFrame::VIDEO).map(TaskConfig::kind) {
                    Some(TaskKind::Encode | TaskKind::Demux) => {}
                    other => {
                        return Err(wiring(format!(
                            "mux `{id}` needs explicit params; its video input comes from {}",
                            other.map_or("nothing".to_string(), |k| format!("a {k} task"))
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Stream parameters for a mux task without explicit ones.
    fn derive_mux_params(&self, mux_id: &str) -> Result<MuxingParams> {
        match self.producer(mux_id, MuxFrame::VIDEO) {
            Some(TaskConfig::Encode {
                options,
                width,
                height,
                ..
            }) => Ok(MuxingParams {
                codec: options.codec,
                width: *width,
                height: *height,
                framerate: options.framerate,
                time_base: Rational::new(options.framerate.den, options.framerate.num),
                audio: None,
            }),
            Some(TaskConfig::Demux { locator, .. }) => {
                let source = open_source(locator)?;
                Ok(MuxingParams {
                    audio: None,
                    ..source.params().clone()
                })
            }
            _ => Err(wiring(format!("mux `{mux_id}` needs explicit params"))),
        }
    }

    /// `(decode, encode, needed)` for every decode that feeds an encode
    /// directly with a pool smaller than the encoder keeps in flight.
    pub fn undersized_decode_pools(&self) -> Vec<(String, String, usize)> {
        let mut found = Vec::new();
        for task in &self.tasks {
            let TaskConfig::Encode { id, options, .. } = task else {
                continue;
            };
            if let Some(TaskConfig::Decode {
                id: decode_id,
                pool_size,
                ..
            }) = self.producer(id, 0)
            {
                let needed = options.min_decode_pool();
                if *pool_size < needed {
                    found.push((decode_id.clone(), id.clone(), needed));
                }
            }
        }
        found
    }

    fn instantiate(&self, ctx: &Arc<ExecutionContext>, task: &TaskConfig) -> Result<Box<dyn Task>> {
        let instance: Box<dyn Task> = match task {
            TaskConfig::Demux { locator, .. } => Box::new(DemuxFrame::make(locator)?),
            TaskConfig::Decode {
                codec,
                pool_size,
                coded_width,
                coded_height,
                ..
            } => Box::new(DecodeFrame::make(
                ctx,
                *codec,
                *pool_size,
                *coded_width,
                *coded_height,
            )?),
            TaskConfig::Encode {
                options,
                format,
                width,
                height,
                ..
            } => Box::new(EncodeFrame::make(
                ctx,
                options.clone(),
                *format,
                *width,
                *height,
            )?),
            TaskConfig::Convert {
                width,
                height,
                from,
                to,
                color,
                ..
            } => Box::new(ConvertSurface::make(
                ctx, *width, *height, *from, *to, *color,
            )?),
            TaskConfig::Resize {
                src_width,
                src_height,
                dst_width,
                dst_height,
                format,
                interpolation,
                ..
            } => Box::new(ResizeSurface::make(
                ctx,
                *src_width,
                *src_height,
                *dst_width,
                *dst_height,
                *format,
                *interpolation,
            )?),
            TaskConfig::Upload {
                width,
                height,
                format,
                ..
            } => Box::new(UploadFrame::make(ctx, *width, *height, *format)?),
            TaskConfig::Download {
                width,
                height,
                format,
                ..
            } => Box::new(DownloadSurface::make(ctx, *width, *height, *format)?),
            TaskConfig::Mux {
                id,
                locator,
                params,
            } => {
                let params = match params {
                    Some(params) => params.clone(),
                    None => self.derive_mux_params(id)?,
                };
                Box::new(MuxFrame::make(locator, &params)?)
            }
        };
        Ok(instance)
    }

    /// Validate, create the execution context and build the pipeline.
    pub fn build(&self) -> Result<Pipeline> {
        self.validate()?;
        let ctx = create_execution_context(self.backend, self.device, &self.context)?;
        self.build_with_context(&ctx)
    }

    /// Build every task on an existing context. `backend`, `device` and
    /// `context` of the graph are ignored.
    pub fn build_with_context(&self, ctx: &Arc<ExecutionContext>) -> Result<Pipeline> {
        self.validate()?;
        for (decode, encode, needed) in self.undersized_decode_pools() {
            warn!(
                decode = %decode,
                encode = %encode,
                needed,
                "decode pool is smaller than the encoder lookahead; decode will run out of slots"
            );
        }
        let mut pipeline = Pipeline::with_context(ctx, self.config.clone());
        for task in &self.tasks {
            let instance = self.instantiate(ctx, task)?;
            debug!(id = task.id(), kind = %task.kind(), "task built");
            pipeline.add_task(task.id(), instance)?;
        }
        for link in &self.links {
            pipeline.connect((&link.from.0, link.from.1), (&link.to.0, link.to.1))?;
        }
        pipeline.validate()?;
        info!(
            tasks = self.tasks.len(),
            links = self.links.len(),
            backend = ctx.backend().name(),
            "pipeline built from graph"
        );
        Ok(pipeline)
    }

    /// Stable hash of the canonical JSON form.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)
            .map_err(|err| EngineError::Config(format!("Failed to encode pipeline graph: {err}")))?;
        Ok(hash_bytes(&canonical))
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    // FNV-1a 64-bit.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_json(tasks: serde_json::Value, links: serde_json::Value) -> String {
        serde_json::json!({
            "graph_schema_version": GRAPH_SCHEMA_VERSION,
            "tasks": tasks,
            "links": links,
        })
        .to_string()
    }

    fn transform_json(locator: &str, convert_width: u32) -> String {
        graph_json(
            serde_json::json!([
                { "kind": "demux", "id": "src", "locator": locator },
                { "kind": "decode", "id": "dec", "codec": "raw",
                  "coded_width": 64, "coded_height": 32 },
                { "kind": "convert", "id": "cvt", "width": convert_width, "height": 32,
                  "from": "nv12", "to": "rgb" },
                { "kind": "download", "id": "down", "width": 64, "height": 32, "format": "rgb" }
            ]),
            serde_json::json!([
                { "from": ["src", 0], "to": ["dec", 0] },
                { "from": ["dec", 0], "to": ["cvt", 0] },
                { "from": ["cvt", 0], "to": ["down", 0] }
            ]),
        )
    }

    fn transform_graph() -> PipelineGraph {
        PipelineGraph::from_json_str(&transform_json("clip.ivf", 64)).expect("graph should parse")
    }

    /// A 64x32 reference clip in a fresh temp directory.
    fn reference_clip(prefix: &str) -> (std::path::PathBuf, String) {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let clip = dir.join("clip.ivf");
        let spec = crate::synth::SynthSpec {
            width: 64,
            height: 32,
            frames: 2,
            ..Default::default()
        };
        crate::synth::write_reference_clip(&clip, &spec).expect("write clip");
        let locator = clip.to_str().expect("utf8 path").to_string();
        (dir, locator)
    }

    #[test]
    fn graph_defaults_and_tagged_tasks_parse() {
        let graph = transform_graph();
        assert_eq!(graph.backend, BackendKind::Host);
        assert_eq!(graph.config, PipelineConfig::default());
        assert_eq!(graph.tasks[0].kind(), TaskKind::Demux);
        assert_eq!(graph.tasks[2].kind(), TaskKind::Convert);
        assert_eq!(graph.tasks[2].id(), "cvt");
        match &graph.tasks[2] {
            TaskConfig::Convert { color, .. } => assert_eq!(*color, ColorSpec::default()),
            other => panic!("unexpected task {other:?}"),
        }
        graph.validate().expect("graph should validate");
    }

    #[test]
    fn decode_pool_size_defaults_to_four() {
        let task: TaskConfig = serde_json::from_value(serde_json::json!({
            "kind": "decode", "id": "dec", "codec": "raw",
            "coded_width": 64, "coded_height": 32
        }))
        .expect("decode config");
        match task {
            TaskConfig::Decode { pool_size, .. } => assert_eq!(pool_size, 4),
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[test]
    fn schema_version_is_checked() {
        let missing = r#"{ "tasks": [] }"#;
        let err = PipelineGraph::from_json_str(missing).expect_err("missing version");
        assert!(err.to_string().contains("got missing"));
        assert_eq!(err.error_code(), 403);

        let wrong = r#"{ "graph_schema_version": 7, "tasks": [] }"#;
        let err = PipelineGraph::from_json_str(wrong).expect_err("wrong version");
        assert!(err.to_string().contains("expected 1, got 7"));

        let text = r#"{ "graph_schema_version": "1", "tasks": [] }"#;
        let err = PipelineGraph::from_json_str(text).expect_err("string version");
        assert!(err.to_string().contains("non-integer"));
    }

    #[test]
    fn unknown_task_kind_is_rejected() {
        let json = graph_json(
            serde_json::json!([{ "kind": "sharpen", "id": "x" }]),
            serde_json::json!([]),
        );
        let err = PipelineGraph::from_json_str(&json).expect_err("unknown kind");
        assert!(err.to_string().contains("Invalid pipeline graph JSON"));
    }

    #[test]
    fn validation_rejects_bad_wiring() {
        let mut graph = transform_graph();
        graph.tasks.push(graph.tasks[0].clone());
        let err = graph.validate().expect_err("duplicate id");
        assert!(err.to_string().contains("duplicate task id `src`"));
        assert_eq!(err.error_code(), 400);

        let mut graph = transform_graph();
        graph.links[1].from.1 = 3;
        let err = graph.validate().expect_err("port out of range");
        assert!(err.to_string().contains("link uses port 3"));

        let mut graph = transform_graph();
        graph.links.push(LinkConfig {
            from: ("dec".into(), 0),
            to: ("down".into(), 0),
        });
        let err = graph.validate().expect_err("two producers");
        assert!(err.to_string().contains("more than one producer"));

        let mut graph = transform_graph();
        graph.links.remove(2);
        let err = graph.validate().expect_err("unfed download");
        assert!(err.to_string().contains("required input 0 of download task `down`"));

        let mut graph = transform_graph();
        graph.links.remove(0);
        let err = graph.validate().expect_err("unfed decode");
        assert!(err.to_string().contains("required input 0 of decode task `dec`"));

        let mut graph = transform_graph();
        graph.links[2].to.0 = "nowhere".into();
        let err = graph.validate().expect_err("unknown task");
        assert!(err.to_string().contains("unknown task `nowhere`"));

        let graph = PipelineGraph::default();
        let err = graph.validate().expect_err("empty graph");
        assert!(err.to_string().contains("at least one task"));
    }

    #[test]
    fn validation_rejects_cycles() {
        let json = graph_json(
            serde_json::json!([
                { "kind": "resize", "id": "a", "src_width": 8, "src_height": 8,
                  "dst_width": 8, "dst_height": 8, "format": "rgb" },
                { "kind": "resize", "id": "b", "src_width": 8, "src_height": 8,
                  "dst_width": 8, "dst_height": 8, "format": "rgb" }
            ]),
            serde_json::json!([
                { "from": ["a", 0], "to": ["b", 0] },
                { "from": ["b", 0], "to": ["a", 0] }
            ]),
        );
        let graph = PipelineGraph::from_json_str(&json).expect("parse");
        let err = graph.validate().expect_err("cycle");
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn mux_without_params_needs_a_known_producer() {
        let json = graph_json(
            serde_json::json!([
                { "kind": "demux", "id": "src", "locator": "clip.ivf" },
                { "kind": "decode", "id": "dec", "codec": "raw",
                  "coded_width": 64, "coded_height": 32 },
                { "kind": "mux", "id": "out", "locator": "out.ivf" }
            ]),
            serde_json::json!([
                { "from": ["src", 0], "to": ["dec", 0] },
                { "from": ["dec", 0], "to": ["out", 0] }
            ]),
        );
        let graph = PipelineGraph::from_json_str(&json).expect("parse");
        let err = graph.validate().expect_err("mux params underivable");
        assert!(err.to_string().contains("needs explicit params"));
        assert!(err.to_string().contains("a decode task"));
    }

    fn transcode_json(pool_size: usize, b_frames: u32) -> String {
        graph_json(
            serde_json::json!([
                { "kind": "demux", "id": "src", "locator": "clip.ivf" },
                { "kind": "decode", "id": "dec", "codec": "raw", "pool_size": pool_size,
                  "coded_width": 64, "coded_height": 32 },
                { "kind": "encode", "id": "enc", "width": 64, "height": 32,
                  "options": { "codec": "raw", "gop_length": 8, "b_frames": b_frames,
                               "framerate": { "num": 25, "den": 1 } } },
                { "kind": "mux", "id": "out", "locator": "out.ivf" }
            ]),
            serde_json::json!([
                { "from": ["src", 0], "to": ["dec", 0] },
                { "from": ["dec", 0], "to": ["enc", 0] },
                { "from": ["enc", 0], "to": ["out", 0] }
            ]),
        )
    }

    #[test]
    fn mux_params_follow_the_encoder() {
        let graph = PipelineGraph::from_json_str(&transcode_json(4, 0)).expect("parse");
        graph.validate().expect("valid");
        let params = graph.derive_mux_params("out").expect("derived");
        assert_eq!(params.codec, CodecId::Raw);
        assert_eq!((params.width, params.height), (64, 32));
        assert_eq!(params.framerate, Rational::new(25, 1));
        assert_eq!(params.time_base, Rational::new(1, 25));
        assert!(params.audio.is_none());
    }

    #[test]
    fn decode_pools_smaller_than_the_encoder_lookahead_are_reported() {
        let graph = PipelineGraph::from_json_str(&transcode_json(4, 0)).expect("parse");
        assert!(graph.undersized_decode_pools().is_empty());

        let graph = PipelineGraph::from_json_str(&transcode_json(2, 2)).expect("parse");
        assert_eq!(
            graph.undersized_decode_pools(),
            vec![("dec".to_string(), "enc".to_string(), 4)]
        );

        let graph = PipelineGraph::from_json_str(&transcode_json(4, 2)).expect("parse");
        assert!(graph.undersized_decode_pools().is_empty());
    }

    #[test]
    fn build_wires_tasks_on_the_host_backend() {
        let (dir, locator) = reference_clip("vtc-graph-build");
        let graph = PipelineGraph::from_json_str(&transform_json(&locator, 64)).expect("parse");
        let pipeline = graph.build().expect("build");
        let task = pipeline.task("cvt").expect("convert task");
        assert_eq!(task.num_inputs(), 1);
        assert_eq!(task.num_outputs(), 1);
        assert_eq!(pipeline.task("src").map(|t| t.num_inputs()), Some(0));
        assert!(pipeline.task("missing").is_none());
        drop(pipeline);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn build_surfaces_factory_errors() {
        let (dir, locator) = reference_clip("vtc-graph-factory");
        let graph = PipelineGraph::from_json_str(&transform_json(&locator, 63)).expect("parse");
        graph.validate().expect("wiring is fine");
        let err = graph.build().err().expect("odd NV12 width");
        assert_eq!(err.error_code(), 200);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let graph = transform_graph();
        let a = graph.fingerprint().expect("fingerprint");
        assert_eq!(a, graph.fingerprint().expect("fingerprint"));
        assert_eq!(a.len(), 16);

        let mut other = graph.clone();
        other.config.progress_interval = 1;
        assert_ne!(a, other.fingerprint().expect("fingerprint"));
    }

    #[test]
    fn json_round_trip_keeps_the_graph() {
        let graph = transform_graph();
        let text = graph.to_json_pretty().expect("encode");
        let back = PipelineGraph::from_json_str(&text).expect("decode");
        assert_eq!(back, graph);
    }

    #[test]
    fn hash_bytes_matches_fnv1a() {
        assert_eq!(hash_bytes(b""), "cbf29ce484222325");
        assert_eq!(hash_bytes(b"a"), "af63dc4c8601ec8c");
    }
}
