//! vtc CLI entrypoint.
//!
//! ```bash
//! vtc synth --output clip.ivf --width 1280 --height 720 --frames 30
//! vtc probe --input clip.ivf
//! vtc validate --graph graph.json --build
//! vtc run --graph graph.json --jobs 4
//! ```
//!
//! Every command prints one JSON document on stdout. Logs go to stderr.
//! A failing command exits with its error code.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vtc_core::error::{EngineError, Result};
use vtc_core::types::Rational;
use vtc_pipeline::synth::{SynthSpec, write_reference_clip};
use vtc_pipeline::{BackendKind, PipelineGraph, available_backends, run_concurrent};

const JSON_SCHEMA_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "vtc",
    version,
    about = "Task-graph video transcode engine",
    arg_required_else_help = true,
    after_help = "Examples:\n  vtc synth --output clip.ivf --width 640 --height 360 --frames 30\n  vtc probe --input clip.ivf\n  vtc validate --graph graph.json --build\n  vtc run --graph graph.json --backend nvidia --jobs 2"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a reference-codec IVF clip of a moving test pattern.
    Synth(SynthArgs),
    /// Read a container and summarize its video stream.
    Probe(ProbeArgs),
    /// Check a pipeline graph without running it.
    Validate(ValidateArgs),
    /// Build and run a pipeline graph.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct SynthArgs {
    /// Output IVF file.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    #[arg(long, default_value_t = 10)]
    frames: u32,

    /// Frame rate as N/D or N.
    #[arg(long, default_value = "30/1", value_parser = parse_rational)]
    fps: Rational,

    /// Keyframe interval in frames.
    #[arg(long, default_value_t = 30)]
    gop: u32,

    /// Reordered frames between anchors.
    #[arg(long = "b-frames", default_value_t = 0)]
    b_frames: u32,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Container path (`.ivf`, or any format FFmpeg reads when built with `ffmpeg-runtime`).
    #[arg(short = 'i', long = "input")]
    input: String,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Pipeline graph JSON file.
    #[arg(short = 'g', long = "graph")]
    graph: PathBuf,

    /// Also create the execution context and instantiate every task.
    #[arg(long)]
    build: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Pipeline graph JSON file.
    #[arg(short = 'g', long = "graph")]
    graph: PathBuf,

    /// Override the graph backend (host, cuda, nvidia).
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Override the device ordinal.
    #[arg(long)]
    device: Option<usize>,

    /// VRAM cap in MiB. 0 = unlimited.
    #[arg(long = "vram-limit")]
    vram_limit_mb: Option<usize>,

    /// Fail allocations past the VRAM cap instead of warning.
    #[arg(long = "strict-vram-limit")]
    strict_vram_limit: bool,

    /// Fail the run on any recorded host copy.
    #[arg(long = "strict-no-host-copies")]
    strict_no_host_copies: bool,

    /// Independent instances of the graph to run at once.
    #[arg(short = 'j', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=64))]
    jobs: u32,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let command = match &cli.command {
        Commands::Synth(_) => "synth",
        Commands::Probe(_) => "probe",
        Commands::Validate(_) => "validate",
        Commands::Run(_) => "run",
    };

    let result = match cli.command {
        Commands::Synth(args) => run_synth(args),
        Commands::Probe(args) => run_probe(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Run(args) => run_graph(args),
    };

    match result {
        Ok(value) => {
            println!("{value}");
            std::process::exit(0);
        }
        Err(err) => {
            println!("{}", command_error_json(command, &err));
            tracing::error!(error = %err, code = err.error_code(), "Command failed");
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(EngineError::from)
}

fn parse_rational(value: &str) -> std::result::Result<Rational, String> {
    match value.parse::<Rational>() {
        Ok(r) if r.is_valid() => Ok(r),
        _ => Err(format!("expected a positive N/D rational, got `{value}`")),
    }
}

fn command_error_json(command: &str, err: &EngineError) -> Value {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": {
            "code": err.error_code(),
            "category": err.category(),
            "message": err.to_string(),
        },
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|err| EngineError::InvariantViolation(format!("failed to encode JSON: {err}")))
}

fn backend_names() -> Vec<&'static str> {
    available_backends().into_iter().map(|b| b.as_str()).collect()
}

// ─── Commands ───────────────────────────────────────────────────────────────

fn run_synth(args: SynthArgs) -> Result<Value> {
    let spec = SynthSpec {
        width: args.width,
        height: args.height,
        frames: args.frames,
        framerate: args.fps,
        gop_length: args.gop,
        b_frames: args.b_frames,
    };
    let params = write_reference_clip(&args.output, &spec)?;
    info!(output = %args.output.display(), frames = spec.frames, "reference clip written");
    Ok(json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": "synth",
        "ok": true,
        "output": args.output.display().to_string(),
        "frames": spec.frames,
        "params": to_json(&params)?,
    }))
}

fn run_probe(args: ProbeArgs) -> Result<Value> {
    let mut source = vtc_container::open_source(&args.input)?;
    let params = to_json(source.params())?;

    let mut packets = 0u64;
    let mut keyframes = 0u64;
    let mut bytes = 0u64;
    let mut first_pts: Option<i64> = None;
    let mut end_pts: Option<i64> = None;
    while let Some(packet) = source.read_packet()? {
        packets += 1;
        keyframes += u64::from(packet.is_keyframe);
        bytes += packet.data.len() as u64;
        first_pts = Some(first_pts.map_or(packet.pts, |p| p.min(packet.pts)));
        let end = packet.pts + packet.duration;
        end_pts = Some(end_pts.map_or(end, |p| p.max(end)));
    }
    let duration_us = first_pts.zip(end_pts).map_or(0, |(s, e)| e - s);

    Ok(json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": "probe",
        "ok": true,
        "input": args.input,
        "params": params,
        "packets": packets,
        "keyframes": keyframes,
        "bytes": bytes,
        "duration_us": duration_us,
        "backends": backend_names(),
        "ffmpeg_runtime": vtc_container::FFMPEG_RUNTIME,
    }))
}

fn run_validate(args: ValidateArgs) -> Result<Value> {
    let graph = PipelineGraph::from_json_file(&args.graph)?;
    graph.validate()?;
    if args.build {
        graph.build()?;
    }
    Ok(json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": "validate",
        "ok": true,
        "graph": args.graph.display().to_string(),
        "backend": graph.backend.as_str(),
        "tasks": graph.tasks.len(),
        "links": graph.links.len(),
        "built": args.build,
        "fingerprint": graph.fingerprint()?,
    }))
}

fn run_graph(args: RunArgs) -> Result<Value> {
    let mut graph = PipelineGraph::from_json_file(&args.graph)?;
    if let Some(backend) = args.backend {
        graph.backend = backend;
    }
    if let Some(device) = args.device {
        graph.device = device;
    }
    if let Some(mb) = args.vram_limit_mb {
        graph.context.vram_limit_bytes = mb.saturating_mul(1024 * 1024);
    }
    graph.context.strict_vram_limit |= args.strict_vram_limit;
    graph.config.strict_no_host_copies |= args.strict_no_host_copies;

    let fingerprint = graph.fingerprint()?;
    let pipelines = (0..args.jobs)
        .map(|_| graph.build())
        .collect::<Result<Vec<_>>>()?;
    info!(
        backend = %graph.backend,
        jobs = args.jobs,
        fingerprint = %fingerprint,
        "running graph"
    );

    let results = build_runtime()?.block_on(async move {
        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling pipelines");
                    cancel.cancel();
                }
            })
        };
        let results = run_concurrent(pipelines, cancel).await;
        interrupt.abort();
        results
    });

    let reports = results
        .into_iter()
        .map(|r| r.and_then(|report| to_json(&report)))
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": "run",
        "ok": true,
        "graph": args.graph.display().to_string(),
        "backend": graph.backend.as_str(),
        "fingerprint": fingerprint,
        "reports": reports,
    }))
}
