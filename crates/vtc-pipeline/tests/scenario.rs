use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use vtc_container::IvfReader;
use vtc_core::buffer::Token;
use vtc_core::codec_traits::BitstreamSource;
use vtc_core::context::{ContextConfig, ExecutionContext};
use vtc_core::task::{Task, TaskExecStatus};
use vtc_core::types::{CodecId, ColorSpec, PixelFormat, Rational};
use vtc_pipeline::stages::{ConvertSurface, DecodeFrame, DemuxFrame, UploadFrame};
use vtc_pipeline::synth::{SynthSpec, pattern_frame, write_reference_clip};
use vtc_pipeline::{Pipeline, PipelineConfig, PipelineGraph, TaskConfig, run_concurrent};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("vtc_pipeline_{label}_{}_{}", std::process::id(), nanos));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn host_ctx() -> Arc<ExecutionContext> {
    vtc_host::execution_context(&ContextConfig::default()).expect("host context")
}

fn locator(path: &Path) -> &str {
    path.to_str().expect("utf8 path")
}

fn clip(dir: &Path, width: u32, height: u32, frames: u32) -> PathBuf {
    let path = dir.join("clip.ivf");
    let spec = SynthSpec {
        width,
        height,
        frames,
        ..SynthSpec::default()
    };
    write_reference_clip(&path, &spec).expect("write clip");
    path
}

/// Demux → Decode → Download → Upload → Convert → Resize.
fn scenario_graph(clip: &Path, out: (u32, u32)) -> PipelineGraph {
    let json = serde_json::json!({
        "graph_schema_version": 1,
        "backend": "host",
        "config": { "progress_interval": 0 },
        "tasks": [
            { "kind": "demux", "id": "src", "locator": locator(clip) },
            { "kind": "decode", "id": "dec", "codec": "raw", "pool_size": 4,
              "coded_width": 1920, "coded_height": 1080 },
            { "kind": "download", "id": "down", "width": 1920, "height": 1080, "format": "nv12" },
            { "kind": "upload", "id": "up", "width": 1920, "height": 1080, "format": "nv12" },
            { "kind": "convert", "id": "rgb", "width": 1920, "height": 1080,
              "from": "nv12", "to": "rgb" },
            { "kind": "resize", "id": "scale", "src_width": 1920, "src_height": 1080,
              "dst_width": out.0, "dst_height": out.1, "format": "rgb" }
        ],
        "links": [
            { "from": ["src", 0], "to": ["dec", 0] },
            { "from": ["dec", 0], "to": ["down", 0] },
            { "from": ["down", 0], "to": ["up", 0] },
            { "from": ["up", 0], "to": ["rgb", 0] },
            { "from": ["rgb", 0], "to": ["scale", 0] }
        ]
    });
    PipelineGraph::from_json_str(&json.to_string()).expect("scenario graph")
}

#[test]
fn ten_frame_clip_becomes_ten_rgb_720p_surfaces() {
    let dir = unique_temp_dir("scenario");
    let path = clip(&dir, 1920, 1080, 10);
    let mut pipeline = scenario_graph(&path, (1280, 720)).build().expect("build");

    let mut surfaces = 0;
    let mut last_pts = None;
    while pipeline.step().expect("cycle") {
        if let Some(Token::Params(params)) = pipeline.output("src", DemuxFrame::PARAMS) {
            assert_eq!(params.framerate, Rational::new(30, 1));
            assert_eq!((params.width, params.height), (1920, 1080));
        }
        if let Some(token) = pipeline.output("scale", 0) {
            let surface = token.as_surface().expect("device surface");
            assert_eq!(surface.format(), PixelFormat::Rgb);
            assert_eq!((surface.width(), surface.height()), (1280, 720));
            if let Some(prev) = last_pts {
                assert!(surface.pts > prev, "frames leave in display order");
            }
            last_pts = Some(surface.pts);
            surfaces += 1;
        }
    }
    assert_eq!(surfaces, 10);
    assert!(pipeline.is_finished());

    let report = pipeline.report();
    assert!(report.finished);
    assert_eq!(report.backend, "host");
    let scale = report
        .tasks
        .iter()
        .find(|t| t.id == "scale")
        .expect("resize report");
    assert_eq!(scale.stats.outputs, 10);
    assert_eq!(report.metrics.failures, 0);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn demux_framerate_is_stable_across_the_clip() {
    let dir = unique_temp_dir("framerate");
    let path = clip(&dir, 64, 32, 5);
    let mut demux = DemuxFrame::make(locator(&path)).expect("demux");
    let mut seen = 0;
    loop {
        match demux.execute() {
            TaskExecStatus::Success => {
                assert_eq!(demux.framerate(), Some(Rational::new(30, 1)));
                seen += 1;
            }
            TaskExecStatus::EndOfStream => break,
            TaskExecStatus::Fail => panic!("demux failed: {:?}", demux.last_error()),
        }
    }
    assert_eq!(seen, 5);
    assert_eq!(demux.framerate(), Some(Rational::new(30, 1)));
    for _ in 0..3 {
        assert_eq!(demux.execute(), TaskExecStatus::EndOfStream);
    }
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn held_decode_surfaces_exhaust_the_pool() {
    let dir = unique_temp_dir("pool");
    let path = clip(&dir, 64, 32, 6);
    let ctx = host_ctx();
    let mut demux = DemuxFrame::make(locator(&path)).expect("demux");
    let mut decode = DecodeFrame::make(&ctx, CodecId::Raw, 4, 64, 32).expect("decode");

    let mut held = Vec::new();
    let mut failure = None;
    for _ in 0..6 {
        demux.clear_outputs();
        assert_eq!(demux.execute(), TaskExecStatus::Success);
        let packet = demux.output(DemuxFrame::PACKETS).cloned().expect("packet");
        decode.clear_outputs();
        decode.set_input(0, packet).expect("input");
        match decode.execute() {
            TaskExecStatus::Success => held.push(decode.output(0).cloned().expect("surface")),
            TaskExecStatus::Fail => {
                failure = decode.last_error().map(|e| (e.error_code(), e.to_string()));
                break;
            }
            TaskExecStatus::EndOfStream => panic!("decoder ended early"),
        }
    }
    assert_eq!(held.len(), 4);
    assert_eq!(decode.surfaces_in_use(), 4);
    let (code, message) = failure.expect("fifth picture must fail");
    assert_eq!(code, 700);
    assert!(message.contains("exhausted"));

    held.clear();
    assert_eq!(decode.surfaces_in_use(), 0);
    // Fail is latched for the rest of the run.
    assert_eq!(decode.execute(), TaskExecStatus::Fail);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn surface_from_another_context_fails_the_task() {
    let producer = host_ctx();
    let consumer = host_ctx();
    let mut upload = UploadFrame::make(&producer, 16, 8, PixelFormat::Nv12).expect("upload");
    let mut convert = ConvertSurface::make(
        &consumer,
        16,
        8,
        PixelFormat::Nv12,
        PixelFormat::Rgb,
        ColorSpec::default(),
    )
    .expect("convert");

    let frame = pattern_frame(16, 8, 0).expect("frame");
    upload.set_input(0, Token::Host(frame)).expect("input");
    assert_eq!(upload.execute(), TaskExecStatus::Success);
    let surface = upload.output(0).cloned().expect("surface");

    convert.set_input(0, surface).expect("input");
    assert_eq!(convert.execute(), TaskExecStatus::Fail);
    let err = convert.last_error().expect("error recorded");
    assert_eq!(err.error_code(), 503);
    assert!(err.to_string().contains("Context mismatch"));
    assert!(convert.output(0).is_none());
}

#[test]
fn transcode_graph_writes_an_ivf_file() {
    let dir = unique_temp_dir("transcode");
    let input = clip(&dir, 64, 32, 8);
    let output = dir.join("out.ivf");
    let json = serde_json::json!({
        "graph_schema_version": 1,
        "tasks": [
            { "kind": "demux", "id": "src", "locator": locator(&input) },
            { "kind": "decode", "id": "dec", "codec": "raw", "coded_width": 64, "coded_height": 32 },
            { "kind": "resize", "id": "half", "src_width": 64, "src_height": 32,
              "dst_width": 32, "dst_height": 16, "format": "nv12",
              "interpolation": "nearest" },
            { "kind": "encode", "id": "enc", "width": 32, "height": 16,
              "options": { "codec": "raw", "gop_length": 4, "b_frames": 1,
                           "framerate": { "num": 30, "den": 1 } } },
            { "kind": "mux", "id": "sink", "locator": locator(&output) }
        ],
        "links": [
            { "from": ["src", 0], "to": ["dec", 0] },
            { "from": ["dec", 0], "to": ["half", 0] },
            { "from": ["half", 0], "to": ["enc", 0] },
            { "from": ["enc", 0], "to": ["sink", 0] }
        ]
    });
    let graph = PipelineGraph::from_json_str(&json.to_string()).expect("graph");
    let report = graph.build().expect("build").run().expect("run");
    assert!(report.finished);
    let sink = report.tasks.iter().find(|t| t.id == "sink").expect("mux report");
    assert_eq!(sink.num_outputs, 0);

    let mut reader = IvfReader::open(&output).expect("output exists");
    assert_eq!(reader.params().codec, CodecId::Raw);
    assert_eq!((reader.params().width, reader.params().height), (32, 16));
    assert_eq!(reader.params().framerate, Rational::new(30, 1));
    let mut packets = 0;
    while reader.read_packet().expect("read").is_some() {
        packets += 1;
    }
    assert_eq!(packets, 8);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn invalid_task_configuration_builds_nothing() {
    let dir = unique_temp_dir("invalid");
    let path = clip(&dir, 64, 32, 2);
    let mut graph = scenario_graph(&path, (0, 720));
    let err = graph.build().err().expect("zero-width resize");
    assert_eq!(err.error_code(), 200);

    graph = scenario_graph(Path::new("/nonexistent/vtc/clip.ivf"), (1280, 720));
    let err = graph.build().err().expect("missing clip");
    assert_eq!(err.error_code(), 202);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn failing_task_stops_the_run_with_its_code() {
    let dir = unique_temp_dir("failure");
    let path = clip(&dir, 64, 32, 3);
    // Convert expects 32x32; the stream decodes to 64x32.
    let json = serde_json::json!({
        "graph_schema_version": 1,
        "tasks": [
            { "kind": "demux", "id": "src", "locator": locator(&path) },
            { "kind": "decode", "id": "dec", "codec": "raw", "coded_width": 64, "coded_height": 32 },
            { "kind": "convert", "id": "rgb", "width": 32, "height": 32,
              "from": "nv12", "to": "rgb" }
        ],
        "links": [
            { "from": ["src", 0], "to": ["dec", 0] },
            { "from": ["dec", 0], "to": ["rgb", 0] }
        ]
    });
    let graph = PipelineGraph::from_json_str(&json.to_string()).expect("graph");
    let err = graph.build().expect("build").run().expect_err("geometry mismatch");
    assert!(err.to_string().contains("Task `rgb` failed with error code 501"));
    assert_eq!(err.error_code(), 401);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_pipelines_finish_independently() {
    let dir = unique_temp_dir("concurrent");
    let path = clip(&dir, 64, 32, 4);
    let graph = |dst: u32| {
        let json = serde_json::json!({
            "graph_schema_version": 1,
            "tasks": [
                { "kind": "demux", "id": "src", "locator": locator(&path) },
                { "kind": "decode", "id": "dec", "codec": "raw",
                  "coded_width": 64, "coded_height": 32 },
                { "kind": "resize", "id": "scale", "src_width": 64, "src_height": 32,
                  "dst_width": dst, "dst_height": dst / 2, "format": "nv12" }
            ],
            "links": [
                { "from": ["src", 0], "to": ["dec", 0] },
                { "from": ["dec", 0], "to": ["scale", 0] }
            ]
        });
        PipelineGraph::from_json_str(&json.to_string()).expect("graph")
    };
    let pipelines: Vec<Pipeline> = [32, 128]
        .into_iter()
        .map(|dst| graph(dst).build().expect("build"))
        .collect();

    let results = run_concurrent(pipelines, CancellationToken::new()).await;
    assert_eq!(results.len(), 2);
    for result in results {
        let report = result.expect("pipeline run");
        assert!(report.finished);
        let scale = report.tasks.iter().find(|t| t.id == "scale").expect("scale");
        assert_eq!(scale.stats.outputs, 4);
    }
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn cancelled_token_stops_before_the_end() {
    let dir = unique_temp_dir("cancel");
    let path = clip(&dir, 64, 32, 4);
    let mut graph = scenario_graph(&path, (1280, 720));
    graph.tasks.truncate(2);
    graph.links.truncate(1);
    for task in &mut graph.tasks {
        if let TaskConfig::Decode {
            coded_width,
            coded_height,
            ..
        } = task
        {
            (*coded_width, *coded_height) = (64, 32);
        }
    }
    let mut pipeline = graph.build().expect("build");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline
        .run_until_cancelled(&cancel)
        .expect_err("cancelled");
    assert_eq!(err.error_code(), 402);
    assert!(!pipeline.is_finished());
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn report_serializes_to_json() {
    let mut pipeline = Pipeline::new(PipelineConfig::default());
    let err = pipeline.run().expect_err("empty pipeline");
    assert!(err.to_string().contains("no tasks"));

    let value = serde_json::to_value(pipeline.report()).expect("report json");
    assert_eq!(value["backend"], "none");
    assert_eq!(value["finished"], false);
    assert!(value["tasks"].as_array().expect("tasks").is_empty());
}
