use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pitchtrack::frame::{ImageSequence, ImageSequenceWriter};
use pitchtrack::pipeline::output_path;
use pitchtrack::video::{VideoFile, VideoWriter};
use pitchtrack::{DetectionLog, FrameSink, FrameSource, Pipeline, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "pitchtrack", about = "Football match tracking, possession and kinematics")]
struct Args {
    /// Video file, or a directory of frame images
    input: PathBuf,
    /// Annotated output; defaults to `<input stem>_processed`
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// JSON pipeline configuration
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Recorded detections, one `frame:[...]` JSON line per frame
    #[arg(long)]
    detections: PathBuf,
    /// Analysis report; defaults to the output path with a `.json` extension
    #[arg(long)]
    report: Option<PathBuf>,
    /// Directory for tracking and camera caches
    #[arg(long)]
    stub_dir: Option<PathBuf>,
    /// Recompute even when caches exist
    #[arg(long)]
    no_stub_read: bool,
    /// Frame rate of image-directory input
    #[arg(long, default_value_t = 24.0, value_parser = positive_fps)]
    fps: f32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    apply_args(&mut config, &args);

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| output_path(&args.input, config.output_dir.as_deref()));
    let report_path = args.report.clone().unwrap_or_else(|| output.with_extension("json"));

    let detector = DetectionLog::open(&args.detections)
        .with_context(|| format!("reading detections {}", args.detections.display()))?;
    info!(frames = detector.len(), "detections loaded");

    let (source, mut sink) = open_io(&args.input, &output, args.fps)?;
    let mut pipeline = Pipeline::new(detector, config)?;

    let mut report = pipeline
        .run(&*source, &mut *sink)
        .with_context(|| format!("processing {}", args.input.display()))?;
    report.output_video = Some(output.clone());

    report
        .save(&report_path)
        .with_context(|| format!("writing report {}", report_path.display()))?;

    info!(video = %output.display(), report = %report_path.display(), "done");
    Ok(())
}

fn positive_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value.parse().map_err(|e| format!("{}", e))?;
    if fps.is_finite() && fps > 0.0 {
        Ok(fps)
    } else {
        Err(format!("frame rate must be positive, got {}", value))
    }
}

fn apply_args(config: &mut PipelineConfig, args: &Args) {
    if let Some(dir) = &args.stub_dir {
        let stem = args
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());

        config.stubs.tracks = Some(dir.join(format!("{}_tracks.stub", stem)));
        config.stubs.camera = Some(dir.join(format!("{}_camera.stub", stem)));
    }

    if args.no_stub_read {
        config.stubs.read_from_stub = false;
    }
}

type Io = (Box<dyn FrameSource>, Box<dyn FrameSink>);

fn open_io(input: &Path, output: &Path, fps: f32) -> Result<Io> {
    if input.is_dir() {
        let source: Box<dyn FrameSource> = Box::new(ImageSequence::open(input, fps)?);
        let sink: Box<dyn FrameSink> = Box::new(ImageSequenceWriter::create(output)?);
        return Ok((source, sink));
    }

    let video = VideoFile::open(input)?;
    let sink: Box<dyn FrameSink> = Box::new(VideoWriter::new(output, video.fps()));
    let source: Box<dyn FrameSource> = Box::new(video);
    Ok((source, sink))
}
