use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use faceswap::annotate::annotate_faces;
use faceswap::batch::{self, BatchSummary, SwapProgress};
use faceswap::{AnalysisPackage, FaceSwapper, MultiFacePolicy, SwapperOptions};

#[derive(Parser, Debug)]
#[command(name = "faceswap", version, about = "Detect, align and swap faces")]
struct Cli {
    /// JSON file with model paths and pipeline options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run on the CUDA execution provider
    #[arg(long, global = true)]
    gpu: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the faces found in an image as JSON
    Detect {
        image: PathBuf,

        /// Write a copy of the image with boxes and keypoints drawn on it
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Swap the faces of one image into another
    Swap {
        source: PathBuf,
        target: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum)]
        policy: Option<Policy>,
    },
    /// Swap the faces of one image into every image of a directory
    SwapDir {
        source: PathBuf,
        target_dir: PathBuf,
        #[arg(short, long)]
        output_dir: PathBuf,
        /// Prefix output names with the source file's stem
        #[arg(long)]
        prepend_name: bool,
        #[arg(long, value_enum)]
        policy: Option<Policy>,
    },
    /// Swap the faces of one image into extracted video frames
    SwapFrames {
        source: PathBuf,
        frames_dir: PathBuf,
        #[arg(short, long)]
        output_dir: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Policy {
    First,
    Last,
    Alternate,
    FitMax,
}

impl From<Policy> for MultiFacePolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::First => MultiFacePolicy::FirstSourceToAllTargets,
            Policy::Last => MultiFacePolicy::LastSourceToAllTargets,
            Policy::Alternate => MultiFacePolicy::AlternateSourcesToTargets,
            Policy::FitMax => MultiFacePolicy::FitMaxSourcesToTargets,
        }
    }
}

#[derive(Serialize)]
struct DetectionOutput {
    bbox: [f32; 4],
    score: f32,
    keypoints: Vec<[f32; 2]>,
    order_left_to_right: usize,
    size_fraction: f32,
}

fn load_options(cli: &Cli) -> Result<SwapperOptions> {
    let mut options = match &cli.config {
        Some(path) => SwapperOptions::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => SwapperOptions::default(),
    };
    if cli.gpu {
        options.use_gpu = true;
    }
    Ok(options)
}

fn open_rgb(path: &Path) -> Result<image::RgbImage> {
    let image = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(image.to_rgb8())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Log progress every couple of seconds until `done` is set.
fn report_progress(progress: &SwapProgress, done: &AtomicBool) {
    let mut last_logged = 0;
    while !done.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_secs(2));
        let processed = progress.frames_processed();
        if processed == last_logged {
            continue;
        }
        last_logged = processed;
        info!(
            processed,
            total = progress.frames_total(),
            percent = progress.percent_complete(),
            remaining = ?progress.estimated_remaining(),
            "progress"
        );
    }
}

fn run_batch<F>(job: F) -> Result<BatchSummary>
where
    F: FnOnce(&SwapProgress) -> faceswap::Result<BatchSummary>,
{
    let progress = SwapProgress::default();
    let done = AtomicBool::new(false);
    let summary = thread::scope(|scope| {
        scope.spawn(|| report_progress(&progress, &done));
        let summary = job(&progress);
        done.store(true, Ordering::Relaxed);
        summary
    })?;
    print_json(&progress.snapshot())?;
    Ok(summary)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = load_options(&cli)?;
    let swapper = FaceSwapper::from_options(options).context("failed to set up the pipeline")?;

    match cli.command {
        Command::Detect { image, annotate } => {
            let rgb = open_rgb(&image)?;
            let faces = swapper.detect(&rgb)?;
            let output: Vec<DetectionOutput> = faces
                .iter()
                .map(|f| DetectionOutput {
                    bbox: f.bbox.to_array(),
                    score: f.score,
                    keypoints: f.keypoints.as_slice().iter().map(|p| [p.x, p.y]).collect(),
                    order_left_to_right: f.order_left_to_right,
                    size_fraction: f.size_fraction(),
                })
                .collect();
            print_json(&output)?;

            if let Some(path) = annotate {
                annotate_faces(&rgb, &faces)
                    .save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        Command::Swap {
            source,
            target,
            output,
            policy,
        } => {
            let source_image = open_rgb(&source)?;
            let target_image = open_rgb(&target)?;
            let (merged, report) =
                swapper.swap_images(&source_image, &target_image, policy.map(Into::into))?;
            merged
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            print_json(&report)?;
        }
        Command::SwapDir {
            source,
            target_dir,
            output_dir,
            prepend_name,
            policy,
        } => {
            let summary = run_batch(|progress| {
                batch::swap_dir(
                    &swapper,
                    &source,
                    &target_dir,
                    &output_dir,
                    prepend_name,
                    policy.map(Into::into),
                    progress,
                )
            })?;
            print_json(&summary)?;
        }
        Command::SwapFrames {
            source,
            frames_dir,
            output_dir,
        } => {
            let source_image = open_rgb(&source)?;
            let source_faces = swapper.analyze_faces(&source_image, AnalysisPackage::SwapOnly)?;
            if source_faces.is_empty() {
                bail!("no face found in {}", source.display());
            }
            let frames = batch::list_files(&frames_dir)
                .with_context(|| format!("failed to list {}", frames_dir.display()))?;
            let summary = run_batch(|progress| {
                batch::swap_frames(&swapper, &source_faces, &frames, &output_dir, progress)
            })?;
            print_json(&summary)?;
        }
    }

    Ok(())
}
