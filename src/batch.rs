use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::swapper::{AnalysisPackage, Face, FaceSwapper, MultiFacePolicy};

/// Counters shared by the workers of a batch.
#[derive(Debug)]
pub struct SwapProgress {
    frames_total: AtomicUsize,
    frames_processed: AtomicUsize,
    faces_swapped: AtomicUsize,
    faces_failed: AtomicUsize,
    started: Instant,
}

/// Plain copy of [`SwapProgress`] at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub frames_total: usize,
    pub frames_processed: usize,
    pub faces_swapped: usize,
    pub faces_failed: usize,
    pub percent_complete: f32,
}

impl Default for SwapProgress {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SwapProgress {
    pub fn new(frames_total: usize) -> Self {
        SwapProgress {
            frames_total: AtomicUsize::new(frames_total),
            frames_processed: AtomicUsize::new(0),
            faces_swapped: AtomicUsize::new(0),
            faces_failed: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn set_total(&self, frames: usize) {
        self.frames_total.store(frames, Ordering::Relaxed);
    }

    pub fn frame_done(&self, swapped: usize, failed: usize) {
        self.faces_swapped.fetch_add(swapped, Ordering::Relaxed);
        self.faces_failed.fetch_add(failed, Ordering::Relaxed);
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_total(&self) -> usize {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn faces_swapped(&self) -> usize {
        self.faces_swapped.load(Ordering::Relaxed)
    }

    pub fn faces_failed(&self) -> usize {
        self.faces_failed.load(Ordering::Relaxed)
    }

    pub fn percent_complete(&self) -> f32 {
        let total = self.frames_total();
        if total == 0 {
            return 100.0;
        }
        (self.frames_processed() as f32 / total as f32 * 100.0).min(100.0)
    }

    /// Linear extrapolation from the frames done so far; `None` until the
    /// first frame finishes.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let done = self.frames_processed();
        if done == 0 {
            return None;
        }
        let remaining = self.frames_total().saturating_sub(done);
        let per_frame = self.started.elapsed().as_secs_f64() / done as f64;
        Some(Duration::from_secs_f64(per_frame * remaining as f64))
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            frames_total: self.frames_total(),
            frames_processed: self.frames_processed(),
            faces_swapped: self.faces_swapped(),
            faces_failed: self.faces_failed(),
            percent_complete: self.percent_complete(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Frames that had at least one face and were re-encoded.
    pub swapped: Vec<PathBuf>,
    /// Frames without faces, copied through unchanged.
    pub copied: Vec<PathBuf>,
    pub failures: Vec<FrameFailure>,
}

enum FrameResult {
    Swapped(PathBuf),
    Copied(PathBuf),
}

fn thread_pool(parallelism: usize) -> Result<rayon::ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .build()?)
}

fn process_frame(
    swapper: &FaceSwapper,
    source_faces: &[Face],
    frame: &Path,
    output: &Path,
    policy: Option<MultiFacePolicy>,
    progress: &SwapProgress,
) -> Result<FrameResult> {
    let image = image::open(frame)?.to_rgb8();
    let targets = swapper.analyze_faces(&image, AnalysisPackage::SwapOnly)?;

    if targets.is_empty() {
        fs::copy(frame, output)?;
        progress.frame_done(0, 0);
        return Ok(FrameResult::Copied(output.to_path_buf()));
    }

    let (merged, report) = swapper.swap_faces(source_faces, &targets, &image, policy)?;
    merged.save(output)?;
    progress.frame_done(report.swapped(), report.failed());
    Ok(FrameResult::Swapped(output.to_path_buf()))
}

fn run_jobs(
    swapper: &FaceSwapper,
    source_faces: &[Face],
    jobs: Vec<(PathBuf, PathBuf)>,
    policy: Option<MultiFacePolicy>,
    progress: &SwapProgress,
) -> Result<BatchSummary> {
    progress.set_total(jobs.len());
    let pool = thread_pool(swapper.options().parallelism)?;
    let summary = Mutex::new(BatchSummary::default());

    pool.install(|| {
        jobs.par_iter().for_each(|(frame, output)| {
            let result = process_frame(swapper, source_faces, frame, output, policy, progress);
            let mut summary = match summary.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match result {
                Ok(FrameResult::Swapped(path)) => summary.swapped.push(path),
                Ok(FrameResult::Copied(path)) => summary.copied.push(path),
                Err(e) => {
                    warn!(frame = %frame.display(), error = %e, "frame failed");
                    progress.frame_done(0, 0);
                    summary.failures.push(FrameFailure {
                        path: frame.clone(),
                        error: e.to_string(),
                    });
                }
            }
        })
    });

    let mut summary = summary.into_inner().unwrap_or_else(|p| p.into_inner());
    summary.swapped.sort();
    summary.copied.sort();

    info!(
        swapped = summary.swapped.len(),
        copied = summary.copied.len(),
        failed = summary.failures.len(),
        elapsed = ?progress.started.elapsed(),
        "batch finished"
    );
    Ok(summary)
}

/// Swap `source_faces` into every frame, writing each result to
/// `output_dir` under the frame's own file name so the sequence can be
/// reassembled by name. Frames without faces are copied as they are.
///
/// Failures of single frames are collected in the summary.
pub fn swap_frames(
    swapper: &FaceSwapper,
    source_faces: &[Face],
    frame_paths: &[PathBuf],
    output_dir: &Path,
    progress: &SwapProgress,
) -> Result<BatchSummary> {
    if source_faces.is_empty() {
        return Err(Error::input("no source faces to swap"));
    }
    fs::create_dir_all(output_dir)?;

    let mut jobs = Vec::with_capacity(frame_paths.len());
    for frame in frame_paths {
        let name = frame
            .file_name()
            .ok_or_else(|| Error::input(format!("frame path has no file name: {}", frame.display())))?;
        jobs.push((frame.clone(), output_dir.join(name)));
    }

    run_jobs(swapper, source_faces, jobs, None, progress)
}

/// Swap the faces of `source_image` into every image of `target_dir`.
///
/// Outputs are PNG files named after the target, prefixed with the source's
/// stem when `prepend_source_name` is set.
pub fn swap_dir(
    swapper: &FaceSwapper,
    source_image: &Path,
    target_dir: &Path,
    output_dir: &Path,
    prepend_source_name: bool,
    policy: Option<MultiFacePolicy>,
    progress: &SwapProgress,
) -> Result<BatchSummary> {
    let source = image::open(source_image)?.to_rgb8();
    let source_faces = swapper.analyze_faces(&source, AnalysisPackage::SwapOnly)?;
    if source_faces.is_empty() {
        return Err(Error::input(format!(
            "no face found in {}",
            source_image.display()
        )));
    }
    fs::create_dir_all(output_dir)?;

    let source_stem = file_stem(source_image);
    let mut jobs = Vec::new();
    for entry in list_files(target_dir)? {
        let stem = file_stem(&entry);
        let name = if prepend_source_name {
            format!("{}_{}.png", source_stem, stem)
        } else {
            format!("{}.png", stem)
        };
        jobs.push((entry, output_dir.join(name)));
    }

    run_jobs(swapper, &source_faces, jobs, policy, progress)
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_counts_frames_and_faces() {
        let progress = SwapProgress::new(4);
        assert_eq!(progress.percent_complete(), 0.0);
        assert!(progress.estimated_remaining().is_none());

        progress.frame_done(2, 1);
        progress.frame_done(0, 0);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.frames_processed, 2);
        assert_eq!(snapshot.faces_swapped, 2);
        assert_eq!(snapshot.faces_failed, 1);
        assert_eq!(snapshot.percent_complete, 50.0);
        assert!(progress.estimated_remaining().is_some());
    }

    #[test]
    fn pool_failures_are_not_io_errors() {
        // the global pool can only be set up once, so one of these fails
        let failure = (0..2)
            .find_map(|_| rayon::ThreadPoolBuilder::new().build_global().err())
            .unwrap();
        let error = Error::from(failure);
        assert!(matches!(error, Error::ThreadPool(_)));
        assert!(error.to_string().starts_with("worker pool error"));
    }

    #[test]
    fn pool_is_sized_from_parallelism() {
        assert_eq!(thread_pool(3).unwrap().current_num_threads(), 3);
        assert_eq!(thread_pool(0).unwrap().current_num_threads(), 1);
    }

    #[test]
    fn empty_batch_is_complete() {
        assert_eq!(SwapProgress::new(0).percent_complete(), 100.0);
    }

    #[test]
    fn lists_only_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.png"), b"x").unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }
}
