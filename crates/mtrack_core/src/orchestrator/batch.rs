//! Batch runner: the per-video pipeline over many videos.
//!
//! Videos are independent and processed in parallel on a dedicated rayon
//! pool. Each video owns its document, frames and series; only the run
//! logger and the cancel handle are shared.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::logging::RunLogger;
use crate::video::VideoOpener;

use super::pipeline::CancelHandle;
use super::types::{BatchOptions, Context, VideoState};
use super::create_video_pipeline;

/// What happened to one video.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoOutcome {
    /// CSV written; `object_failures` lists objects with empty columns.
    Completed {
        output: PathBuf,
        object_failures: Vec<String>,
    },
    /// Cancelled while tracking; partial rows were written.
    Incomplete { output: Option<PathBuf> },
    /// Not processed (no settings, or cancelled before it started).
    Skipped { reason: String },
    Failed { reason: String },
}

/// Outcome for one video of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoReport {
    pub video: PathBuf,
    pub outcome: VideoOutcome,
}

impl VideoReport {
    fn name(&self) -> String {
        self.video
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.video.display().to_string())
    }
}

/// Per-batch summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// One report per video, in input order.
    pub reports: Vec<VideoReport>,
}

impl BatchSummary {
    fn count(&self, pred: impl Fn(&VideoOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, VideoOutcome::Completed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, VideoOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, VideoOutcome::Skipped { .. }))
    }

    pub fn incomplete(&self) -> usize {
        self.count(|o| matches!(o, VideoOutcome::Incomplete { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Human-readable summary with reasons.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Summary: {}/{} succeeded, {} failed, {} skipped, {} incomplete",
            self.succeeded(),
            self.reports.len(),
            self.failed(),
            self.skipped(),
            self.incomplete()
        );
        for report in &self.reports {
            let name = report.name();
            match &report.outcome {
                VideoOutcome::Completed {
                    object_failures, ..
                } => {
                    for failure in object_failures {
                        let _ = writeln!(out, "  ! {}: {}", name, failure);
                    }
                }
                VideoOutcome::Incomplete { output } => {
                    let written = output
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "nothing written".to_string());
                    let _ = writeln!(out, "  ~ {}: cancelled ({})", name, written);
                }
                VideoOutcome::Skipped { reason } => {
                    let _ = writeln!(out, "  - {}: skipped ({})", name, reason);
                }
                VideoOutcome::Failed { reason } => {
                    let _ = writeln!(out, "  x {}: {}", name, reason);
                }
            }
        }
        out
    }
}

/// Runs the per-video pipeline over a list of videos.
pub struct BatchRunner<O: VideoOpener> {
    options: BatchOptions,
    opener: O,
}

impl<O: VideoOpener> BatchRunner<O> {
    /// Create a runner; invalid options are rejected here, before any video
    /// is touched.
    pub fn new(options: BatchOptions, opener: O) -> Result<Self> {
        options.validate()?;
        Ok(Self { options, opener })
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Process every video and collect the outcomes.
    pub fn run(
        &self,
        videos: &[PathBuf],
        logger: &RunLogger,
        cancel: &CancelHandle,
    ) -> Result<BatchSummary> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        logger.phase(&format!(
            "Processing {} video(s) with {} tracker on {} worker(s)",
            videos.len(),
            self.options.tracking.tracker,
            pool.current_num_threads()
        ));
        logger.info(&format!("Differentiation: {}", self.options.diff.describe()));

        let done = AtomicUsize::new(0);
        let reports: Vec<VideoReport> = pool.install(|| {
            videos
                .par_iter()
                .map(|video| {
                    let report = self.process_video(video, logger, cancel);
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    logger.progress((finished * 100 / videos.len().max(1)) as u32);
                    report
                })
                .collect()
        });

        let summary = BatchSummary { reports };
        if summary.has_failures() {
            logger.show_tail("batch");
        }
        logger.flush();
        Ok(summary)
    }

    fn process_video(&self, video: &Path, logger: &RunLogger, cancel: &CancelHandle) -> VideoReport {
        let outcome = if cancel.is_cancelled() {
            VideoOutcome::Skipped {
                reason: "cancelled".to_string(),
            }
        } else {
            self.run_pipeline(video, logger, cancel)
        };
        VideoReport {
            video: video.to_path_buf(),
            outcome,
        }
    }

    fn run_pipeline(&self, video: &Path, logger: &RunLogger, cancel: &CancelHandle) -> VideoOutcome {
        let ctx = Context::new(video, &self.options, logger, cancel, &self.opener);
        logger.section(&ctx.video_name);

        let mut state = VideoState::default();
        let result = match create_video_pipeline().run(&ctx, &mut state) {
            Ok(result) => result,
            Err(e) => {
                return VideoOutcome::Failed {
                    reason: e.step_error().to_string(),
                }
            }
        };

        if let Some(reason) = result.halted {
            return VideoOutcome::Skipped { reason };
        }
        if result.cancelled || state.is_incomplete() {
            return VideoOutcome::Incomplete {
                output: state.output_path,
            };
        }

        let object_failures = state.object_failures();
        match state.output_path {
            Some(output) => {
                logger.success(&format!("{} -> {}", ctx.video_name, output.display()));
                VideoOutcome::Completed {
                    output,
                    object_failures,
                }
            }
            None => VideoOutcome::Failed {
                reason: "no output was written".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Unit;
    use crate::logging::LogConfig;
    use crate::models::{Point, Rect, Ruler, Section, SettingsDraft, TrackedObject};
    use crate::tracking::test_support::{moving_scene, object_rect, texture};
    use crate::tracking::{TrackerKind, TrackingOptions};
    use crate::video::{FrameError, FrameResult, FrameSource, MemoryVideo};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    /// Serves in-memory videos by file name.
    #[derive(Default)]
    struct MemoryOpener {
        videos: HashMap<String, MemoryVideo>,
    }

    impl MemoryOpener {
        fn with(mut self, name: &str, video: MemoryVideo) -> Self {
            self.videos.insert(name.to_string(), video);
            self
        }
    }

    impl VideoOpener for MemoryOpener {
        fn open(&self, path: &Path) -> FrameResult<Box<dyn FrameSource>> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            match self.videos.get(&name) {
                Some(video) => Ok(Box::new(video.clone())),
                None => Err(FrameError::OpenFailed {
                    path: path.to_path_buf(),
                    message: "not in memory".to_string(),
                }),
            }
        }
    }

    /// 40 frames of a 20x20 box moving 2 px right and 1 px down per frame.
    fn moving_video(fps: f64) -> (MemoryVideo, Rect) {
        let object = texture(20, 20, 11);
        let frames = moving_scene(40, (160, 120), &object, (20, 30), (2, 1));
        (MemoryVideo::new(frames, fps), object_rect(&object, 20, 30))
    }

    fn write_video(dir: &Path, name: &str, draft: Option<SettingsDraft>) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        if let Some(draft) = draft {
            draft.save(&crate::models::sidecar_path(&path)).unwrap();
        }
        path
    }

    fn draft(objects: Vec<TrackedObject>) -> SettingsDraft {
        SettingsDraft {
            objects,
            ..SettingsDraft::new()
        }
    }

    fn logger() -> RunLogger {
        RunLogger::without_file("batch", LogConfig::default())
    }

    fn options() -> BatchOptions {
        BatchOptions {
            tracking: TrackingOptions {
                tracker: TrackerKind::Kcf,
                ..TrackingOptions::default()
            },
            workers: 2,
            ..BatchOptions::default()
        }
    }

    #[test]
    fn tracks_and_writes_csv() {
        let dir = tempdir().unwrap();
        let (video, rect) = moving_video(10.0);
        let path = write_video(
            dir.path(),
            "clip.mp4",
            Some(draft(vec![TrackedObject::with_rectangle("box", rect)])),
        );
        let runner = BatchRunner::new(options(), MemoryOpener::default().with("clip.mp4", video)).unwrap();

        let summary = runner.run(&[path], &logger(), &CancelHandle::new()).unwrap();
        assert_eq!(summary.succeeded(), 1);
        assert!(!summary.has_failures());

        let csv = fs::read_to_string(dir.path().join("clip.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 41);
        assert!(lines[0].starts_with("Time (s),box X pos (pix),box Y pos (pix),box X vel (pix/s)"));

        // Mid-run velocity: 2 px/frame right, 1 px/frame down (negated) at 10 fps.
        let row: Vec<f64> = lines[20].split(',').map(|v| v.parse().unwrap()).collect();
        assert!((row[0] - 1.9).abs() < 1e-9);
        assert!((row[3] - 20.0).abs() < 2.0, "x velocity {}", row[3]);
        assert!((row[4] + 10.0).abs() < 2.0, "y velocity {}", row[4]);
    }

    #[test]
    fn section_and_fps_override_shape_the_output() {
        let dir = tempdir().unwrap();
        let (video, rect) = moving_video(0.0);
        let mut settings = draft(vec![TrackedObject::with_rectangle("box", rect.translated(10.0, 5.0))]);
        settings.section = Some(Section::new(5, 24));
        let path = write_video(dir.path(), "clip.avi", Some(settings));

        let opener = MemoryOpener::default().with("clip.avi", video);
        let no_fps = BatchRunner::new(options(), opener).unwrap();
        let summary = no_fps.run(&[path.clone()], &logger(), &CancelHandle::new()).unwrap();
        match &summary.reports[0].outcome {
            VideoOutcome::Failed { reason } => assert!(reason.contains("fps"), "{}", reason),
            other => panic!("expected failure, got {:?}", other),
        }

        let (video, _) = moving_video(0.0);
        let runner = BatchRunner::new(
            BatchOptions {
                fps_override: Some(20.0),
                ..options()
            },
            MemoryOpener::default().with("clip.avi", video),
        )
        .unwrap();
        let summary = runner.run(&[path], &logger(), &CancelHandle::new()).unwrap();
        assert_eq!(summary.succeeded(), 1);
        let csv = fs::read_to_string(dir.path().join("clip.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 21);
        assert!(lines[1].starts_with("0,"));
        assert!(lines[2].starts_with("0.05,"));
    }

    #[test]
    fn missing_settings_skip_and_bad_video_fails() {
        let dir = tempdir().unwrap();
        let (video, rect) = moving_video(10.0);
        let unconfigured = write_video(dir.path(), "bare.mp4", None);
        let unreadable = write_video(
            dir.path(),
            "broken.mp4",
            Some(draft(vec![TrackedObject::with_rectangle("box", rect)])),
        );
        let good = write_video(
            dir.path(),
            "good.mp4",
            Some(draft(vec![TrackedObject::with_rectangle("box", rect)])),
        );
        let runner = BatchRunner::new(options(), MemoryOpener::default().with("good.mp4", video)).unwrap();

        let summary = runner
            .run(&[unconfigured, unreadable, good], &logger(), &CancelHandle::new())
            .unwrap();
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.succeeded(), 1);
        assert!(summary.has_failures());
        assert!(!dir.path().join("bare.csv").exists());

        let text = summary.render();
        assert!(text.contains("1/3 succeeded, 1 failed, 1 skipped"));
        assert!(text.contains("bare.mp4: skipped (no settings file)"));
        assert!(text.contains("broken.mp4"));
    }

    #[test]
    fn unit_without_ruler_fails_before_tracking() {
        let dir = tempdir().unwrap();
        let (video, rect) = moving_video(10.0);
        let path = write_video(
            dir.path(),
            "clip.mp4",
            Some(draft(vec![TrackedObject::with_rectangle("box", rect)])),
        );
        let runner = BatchRunner::new(
            BatchOptions {
                unit: Unit::Mm,
                ..options()
            },
            MemoryOpener::default().with("clip.mp4", video),
        )
        .unwrap();
        let summary = runner.run(&[path], &logger(), &CancelHandle::new()).unwrap();
        match &summary.reports[0].outcome {
            VideoOutcome::Failed { reason } => assert!(reason.contains("ruler"), "{}", reason),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!dir.path().join("clip.csv").exists());
    }

    #[test]
    fn ruler_converts_to_millimetres() {
        let dir = tempdir().unwrap();
        let (video, rect) = moving_video(10.0);
        let mut settings = draft(vec![TrackedObject::with_rectangle("box", rect)]);
        // 50 px = 25 mm.
        settings.ruler = Some(Ruler::new(Point::new(0.0, 0.0), Point::new(50.0, 0.0), 25.0));
        let path = write_video(dir.path(), "clip.mp4", Some(settings));
        let runner = BatchRunner::new(
            BatchOptions {
                unit: Unit::Mm,
                ..options()
            },
            MemoryOpener::default().with("clip.mp4", video),
        )
        .unwrap();
        runner.run(&[path], &logger(), &CancelHandle::new()).unwrap();

        let csv = fs::read_to_string(dir.path().join("clip.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].contains("box X vel (mm/s)"));
        let first: Vec<f64> = lines[1].split(',').map(|v| v.parse().unwrap()).collect();
        // Box centre (30, 40) px.
        assert!((first[1] - 15.0).abs() < 1e-9);
        assert!((first[2] + 20.0).abs() < 1e-9);
    }

    #[test]
    fn cancelled_batch_skips_remaining_videos() {
        let dir = tempdir().unwrap();
        let (video, rect) = moving_video(10.0);
        let path = write_video(
            dir.path(),
            "clip.mp4",
            Some(draft(vec![TrackedObject::with_rectangle("box", rect)])),
        );
        let runner = BatchRunner::new(options(), MemoryOpener::default().with("clip.mp4", video)).unwrap();
        let cancel = CancelHandle::new();
        cancel.cancel();

        let summary = runner.run(&[path], &logger(), &cancel).unwrap();
        assert_eq!(summary.skipped(), 1);
        assert!(!dir.path().join("clip.csv").exists());
        assert!(!dir.path().join("clip.incomplete.csv").exists());
    }

    /// Source that requests cancellation after a number of frames.
    struct CancellingSource {
        inner: MemoryVideo,
        remaining: usize,
        cancel: CancelHandle,
    }

    impl FrameSource for CancellingSource {
        fn properties(&self) -> &crate::video::VideoProperties {
            self.inner.properties()
        }

        fn seek(&mut self, index: u32) -> FrameResult<()> {
            self.inner.seek(index)
        }

        fn next_frame(&mut self) -> FrameResult<Option<crate::video::Frame>> {
            if self.remaining == 0 {
                self.cancel.cancel();
            } else {
                self.remaining -= 1;
            }
            self.inner.next_frame()
        }

        fn backend_name(&self) -> &str {
            "cancelling"
        }
    }

    struct CancellingOpener {
        video: MemoryVideo,
        cancel: CancelHandle,
    }

    impl VideoOpener for CancellingOpener {
        fn open(&self, _path: &Path) -> FrameResult<Box<dyn FrameSource>> {
            Ok(Box::new(CancellingSource {
                inner: self.video.clone(),
                remaining: 10,
                cancel: self.cancel.clone(),
            }))
        }
    }

    #[test]
    fn cancelled_video_writes_incomplete_csv() {
        let dir = tempdir().unwrap();
        let (video, rect) = moving_video(10.0);
        let path = write_video(
            dir.path(),
            "clip.mp4",
            Some(draft(vec![TrackedObject::with_rectangle("box", rect)])),
        );
        fs::write(dir.path().join("clip.csv"), "previous run").unwrap();

        let cancel = CancelHandle::new();
        let opener = CancellingOpener {
            video,
            cancel: cancel.clone(),
        };
        let runner = BatchRunner::new(options(), opener).unwrap();
        let summary = runner.run(&[path], &logger(), &cancel).unwrap();

        assert_eq!(summary.incomplete(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("clip.csv")).unwrap(),
            "previous run"
        );
        let partial = fs::read_to_string(dir.path().join("clip.incomplete.csv")).unwrap();
        // Header plus the 11 frames read before cancellation was noticed.
        assert_eq!(partial.lines().count(), 12);
    }

    #[test]
    fn invalid_options_are_rejected_up_front() {
        let options = BatchOptions {
            fps_override: Some(-1.0),
            ..BatchOptions::default()
        };
        assert!(matches!(
            BatchRunner::new(options, MemoryOpener::default()),
            Err(Error::Configuration(_))
        ));
    }
}
