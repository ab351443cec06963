//! Match run: carry a reference video's objects over to other videos.
//!
//! The reference frame is read once and shared read-only. Targets are
//! matched in parallel; each target gets its own settings sidecar when at
//! least one object was found.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::logging::RunLogger;
use crate::matching::{MatchConfig, RegionMatcher};
use crate::models::{sidecar_path, MatchResult, Point, SettingsDocument};
use crate::video::VideoOpener;

use super::discovery::find_videos;
use super::errors::MatchRunError;
use super::pipeline::CancelHandle;

/// Inputs of a match run.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRunOptions {
    pub reference: PathBuf,
    /// Target files, directories or patterns; empty uses the reference's
    /// directory.
    pub targets: Vec<String>,
    pub reference_frame: u32,
    pub target_frame: u32,
    pub config: MatchConfig,
    /// Replace existing target settings.
    pub overwrite: bool,
    /// Match without writing anything.
    pub dry_run: bool,
    /// Parallel targets; 0 uses all cores.
    pub workers: usize,
}

impl MatchRunOptions {
    pub fn new(reference: impl Into<PathBuf>) -> Self {
        Self {
            reference: reference.into(),
            targets: Vec::new(),
            reference_frame: 0,
            target_frame: 0,
            config: MatchConfig::default(),
            overwrite: false,
            dry_run: false,
            workers: 0,
        }
    }
}

/// Result class of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    FullyMatched,
    Partial,
    Failed,
    /// Settings already existed and `overwrite` was off.
    Skipped,
}

/// Outcome for one target video.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetReport {
    pub target: PathBuf,
    pub status: TargetStatus,
    /// One result per reference object.
    pub results: Vec<MatchResult>,
    /// Settings file written for the target.
    pub written: Option<PathBuf>,
    /// Why the target could not be matched or written.
    pub error: Option<String>,
}

impl TargetReport {
    fn skipped(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            status: TargetStatus::Skipped,
            results: Vec::new(),
            written: None,
            error: None,
        }
    }
}

/// Summary of a match run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchSummary {
    pub reports: Vec<TargetReport>,
}

impl MatchSummary {
    fn count(&self, status: TargetStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }

    pub fn fully_matched(&self) -> usize {
        self.count(TargetStatus::FullyMatched)
    }

    pub fn partial(&self) -> usize {
        self.count(TargetStatus::Partial)
    }

    pub fn failed(&self) -> usize {
        self.count(TargetStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TargetStatus::Skipped)
    }

    /// Targets that were actually matched.
    pub fn processed(&self) -> usize {
        self.reports.len() - self.skipped()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for report in self.reports.iter().filter(|r| r.status != TargetStatus::Skipped) {
            let name = report
                .target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let _ = writeln!(out, "{}", name);
            if let Some(error) = &report.error {
                let _ = writeln!(out, "  error: {}", error);
            }
            for result in &report.results {
                let location = result
                    .matched_rectangle
                    .map(|r| Point::new(r.x, r.y))
                    .or(result.matched_point);
                match (location, result.method_used) {
                    (Some(at), Some(method)) => {
                        let _ = writeln!(
                            out,
                            "  {}: matched at ({:.1}, {:.1}) conf={:.3} [{}]",
                            result.object_name,
                            at.x,
                            at.y,
                            result.confidence,
                            method.name()
                        );
                    }
                    _ => {
                        let _ = writeln!(
                            out,
                            "  {}: NO MATCH conf={:.3}",
                            result.object_name, result.confidence
                        );
                    }
                }
            }
            if let Some(path) = &report.written {
                let _ = writeln!(out, "  -> wrote {}", path.display());
            }
        }
        let _ = writeln!(
            out,
            "Summary: {} fully matched, {} partial, {} failed (out of {})",
            self.fully_matched(),
            self.partial(),
            self.failed(),
            self.processed()
        );
        if self.skipped() > 0 {
            let _ = writeln!(
                out,
                "Skipped {} video(s) (existing settings are kept unless --overwrite is given)",
                self.skipped()
            );
        }
        out
    }
}

/// Runs region matching from one reference video to many targets.
pub struct MatchRunner<O: VideoOpener> {
    options: MatchRunOptions,
    matcher: RegionMatcher,
    opener: O,
}

impl<O: VideoOpener> MatchRunner<O> {
    pub fn new(options: MatchRunOptions, opener: O) -> Result<Self> {
        let matcher = RegionMatcher::new(options.config.clone())?;
        Ok(Self {
            options,
            matcher,
            opener,
        })
    }

    pub fn options(&self) -> &MatchRunOptions {
        &self.options
    }

    pub fn run(&self, logger: &RunLogger, cancel: &CancelHandle) -> Result<MatchSummary> {
        let options = &self.options;
        let reference_path = absolute(&options.reference);
        if !reference_path.is_file() {
            return Err(MatchRunError::ReferenceNotFound(reference_path).into());
        }
        let settings_path = sidecar_path(&reference_path);
        if !settings_path.is_file() {
            return Err(MatchRunError::NoReferenceSettings(settings_path).into());
        }
        let document = SettingsDocument::load(&settings_path)?;
        if document.objects().is_empty() {
            return Err(MatchRunError::NoObjects.into());
        }

        let reference_frame = self
            .opener
            .open(&reference_path)
            .and_then(|mut source| source.read_frame_at(options.reference_frame))
            .map_err(|source| MatchRunError::ReferenceFrame {
                path: reference_path.clone(),
                frame: options.reference_frame,
                source,
            })?
            .image;

        let targets = self.resolve_targets(&reference_path);
        if targets.is_empty() {
            return Err(MatchRunError::NoTargets.into());
        }

        let object_names: Vec<&str> = document.objects().iter().map(|o| o.name.as_str()).collect();
        logger.phase("Region matching");
        logger.info(&format!(
            "Reference: {} (frame {})",
            reference_path.display(),
            options.reference_frame
        ));
        logger.info(&format!("Objects:   {}", object_names.join(", ")));
        logger.info(&format!(
            "Method:    {} (threshold: {})",
            options.config.method, options.config.threshold
        ));
        logger.info(&format!("Targets:   {} video(s)", targets.len()));
        if options.dry_run {
            logger.info("Mode:      DRY RUN (no files written)");
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        let reports: Vec<TargetReport> = pool.install(|| {
            targets
                .par_iter()
                .map(|target| {
                    if !options.overwrite && sidecar_path(target).is_file() {
                        logger.info(&format!(
                            "[Matcher] {}: settings exist, skipping",
                            target.display()
                        ));
                        return TargetReport::skipped(target);
                    }
                    if cancel.is_cancelled() {
                        return TargetReport {
                            error: Some("cancelled".to_string()),
                            ..TargetReport::skipped(target)
                        };
                    }
                    self.match_target(target, &document, &reference_frame, logger)
                })
                .collect()
        });

        let summary = MatchSummary { reports };
        if summary.has_failures() {
            logger.show_tail("match");
        }
        logger.flush();
        Ok(summary)
    }

    fn resolve_targets(&self, reference: &Path) -> Vec<PathBuf> {
        let discovery = if self.options.targets.is_empty() {
            let dir = reference.parent().unwrap_or_else(|| Path::new("."));
            find_videos(&[dir.to_string_lossy()])
        } else {
            find_videos(&self.options.targets)
        };
        discovery
            .videos
            .into_iter()
            .filter(|t| absolute(t) != reference)
            .collect()
    }

    fn match_target(
        &self,
        target: &Path,
        document: &SettingsDocument,
        reference_frame: &image::GrayImage,
        logger: &RunLogger,
    ) -> TargetReport {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let target_frame = match self
            .opener
            .open(target)
            .and_then(|mut source| source.read_frame_at(self.options.target_frame))
        {
            Ok(frame) => frame.image,
            Err(e) => {
                logger.error(&format!("[Matcher] {}: cannot read video: {}", name, e));
                return TargetReport {
                    target: target.to_path_buf(),
                    status: TargetStatus::Failed,
                    results: document
                        .objects()
                        .iter()
                        .map(|o| MatchResult::rejected(&o.name, 0.0))
                        .collect(),
                    written: None,
                    error: Some(format!("cannot read video: {}", e)),
                };
            }
        };

        let matched = self.matcher.match_document(document, reference_frame, &target_frame);
        let status = if matched.all_matched() {
            TargetStatus::FullyMatched
        } else if matched.any_matched() {
            TargetStatus::Partial
        } else {
            TargetStatus::Failed
        };
        logger.info(&format!(
            "[Matcher] {}: {}/{} object(s) matched",
            name,
            matched.matched.len(),
            matched.results.len()
        ));

        let mut report = TargetReport {
            target: target.to_path_buf(),
            status,
            results: matched.results.clone(),
            written: None,
            error: None,
        };
        if self.options.dry_run {
            return report;
        }
        if let Some(draft) = matched.to_draft(document) {
            let path = sidecar_path(target);
            match draft.save(&path) {
                Ok(()) => {
                    logger.info(&format!("[Matcher] {}: wrote {}", name, path.display()));
                    report.written = Some(path);
                }
                Err(e) => {
                    logger.error(&format!("[Matcher] {}: {}", name, e));
                    report.status = TargetStatus::Failed;
                    report.error = Some(e.to_string());
                }
            }
        }
        report
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogConfig;
    use crate::matching::MatchMethod;
    use crate::models::{Rect, Section, SettingsDraft, TrackedObject};
    use crate::tracking::test_support::{scene, texture};
    use crate::video::{FrameError, FrameResult, FrameSource, MemoryVideo};
    use image::GrayImage;
    use std::collections::HashMap;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct MemoryOpener {
        frames: HashMap<String, GrayImage>,
    }

    impl VideoOpener for MemoryOpener {
        fn open(&self, path: &Path) -> FrameResult<Box<dyn FrameSource>> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            match self.frames.get(&name) {
                Some(frame) => Ok(Box::new(MemoryVideo::new(vec![frame.clone(); 3], 25.0))),
                None => Err(FrameError::OpenFailed {
                    path: path.to_path_buf(),
                    message: "not in memory".to_string(),
                }),
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        opener: MemoryOpener,
        reference: PathBuf,
    }

    impl Fixture {
        /// Reference with two objects; `ball` is a textured patch, `ghost`
        /// covers only flat background.
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let reference = dir.path().join("ref.mp4");
            fs::write(&reference, b"").unwrap();
            SettingsDraft {
                objects: vec![
                    TrackedObject::with_rectangle("ball", Rect::new(40.0, 30.0, 24.0, 24.0)),
                    TrackedObject::with_rectangle("ghost", Rect::new(120.0, 90.0, 24.0, 24.0)),
                ],
                section: Some(Section::new(0, 2)),
                ..SettingsDraft::new()
            }
            .save(&sidecar_path(&reference))
            .unwrap();

            let mut opener = MemoryOpener::default();
            opener
                .frames
                .insert("ref.mp4".to_string(), scene(200, 150, &texture(24, 24, 2), 40, 30));
            Self {
                dir,
                opener,
                reference,
            }
        }

        fn target(&mut self, name: &str, frame: Option<GrayImage>) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, b"").unwrap();
            if let Some(frame) = frame {
                self.opener.frames.insert(name.to_string(), frame);
            }
            path
        }

        fn run(self, configure: impl FnOnce(&mut MatchRunOptions)) -> (TempDir, Result<MatchSummary>) {
            let mut options = MatchRunOptions::new(&self.reference);
            options.config.method = MatchMethod::Template;
            options.workers = 2;
            configure(&mut options);
            let logger = RunLogger::without_file("match", LogConfig::default());
            let runner = MatchRunner::new(options, self.opener).unwrap();
            let result = runner.run(&logger, &CancelHandle::new());
            (self.dir, result)
        }
    }

    fn shifted_scene() -> GrayImage {
        scene(200, 150, &texture(24, 24, 2), 55, 38)
    }

    #[test]
    fn writes_settings_for_partially_matched_targets() {
        let mut fixture = Fixture::new();
        fixture.target("t1.mp4", Some(shifted_scene()));
        let (dir, summary) = fixture.run(|_| {});
        let summary = summary.unwrap();

        // The reference itself is not a target.
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.partial(), 1);
        assert!(!summary.has_failures());

        let written = SettingsDocument::load(&dir.path().join("t1.mp4.motiontracker.json")).unwrap();
        assert_eq!(written.objects().len(), 1);
        let ball = written.object("ball").unwrap().rectangle.unwrap();
        assert!((ball.x - 55.0).abs() < 1.0 && (ball.y - 38.0).abs() < 1.0, "{:?}", ball);
        assert_eq!(written.section(), Some(Section::new(0, 2)));
    }

    #[test]
    fn existing_settings_are_skipped_unless_overwrite() {
        let mut fixture = Fixture::new();
        let target = fixture.target("t1.mp4", Some(shifted_scene()));
        fs::write(sidecar_path(&target), "keep").unwrap();
        let (dir, summary) = fixture.run(|_| {});
        let summary = summary.unwrap();
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.processed(), 0);
        assert_eq!(fs::read_to_string(sidecar_path(&target)).unwrap(), "keep");
        drop(dir);

        let mut fixture = Fixture::new();
        let target = fixture.target("t1.mp4", Some(shifted_scene()));
        fs::write(sidecar_path(&target), "replace me").unwrap();
        let (_dir, summary) = fixture.run(|o| o.overwrite = true);
        assert_eq!(summary.unwrap().partial(), 1);
        assert!(SettingsDocument::load(&sidecar_path(&target)).is_ok());
    }

    #[test]
    fn dry_run_and_unreadable_targets() {
        let mut fixture = Fixture::new();
        let readable = fixture.target("a.mp4", Some(shifted_scene()));
        fixture.target("b.mp4", None);
        let (_dir, summary) = fixture.run(|o| o.dry_run = true);
        let summary = summary.unwrap();

        assert_eq!(summary.partial(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(summary.has_failures());
        assert!(!sidecar_path(&readable).exists());

        let failed = summary
            .reports
            .iter()
            .find(|r| r.status == TargetStatus::Failed)
            .unwrap();
        assert_eq!(failed.results.len(), 2);
        assert!(failed.error.as_deref().unwrap().contains("cannot read video"));
        assert!(summary.render().contains("1 partial, 1 failed (out of 2)"));
    }

    #[test]
    fn nothing_matched_writes_nothing() {
        let mut fixture = Fixture::new();
        let target = fixture.target("blank.mp4", Some(GrayImage::from_pixel(200, 150, image::Luma([128]))));
        let (_dir, summary) = fixture.run(|_| {});
        assert_eq!(summary.unwrap().failed(), 1);
        assert!(!sidecar_path(&target).exists());
    }

    #[test]
    fn setup_errors() {
        let fixture = Fixture::new();
        let (_dir, result) = fixture.run(|_| {});
        assert!(matches!(result, Err(Error::MatchRun(MatchRunError::NoTargets))));

        let fixture = Fixture::new();
        let (_dir, result) = fixture.run(|o| o.reference_frame = 10);
        assert!(matches!(
            result,
            Err(Error::MatchRun(MatchRunError::ReferenceFrame { frame: 10, .. }))
        ));

        let fixture = Fixture::new();
        fs::remove_file(sidecar_path(&fixture.reference)).unwrap();
        let (_dir, result) = fixture.run(|_| {});
        assert!(matches!(result, Err(Error::MatchRun(MatchRunError::NoReferenceSettings(_)))));

        let fixture = Fixture::new();
        let (_dir, result) = fixture.run(|o| o.reference = PathBuf::from("/nonexistent/ref.mp4"));
        assert!(matches!(result, Err(Error::MatchRun(MatchRunError::ReferenceNotFound(_)))));
    }
}
