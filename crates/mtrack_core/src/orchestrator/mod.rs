//! Batch orchestration over many videos.
//!
//! Two kinds of run are provided:
//! - [`BatchRunner`]: tracks every video's objects and writes kinematic CSVs
//! - [`MatchRunner`]: carries a reference video's objects over to targets
//!
//! # Architecture
//!
//! ```text
//! BatchRunner (rayon pool, one video per task)
//!     └── Pipeline
//!         ├── Step: Prepare        (sidecar, calibration, fps, section)
//!         ├── Step: Track
//!         ├── Step: Differentiate  (also after cancellation)
//!         └── Step: Export         (also after cancellation)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mtrack_core::orchestrator::{find_videos, BatchOptions, BatchRunner, CancelHandle};
//! use mtrack_core::video::FfmpegOpener;
//!
//! let videos = find_videos(&["recordings/"]).videos;
//! let runner = BatchRunner::new(BatchOptions::default(), FfmpegOpener)?;
//! let summary = runner.run(&videos, &logger, &CancelHandle::new())?;
//! println!("{}", summary.render());
//! ```

mod batch;
mod discovery;
mod errors;
mod match_run;
mod pipeline;
mod step;
pub mod steps;
mod table;
mod types;

pub use batch::{BatchRunner, BatchSummary, VideoOutcome, VideoReport};
pub use discovery::{find_videos, list_videos, wildcard_match, Discovery};
pub use errors::{MatchRunError, PipelineError, PipelineResult, StepError, StepResult};
pub use match_run::{MatchRunOptions, MatchRunner, MatchSummary, TargetReport, TargetStatus};
pub use pipeline::{CancelHandle, Pipeline, PipelineRunResult};
pub use step::PipelineStep;
pub use steps::{DifferentiateStep, ExportStep, PrepareStep, TrackStep};
pub use table::{csv_path, kinematic_samples, KinematicTable};
pub use types::{BatchOptions, Context, ObjectDerivatives, StepOutcome, VideoState};

/// Create the per-video pipeline with all steps in order.
///
/// 1. Prepare - load settings, open the video, resolve fps and section
/// 2. Track - run every object tracker over the section
/// 3. Differentiate - velocity and acceleration per object
/// 4. Export - write the CSV next to the video
pub fn create_video_pipeline() -> Pipeline {
    Pipeline::new()
        .with_step(PrepareStep::new())
        .with_step(TrackStep::new())
        .with_step(DifferentiateStep::new())
        .with_step(ExportStep::new())
}
