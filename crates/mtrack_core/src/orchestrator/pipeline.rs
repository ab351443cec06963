//! Pipeline runner that executes steps in sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::errors::{PipelineError, PipelineResult, StepError};
use super::step::PipelineStep;
use super::types::{Context, StepOutcome, VideoState};

/// Pipeline that runs a sequence of steps for one video.
///
/// The pipeline executes steps in order, running validation before and
/// after each step. Once cancellation is requested only steps that release
/// partial results still run.
pub struct Pipeline {
    steps: Vec<Box<dyn PipelineStep>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn add_step<S: PipelineStep + 'static>(&mut self, step: S) -> &mut Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Add a step (builder pattern).
    pub fn with_step<S: PipelineStep + 'static>(mut self, step: S) -> Self {
        self.add_step(step);
        self
    }

    /// Run the pipeline on one video.
    ///
    /// Executes each step in order:
    /// 1. Check for cancellation
    /// 2. Run `validate_input`
    /// 3. Run `execute`
    /// 4. Run `validate_output` (if execute returned Success)
    pub fn run(&self, ctx: &Context<'_>, state: &mut VideoState) -> PipelineResult<PipelineRunResult> {
        let mut result = PipelineRunResult::default();

        for step in &self.steps {
            let step_name = step.name();

            if ctx.cancel.is_cancelled() && !step.runs_when_cancelled() {
                ctx.logger.debug(&format!(
                    "[Batch] {}: '{}' not run after cancellation",
                    ctx.video_name, step_name
                ));
                result.cancelled = true;
                result.steps_skipped.push(step_name.to_string());
                continue;
            }

            ctx.logger.debug(&format!("[Batch] {}: {}", ctx.video_name, step_name));

            let fail = |e: StepError| {
                ctx.logger.error(&format!("[Batch] {}: {} failed: {}", ctx.video_name, step_name, e));
                PipelineError::step_failed(&ctx.video_name, step_name, e)
            };

            step.validate_input(ctx, state).map_err(fail)?;
            let outcome = step.execute(ctx, state).map_err(fail)?;

            match outcome {
                StepOutcome::Success => {
                    step.validate_output(ctx, state).map_err(fail)?;
                    result.steps_completed.push(step_name.to_string());
                }
                StepOutcome::Skipped(reason) => {
                    ctx.logger.debug(&format!(
                        "[Batch] {}: {} skipped: {}",
                        ctx.video_name, step_name, reason
                    ));
                    result.steps_skipped.push(step_name.to_string());
                }
                StepOutcome::Halt(reason) => {
                    result.halted = Some(reason);
                    break;
                }
            }
        }

        Ok(result)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Step names in order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for cooperative cancellation of a run.
///
/// Clones share the flag. Tracking checks it before every frame, the batch
/// runner before every video.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineRunResult {
    pub steps_completed: Vec<String>,
    pub steps_skipped: Vec<String>,
    /// Some steps did not run because of cancellation.
    pub cancelled: bool,
    /// A step stopped the pipeline early, with its reason.
    pub halted: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogConfig, RunLogger};
    use crate::orchestrator::errors::StepResult;
    use crate::orchestrator::types::BatchOptions;
    use crate::video::{FrameResult, FrameSource, VideoOpener};
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    struct NoVideos;

    impl VideoOpener for NoVideos {
        fn open(&self, _path: &Path) -> FrameResult<Box<dyn FrameSource>> {
            Err(crate::video::FrameError::FfmpegNotFound)
        }
    }

    struct CountingStep {
        name: &'static str,
        outcome: StepOutcome,
        fails: bool,
        after_cancel: bool,
        calls: Arc<AtomicUsize>,
    }

    impl CountingStep {
        fn new(name: &'static str, calls: &Arc<AtomicUsize>) -> Self {
            Self {
                name,
                outcome: StepOutcome::Success,
                fails: false,
                after_cancel: false,
                calls: Arc::clone(calls),
            }
        }
    }

    impl PipelineStep for CountingStep {
        fn name(&self) -> &str {
            self.name
        }

        fn validate_input(&self, _ctx: &Context<'_>, _state: &VideoState) -> StepResult<()> {
            Ok(())
        }

        fn execute(&self, _ctx: &Context<'_>, _state: &mut VideoState) -> StepResult<StepOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return Err(StepError::Other("boom".to_string()));
            }
            Ok(self.outcome.clone())
        }

        fn runs_when_cancelled(&self) -> bool {
            self.after_cancel
        }
    }

    fn run(pipeline: &Pipeline, cancel: &CancelHandle) -> PipelineResult<PipelineRunResult> {
        let options = BatchOptions::default();
        let logger = RunLogger::without_file("test", LogConfig::default());
        let ctx = Context::new(Path::new("clip.mp4"), &options, &logger, cancel, &NoVideos);
        pipeline.run(&ctx, &mut VideoState::default())
    }

    #[test]
    fn runs_steps_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new()
            .with_step(CountingStep::new("A", &calls))
            .with_step(CountingStep::new("B", &calls));
        let result = run(&pipeline, &CancelHandle::new()).unwrap();
        assert_eq!(result.steps_completed, vec!["A", "B"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.step_names(), vec!["A", "B"]);
    }

    #[test]
    fn halt_stops_without_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut first = CountingStep::new("A", &calls);
        first.outcome = StepOutcome::Halt("no settings".to_string());
        let pipeline = Pipeline::new().with_step(first).with_step(CountingStep::new("B", &calls));
        let result = run(&pipeline, &CancelHandle::new()).unwrap();
        assert_eq!(result.halted.as_deref(), Some("no settings"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_names_the_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut broken = CountingStep::new("Track", &calls);
        broken.fails = true;
        let pipeline = Pipeline::new().with_step(broken).with_step(CountingStep::new("B", &calls));
        let err = run(&pipeline, &CancelHandle::new()).unwrap_err();
        assert!(err.to_string().contains("'Track'"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_only_runs_release_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut export = CountingStep::new("Export", &calls);
        export.after_cancel = true;
        let pipeline = Pipeline::new()
            .with_step(CountingStep::new("Track", &calls))
            .with_step(export);
        let cancel = CancelHandle::new();
        cancel.cancel();
        let result = run(&pipeline, &cancel).unwrap();
        assert!(result.cancelled);
        assert_eq!(result.steps_skipped, vec!["Track"]);
        assert_eq!(result.steps_completed, vec!["Export"]);
    }

    #[test]
    fn cancel_handle_clones_share_state() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }
}
