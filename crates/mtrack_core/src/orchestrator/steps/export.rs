//! Export step - writes the kinematic CSV next to the video.
//!
//! A cancelled run writes `<stem>.incomplete.csv` and leaves any existing
//! `<stem>.csv` untouched.

use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::table::{csv_path, KinematicTable};
use crate::orchestrator::types::{Context, StepOutcome, VideoState};

pub struct ExportStep;

impl ExportStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExportStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for ExportStep {
    fn name(&self) -> &str {
        "Export"
    }

    fn validate_input(&self, _ctx: &Context<'_>, state: &VideoState) -> StepResult<()> {
        if let Some(run) = &state.run {
            if state.derivatives.len() != run.trajectories.len() {
                return Err(StepError::invalid_input(format!(
                    "{} trajectories but {} derivative sets",
                    run.trajectories.len(),
                    state.derivatives.len()
                )));
            }
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context<'_>, state: &mut VideoState) -> StepResult<StepOutcome> {
        let (Some(run), Some(calibration)) = (state.run.as_ref(), state.calibration.as_ref()) else {
            return Ok(StepOutcome::Skipped("nothing was tracked".to_string()));
        };
        if run.frames_processed == 0 {
            return Ok(StepOutcome::Skipped("no frames were processed".to_string()));
        }

        let table = KinematicTable::build(
            run,
            &state.derivatives,
            calibration,
            state.fps,
            ctx.options.flip_y,
            ctx.options.tracking.size_tracking,
        );
        let path = csv_path(ctx.video, run.cancelled);
        table
            .write_atomic(&path)
            .map_err(|e| StepError::io(format!("writing {}", path.display()), e))?;

        ctx.logger.info(&format!(
            "[Batch] {}: wrote {} rows to {}",
            ctx.video_name,
            table.rows().len(),
            path.display()
        ));
        state.output_path = Some(path);
        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, _ctx: &Context<'_>, state: &VideoState) -> StepResult<()> {
        match &state.output_path {
            Some(path) if path.is_file() => Ok(()),
            Some(path) => Err(StepError::invalid_output(format!(
                "{} was not written",
                path.display()
            ))),
            None => Err(StepError::invalid_output("no output path recorded")),
        }
    }

    fn runs_when_cancelled(&self) -> bool {
        true
    }
}
