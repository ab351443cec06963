//! Track step - runs every object tracker over the section.

use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{Context, StepOutcome, VideoState};
use crate::tracking::track_section;

pub struct TrackStep;

impl TrackStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TrackStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for TrackStep {
    fn name(&self) -> &str {
        "Track"
    }

    fn validate_input(&self, _ctx: &Context<'_>, state: &VideoState) -> StepResult<()> {
        if state.document.is_none() || state.source.is_none() || state.section.is_none() {
            return Err(StepError::invalid_input("video was not prepared"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context<'_>, state: &mut VideoState) -> StepResult<StepOutcome> {
        let (Some(document), Some(source), Some(section)) =
            (state.document.as_ref(), state.source.as_mut(), state.section)
        else {
            return Err(StepError::invalid_input("video was not prepared"));
        };

        let run = track_section(
            source.as_mut(),
            document.objects(),
            section,
            state.fps,
            &ctx.options.tracking,
            document.roi(),
            ctx.cancel,
        )?;

        if run.cancelled {
            ctx.logger.warn(&format!(
                "[Batch] {}: cancelled after {} of {} frames",
                ctx.video_name,
                run.frames_processed,
                section.len()
            ));
        } else if run.is_short(section) {
            ctx.logger.warn(&format!(
                "[Batch] {}: video ended after {} of {} frames",
                ctx.video_name,
                run.frames_processed,
                section.len()
            ));
        }
        for trajectory in &run.trajectories {
            if let Some(reason) = &trajectory.failure {
                ctx.logger.warn(&format!(
                    "[Batch] {}: '{}' could not be tracked: {}",
                    ctx.video_name, trajectory.object_name, reason
                ));
            }
        }

        // Frames are no longer needed.
        state.source = None;
        state.run = Some(run);
        Ok(StepOutcome::Success)
    }
}
