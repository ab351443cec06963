//! Prepare step - loads the settings sidecar and opens the video.
//!
//! Everything that can be rejected before the first frame is checked here:
//! - The sidecar exists and validates
//! - The output unit is compatible with the ruler
//! - The frame rate is known (or overridden)
//! - The section fits the video

use crate::calibration::Calibration;
use crate::error::ConfigurationError;
use crate::models::{sidecar_path, Section, SettingsDocument};
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{Context, StepOutcome, VideoState};
use crate::video::FrameError;

/// Reason reported for videos without a settings sidecar.
pub const NO_SETTINGS: &str = "no settings file";

pub struct PrepareStep;

impl PrepareStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PrepareStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStep for PrepareStep {
    fn name(&self) -> &str {
        "Prepare"
    }

    fn validate_input(&self, ctx: &Context<'_>, _state: &VideoState) -> StepResult<()> {
        if !ctx.video.is_file() {
            return Err(StepError::invalid_input(format!(
                "video not found: {}",
                ctx.video.display()
            )));
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context<'_>, state: &mut VideoState) -> StepResult<StepOutcome> {
        let settings_path = sidecar_path(ctx.video);
        if !settings_path.is_file() {
            ctx.logger.warn(&format!(
                "[Batch] {}: {} ({}), skipping",
                ctx.video_name,
                NO_SETTINGS,
                settings_path.display()
            ));
            return Ok(StepOutcome::Halt(NO_SETTINGS.to_string()));
        }

        let document = SettingsDocument::load(&settings_path)?;
        if document.objects().is_empty() {
            return Err(ConfigurationError::Settings("no objects to track".to_string()).into());
        }
        let calibration = Calibration::new(ctx.options.unit, document.ruler())?;

        let source = ctx.open_video()?;
        let props = source.properties().clone();
        let fps = ctx.options.fps_override.unwrap_or(props.fps);
        if !(fps > 0.0) || !fps.is_finite() {
            return Err(FrameError::UnknownFps(ctx.video.to_path_buf()).into());
        }
        let section = Section::resolve(document.section(), props.frame_count)?;

        ctx.logger.info(&format!(
            "[Batch] {}: {} object(s), frames {}..={} @ {:.3} fps [{}]",
            ctx.video_name,
            document.objects().len(),
            section.start,
            section.stop,
            fps,
            source.backend_name()
        ));

        state.document = Some(document);
        state.calibration = Some(calibration);
        state.source = Some(source);
        state.fps = fps;
        state.section = Some(section);
        Ok(StepOutcome::Success)
    }

    fn validate_output(&self, _ctx: &Context<'_>, state: &VideoState) -> StepResult<()> {
        if state.source.is_none() || state.section.is_none() {
            return Err(StepError::invalid_output("video was not opened"));
        }
        Ok(())
    }
}
