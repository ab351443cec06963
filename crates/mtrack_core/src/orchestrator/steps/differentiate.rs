//! Differentiate step - velocity and acceleration for every object.
//!
//! Objects are differentiated in parallel. A failure only affects its own
//! object, whose kinematic columns are left empty.

use rayon::prelude::*;

use crate::differentiation::differentiate_xy;
use crate::models::Trajectory;
use crate::orchestrator::errors::{StepError, StepResult};
use crate::orchestrator::step::PipelineStep;
use crate::orchestrator::types::{Context, ObjectDerivatives, StepOutcome, VideoState};

pub struct DifferentiateStep;

impl DifferentiateStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DifferentiateStep {
    fn default() -> Self {
        Self::new()
    }
}

fn differentiate_object(ctx: &Context<'_>, trajectory: &Trajectory, dt: f64) -> ObjectDerivatives {
    let result = match &trajectory.failure {
        Some(reason) => Err(reason.clone()),
        None if trajectory.is_empty() => Err("no samples".to_string()),
        None => differentiate_xy(&ctx.options.diff, &trajectory.xs(), &trajectory.ys(), dt)
            .map_err(|e| e.to_string()),
    };
    ObjectDerivatives {
        object_name: trajectory.object_name.clone(),
        result,
    }
}

impl PipelineStep for DifferentiateStep {
    fn name(&self) -> &str {
        "Differentiate"
    }

    fn validate_input(&self, _ctx: &Context<'_>, state: &VideoState) -> StepResult<()> {
        if state.run.is_some() && !(state.fps > 0.0) {
            return Err(StepError::invalid_input("frame rate is not set"));
        }
        Ok(())
    }

    fn execute(&self, ctx: &Context<'_>, state: &mut VideoState) -> StepResult<StepOutcome> {
        let Some(run) = state.run.as_ref() else {
            return Ok(StepOutcome::Skipped("nothing was tracked".to_string()));
        };
        let dt = 1.0 / state.fps;

        tracing::debug!(
            "[Differentiation] {}: {} over {} object(s)",
            ctx.video_name,
            ctx.options.diff.describe(),
            run.trajectories.len()
        );

        let derivatives: Vec<ObjectDerivatives> = run
            .trajectories
            .par_iter()
            .map(|trajectory| differentiate_object(ctx, trajectory, dt))
            .collect();

        for entry in &derivatives {
            if let Err(reason) = &entry.result {
                ctx.logger.warn(&format!(
                    "[Differentiation] {}: '{}' has no derivatives: {}",
                    ctx.video_name, entry.object_name, reason
                ));
            }
        }

        state.derivatives = derivatives;
        Ok(StepOutcome::Success)
    }

    fn runs_when_cancelled(&self) -> bool {
        true
    }
}
