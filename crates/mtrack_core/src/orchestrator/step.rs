//! Pipeline step trait definition.

use super::errors::StepResult;
use super::types::{Context, StepOutcome, VideoState};

/// One stage of processing a video.
///
/// The pipeline runner calls these methods in order:
///
/// 1. `validate_input` - Check preconditions before execution
/// 2. `execute` - Perform the step's work
/// 3. `validate_output` - Verify the step produced valid output
pub trait PipelineStep: Send + Sync {
    /// Step name (for logging and error context).
    fn name(&self) -> &str;

    fn validate_input(&self, ctx: &Context<'_>, state: &VideoState) -> StepResult<()>;

    /// Perform the step's processing and record results in `state`.
    fn execute(&self, ctx: &Context<'_>, state: &mut VideoState) -> StepResult<StepOutcome>;

    /// Called after `execute` returns `Success`.
    fn validate_output(&self, _ctx: &Context<'_>, _state: &VideoState) -> StepResult<()> {
        Ok(())
    }

    /// Whether the step still runs after cancellation was requested, so
    /// partial results can be released.
    fn runs_when_cancelled(&self) -> bool {
        false
    }
}
