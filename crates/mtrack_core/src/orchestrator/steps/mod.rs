//! Pipeline step implementations.
//!
//! Each step handles one phase of processing a video:
//! Prepare → Track → Differentiate → Export.

mod differentiate;
mod export;
mod prepare;
mod track;

pub use differentiate::DifferentiateStep;
pub use export::ExportStep;
pub use prepare::{PrepareStep, NO_SETTINGS};
pub use track::TrackStep;
