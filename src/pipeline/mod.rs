//! Enhancement runs over split, cached and dispatched chunks.

mod events;
mod orchestrator;

pub use events::{CancelToken, PipelineEvent, RunOutcome, RunReport, RunState};
pub use orchestrator::{assemble, Orchestrator, EVENT_BUFFER};
