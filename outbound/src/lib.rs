// ABOUTME: Outbound delivery tier: bounded per-kind pipelines with retry and backoff
// ABOUTME: The dispatch router fans lifecycle events out to configured destinations

pub mod dispatcher;
pub mod error;
pub mod pipeline;

pub use dispatcher::{DispatchRouter, DispatchSender, RouteOutcome};
pub use error::{OutboundError, OutboundResult, SubmitError};
pub use pipeline::{Pipeline, PipelineSender};
