// ABOUTME: Typed errors for the outbound delivery tier
// ABOUTME: Build-time errors and submit-time queue errors are separate types

use thiserror::Error;

/// Errors raised while building the dispatch router or its pipelines.
#[derive(Debug, Error)]
pub enum OutboundError {
    /// Gateway configuration could not be loaded or parsed
    #[error("configuration error: {0}")]
    Config(#[from] gatecast_core::ConfigError),

    /// The HTTP client for a pipeline could not be constructed
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Errors raised when handing an event to a pipeline. Submission never
/// blocks, so these are the only two ways it can decline.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue shard for this device is saturated
    #[error("delivery queue is full")]
    QueueFull,

    /// The pipeline has shut down and no longer accepts events
    #[error("delivery queue is closed")]
    Closed,
}

pub type OutboundResult<T> = Result<T, OutboundError>;
