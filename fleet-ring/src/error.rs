use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    /// Transport-level failure talking to discovery
    #[error("discovery request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Discovery answered with a non-success status
    #[error("discovery returned status {0}")]
    Status(reqwest::StatusCode),

    /// Discovery answered 2xx but the body did not parse
    #[error("invalid discovery response: {0}")]
    InvalidResponse(String),

    /// Bad fleet configuration
    #[error("fleet configuration error: {0}")]
    Config(String),
}

pub type FleetResult<T> = Result<T, FleetError>;
