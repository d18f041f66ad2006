use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed or ambiguous timestamp / timezone.
    #[error("Invalid time input: {0}")]
    InvalidTimeInput(String),
    #[error("Invalid location: {0}")]
    InvalidLocation(String),
    /// Inverse-trig argument left [-1, 1] beyond rounding drift.
    #[error("Domain error in {quantity}: argument {value} outside [-1, 1]")]
    Domain { quantity: &'static str, value: f64 },
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("System model failed: {0}")]
    Model(String),
    #[error("Pipeline {0} is closed")]
    PipelineClosed(Uuid),
    #[error("Storage failed: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
