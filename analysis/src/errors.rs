use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Input samples are empty")]
    EmptyInput,
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Numeric instability during {0}")]
    NumericInstability(String),
    #[error("Insufficient signal: {0}")]
    InsufficientSignal(String),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
