use std::time::Duration;

use beatgrid_analysis::errors::AnalysisError;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Plugin '{plugin}' failed: {message}")]
    PluginFailure { plugin: String, message: String },
    #[error("Parse was cancelled")]
    Cancelled,
    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("Worker failed: {0}")]
    WorkerFailed(String),
}

pub type CoreResult<T> = Result<T, Error>;

/// The stable error taxonomy, independent of the concrete variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidParameter,
    EmptyInput,
    InvalidAudio,
    Unsupported,
    NumericInstability,
    InsufficientSignal,
    InvalidConfig,
    PluginFailure,
    Cancelled,
    Timeout,
    WorkerFailed,
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Analysis(inner) => match inner {
                AnalysisError::InvalidParameter(_) => ErrorKind::InvalidParameter,
                AnalysisError::EmptyInput => ErrorKind::EmptyInput,
                AnalysisError::InvalidAudio(_) => ErrorKind::InvalidAudio,
                AnalysisError::Unsupported(_) => ErrorKind::Unsupported,
                AnalysisError::NumericInstability(_) => ErrorKind::NumericInstability,
                AnalysisError::InsufficientSignal(_) => ErrorKind::InsufficientSignal,
            },
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::PluginFailure { .. } => ErrorKind::PluginFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::WorkerFailed(_) => ErrorKind::WorkerFailed,
        }
    }

    /// Exit-code class for a CLI wrapping this library: 0 success, 1 user
    /// error, 2 internal failure, 3 cancelled or timed out.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::InvalidParameter
            | ErrorKind::EmptyInput
            | ErrorKind::InvalidAudio
            | ErrorKind::Unsupported
            | ErrorKind::InsufficientSignal
            | ErrorKind::InvalidConfig
            | ErrorKind::PluginFailure => 1,
            ErrorKind::NumericInstability | ErrorKind::WorkerFailed => 2,
            ErrorKind::Cancelled | ErrorKind::Timeout => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Error::Analysis(AnalysisError::EmptyInput), ErrorKind::EmptyInput, 1)]
    #[case(
        Error::Analysis(AnalysisError::InvalidParameter("x".into())),
        ErrorKind::InvalidParameter,
        1
    )]
    #[case(
        Error::Analysis(AnalysisError::Unsupported("x".into())),
        ErrorKind::Unsupported,
        1
    )]
    #[case(
        Error::Analysis(AnalysisError::NumericInstability("x".into())),
        ErrorKind::NumericInstability,
        2
    )]
    #[case(
        Error::PluginFailure { plugin: "p".into(), message: "m".into() },
        ErrorKind::PluginFailure,
        1
    )]
    #[case(Error::Cancelled, ErrorKind::Cancelled, 3)]
    #[case(
        Error::Timeout(Duration::from_secs(1)),
        ErrorKind::Timeout,
        3
    )]
    #[case(Error::WorkerFailed("gone".into()), ErrorKind::WorkerFailed, 2)]
    #[case(Error::InvalidConfig("bad".into()), ErrorKind::InvalidConfig, 1)]
    fn test_kind_and_exit_code(
        #[case] error: Error,
        #[case] kind: ErrorKind,
        #[case] exit_code: u8,
    ) {
        assert_eq!(error.kind(), kind);
        assert_eq!(error.exit_code(), exit_code);
    }

    #[test]
    fn test_messages_are_human_readable() {
        let error = Error::PluginFailure {
            plugin: "gain".into(),
            message: "boom".into(),
        };
        assert_eq!(error.to_string(), "Plugin 'gain' failed: boom");
    }
}
