//! This module contains the messages that cross the worker boundary.
#![allow(clippy::module_name_repetitions)]

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use beatgrid_analysis::Stage;

use crate::config::ParseOptions;
use crate::errors::Error;
use crate::parser::ParseOutcome;
use crate::streaming::StreamOptions;

/// Client-unique identifier of one request.
pub type RequestId = u64;

/// A progress percentage, clamped to `[0, 100]`.
#[nutype(
    sanitize(with = |n: f32| if n.is_finite() { n.clamp(0.0, 100.0) } else { 0.0 }),
    derive(Copy, Clone, Debug, PartialEq, PartialOrd, Deserialize, Serialize)
)]
pub struct Percent(f32);

impl Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}%", self.into_inner())
    }
}

/// One progress event for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: RequestId,
    pub stage: Stage,
    pub current: usize,
    pub total: usize,
    pub percentage: Percent,
}

impl Display for ProgressUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{}: {} {}/{} ({})",
            self.id, self.stage, self.current, self.total, self.percentage
        )
    }
}

/// What a terminal `Result` carries: one outcome or an ordered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchOutput {
    Single(Box<ParseOutcome>),
    Batch(Vec<ParseOutcome>),
}

impl BatchOutput {
    /// Unwrap a single outcome; a one-element batch also qualifies.
    ///
    /// # Errors
    ///
    /// `WorkerFailed` when the output is a multi-element batch.
    pub fn into_single(self) -> Result<ParseOutcome, Error> {
        match self {
            Self::Single(outcome) => Ok(*outcome),
            Self::Batch(mut outcomes) => {
                if outcomes.len() == 1 {
                    Ok(outcomes.swap_remove(0))
                } else {
                    Err(Error::WorkerFailed(format!(
                        "expected a single outcome, got a batch of {}",
                        outcomes.len()
                    )))
                }
            }
        }
    }

    #[must_use]
    pub fn into_batch(self) -> Vec<ParseOutcome> {
        match self {
            Self::Single(outcome) => vec![*outcome],
            Self::Batch(outcomes) => outcomes,
        }
    }
}

/// Shared bookkeeping of one request: its id, options, and the cooperative
/// cancellation flag the client can raise at any time.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub id: RequestId,
    pub options: ParseOptions,
    pub cancel: Arc<AtomicBool>,
}

impl JobTicket {
    #[must_use]
    pub fn new(id: RequestId, options: ParseOptions) -> Self {
        Self {
            id,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Requests the client sends to the worker kernel.
///
/// Sample buffers move into the request: ownership transfers to the worker
/// and the sender cannot touch them afterwards.
#[derive(Debug)]
pub enum WorkerRequest {
    ParseBuffer {
        ticket: JobTicket,
        samples: Vec<f32>,
    },
    ParseStream {
        ticket: JobTicket,
        chunks: Vec<Vec<f32>>,
        stream: StreamOptions,
    },
    ProcessBatch {
        ticket: JobTicket,
        buffers: Vec<Vec<f32>>,
        /// One per buffer, or a single entry broadcast to all of them.
        options: Vec<ParseOptions>,
    },
    /// Stop the worker kernel.
    Exit,
}

impl WorkerRequest {
    #[must_use]
    pub const fn id(&self) -> Option<RequestId> {
        match self {
            Self::ParseBuffer { ticket, .. }
            | Self::ParseStream { ticket, .. }
            | Self::ProcessBatch { ticket, .. } => Some(ticket.id),
            Self::Exit => None,
        }
    }
}

impl PartialEq for WorkerRequest {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exit, Self::Exit) => true,
            (Self::ParseBuffer { ticket: a, .. }, Self::ParseBuffer { ticket: b, .. })
            | (Self::ParseStream { ticket: a, .. }, Self::ParseStream { ticket: b, .. })
            | (Self::ProcessBatch { ticket: a, .. }, Self::ProcessBatch { ticket: b, .. }) => {
                a.id == b.id
            }
            _ => false,
        }
    }
}

impl Display for WorkerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseBuffer { ticket, samples } => {
                write!(f, "Parse Buffer #{} ({} samples)", ticket.id, samples.len())
            }
            Self::ParseStream { ticket, chunks, .. } => {
                write!(f, "Parse Stream #{} ({} chunks)", ticket.id, chunks.len())
            }
            Self::ProcessBatch {
                ticket, buffers, ..
            } => {
                write!(f, "Process Batch #{} ({} buffers)", ticket.id, buffers.len())
            }
            Self::Exit => write!(f, "Exit"),
        }
    }
}

/// Responses the worker kernel emits.
///
/// For any id, zero or more `Progress` messages precede exactly one
/// `Result` or `Error`.
#[derive(Debug)]
pub enum WorkerResponse {
    Progress(ProgressUpdate),
    Result {
        id: RequestId,
        output: BatchOutput,
    },
    Error {
        id: RequestId,
        error: Error,
    },
}

impl WorkerResponse {
    #[must_use]
    pub const fn id(&self) -> RequestId {
        match self {
            Self::Progress(update) => update.id,
            Self::Result { id, .. } | Self::Error { id, .. } => *id,
        }
    }

    /// Whether this response concludes its request.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}

impl Display for WorkerResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Progress(update) => write!(f, "Progress {update}"),
            Self::Result { id, output } => match output {
                BatchOutput::Single(_) => write!(f, "Result #{id}"),
                BatchOutput::Batch(outcomes) => {
                    write!(f, "Result #{id} ({} outcomes)", outcomes.len())
                }
            },
            Self::Error { id, error } => write!(f, "Error #{id}: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_str_eq;
    use rstest::rstest;

    fn ticket(id: RequestId) -> JobTicket {
        JobTicket::new(id, ParseOptions::default())
    }

    #[test]
    fn test_percent_sanitizes() {
        assert!((Percent::new(150.).into_inner() - 100.).abs() < f32::EPSILON);
        assert!(Percent::new(-3.).into_inner().abs() < f32::EPSILON);
        assert!(Percent::new(f32::NAN).into_inner().abs() < f32::EPSILON);
        assert_str_eq!(Percent::new(42.5).to_string(), "42.50%");
    }

    #[rstest]
    #[case(
        WorkerRequest::ParseBuffer { ticket: ticket(1), samples: vec![0.; 10] },
        "Parse Buffer #1 (10 samples)"
    )]
    #[case(
        WorkerRequest::ParseStream {
            ticket: ticket(2),
            chunks: vec![vec![0.; 5], vec![0.; 5]],
            stream: StreamOptions::default(),
        },
        "Parse Stream #2 (2 chunks)"
    )]
    #[case(
        WorkerRequest::ProcessBatch {
            ticket: ticket(3),
            buffers: vec![vec![0.; 5]],
            options: vec![ParseOptions::default()],
        },
        "Process Batch #3 (1 buffers)"
    )]
    #[case(WorkerRequest::Exit, "Exit")]
    fn test_request_display(#[case] request: WorkerRequest, #[case] expected: &str) {
        assert_str_eq!(request.to_string(), expected);
    }

    #[test]
    fn test_request_equality_is_by_id() {
        let a = WorkerRequest::ParseBuffer {
            ticket: ticket(7),
            samples: vec![0.; 10],
        };
        let b = WorkerRequest::ParseBuffer {
            ticket: ticket(7),
            samples: vec![1.; 99],
        };
        let c = WorkerRequest::ParseBuffer {
            ticket: ticket(8),
            samples: vec![0.; 10],
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, WorkerRequest::Exit);
    }

    #[test]
    fn test_batch_output_into_single() {
        let outcome = ParseOutcome {
            beats: vec![],
            tempo: None,
            metadata: crate::parser::ParseMetadata {
                processing_time_ms: 0,
                samples_processed: 0,
                parameters: None,
                filename: None,
                warnings: vec![],
                capped_count: None,
                low_signal: false,
            },
        };
        assert!(
            BatchOutput::Single(Box::new(outcome.clone()))
                .into_single()
                .is_ok()
        );
        assert!(BatchOutput::Batch(vec![outcome.clone()]).into_single().is_ok());
        assert!(
            BatchOutput::Batch(vec![outcome.clone(), outcome])
                .into_single()
                .is_err()
        );
    }

    #[test]
    fn test_terminal_classification() {
        let progress = WorkerResponse::Progress(ProgressUpdate {
            id: 1,
            stage: Stage::Framing,
            current: 1,
            total: 10,
            percentage: Percent::new(10.),
        });
        assert!(!progress.is_terminal());
        assert_eq!(progress.id(), 1);

        let error = WorkerResponse::Error {
            id: 2,
            error: Error::Cancelled,
        };
        assert!(error.is_terminal());
        assert_eq!(error.id(), 2);
    }
}
