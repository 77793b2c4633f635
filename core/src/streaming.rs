//! Chunked-ingestion support for [`Parser::parse_chunks`](crate::parser::Parser::parse_chunks).
//!
//! The heavy lifting, the hop-aligned carry that makes chunked and
//! single-buffer parses agree, lives in the analysis crate's
//! `DetectorSession`. This module holds the stream-surface policy: overlap
//! trimming and the non-finite-sample rules for chunks.

use serde::{Deserialize, Serialize};

use crate::errors::{CoreResult, Error};

/// Options for chunked parsing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Fraction of each chunk (after the first) that repeats the previous
    /// chunk's tail. Must lie in `[0, 0.5)`.
    pub overlap: f32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { overlap: 0. }
    }
}

impl StreamOptions {
    /// # Errors
    ///
    /// `InvalidConfig` when the overlap is outside `[0, 0.5)`.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.overlap.is_finite() || self.overlap < 0. || self.overlap >= 0.5 {
            return Err(Error::InvalidConfig(format!(
                "stream overlap {} must be in [0, 0.5)",
                self.overlap
            )));
        }
        Ok(())
    }

    /// Samples to skip at the head of chunk `index` so overlapped content
    /// is not analyzed twice.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn head_skip(&self, index: usize, chunk_len: usize) -> usize {
        if index == 0 {
            return 0;
        }
        ((chunk_len as f32 * self.overlap).round() as usize).min(chunk_len)
    }

    /// Total samples the session will actually consume from `chunks`.
    #[must_use]
    pub fn effective_len(&self, chunks: &[Vec<f32>]) -> usize {
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| c.len() - self.head_skip(i, c.len()))
            .sum()
    }
}

/// Apply the chunk-level non-finite policy: scrub to silence when cleanup is
/// enabled, fail the whole parse otherwise.
///
/// # Errors
///
/// `InvalidAudio` on the first non-finite sample when `cleanup` is off.
pub(crate) fn scrub_chunk(chunk: &[f32], cleanup: bool) -> CoreResult<Vec<f32>> {
    match chunk.iter().position(|s| !s.is_finite()) {
        None => Ok(chunk.to_vec()),
        Some(position) if !cleanup => Err(Error::Analysis(
            beatgrid_analysis::errors::AnalysisError::InvalidAudio(format!(
                "non-finite sample at chunk offset {position}"
            )),
        )),
        Some(_) => Ok(chunk
            .iter()
            .map(|s| if s.is_finite() { *s } else { 0. })
            .collect()),
    }
}
