//! This library extracts beats and a global tempo from raw mono PCM audio.
//!
//! A fair amount of the DSP scaffolding in here follows the conventions of
//! [bliss-rs](https://github.com/Polochon-street/bliss-rs)-style analysis
//! crates: streaming descriptor objects that are fed frame by frame, with a
//! final call that collapses their state into a value.
//!
//! The crate deliberately stops at decoded samples: container decoding
//! (WAV/MP3/OGG/FLAC → PCM) is the caller's job. Feed
//! [`buffer::standardize`] interleaved floats and a sample rate, then hand
//! the result to a [`detector::BeatDetector`].

#![deny(clippy::missing_inline_in_public_items)]

pub mod buffer;
pub mod candidates;
pub mod detector;
pub mod errors;
pub mod filters;
pub mod frames;
pub mod mfcc;
pub mod onset;
pub mod resample;
pub mod select;
pub mod spectrum;
pub mod tempo;
pub mod utils;
pub mod window;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// The scalar sample type used everywhere in this crate.
pub type Sample = f32;

/// The default standardization target rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Where a beat candidate came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    /// A confident onset with no supporting grid point.
    Onset,
    /// A tempo-grid point with no supporting onset.
    Grid,
    /// An onset confirmed by the tempo grid.
    Fused,
}

/// A candidate beat, before selection has trimmed the set down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatCandidate {
    /// Seconds from the start of the audio.
    pub timestamp: f64,
    /// How sure the detector is that this is a beat, in `[0, 1]`.
    pub confidence: f32,
    /// Onset energy behind the candidate. Non-negative, unbounded.
    pub strength: f32,
    pub source: CandidateSource,
}

impl BeatCandidate {
    #[must_use]
    #[inline]
    pub const fn into_beat(self) -> Beat {
        Beat {
            timestamp: self.timestamp,
            confidence: self.confidence,
            strength: self.strength,
            source: self.source,
        }
    }
}

/// A selected beat, ordered by timestamp in the final result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    /// Seconds from the start of the audio.
    pub timestamp: f64,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Onset energy behind the beat. Non-negative.
    pub strength: f32,
    pub source: CandidateSource,
}

/// A time signature, when one could be inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

/// A runner-up tempo hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoAlternative {
    pub bpm: f32,
    pub confidence: f32,
}

/// The estimated global tempo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    /// Beats per minute, positive.
    pub bpm: f32,
    /// Estimator confidence in `[0, 1]`.
    pub confidence: f32,
    pub time_signature: Option<TimeSignature>,
    /// Offset of the first grid beat from the start of the audio, seconds.
    pub phase: f64,
    /// How steady the inter-onset intervals were, in `[0, 1]`.
    pub stability: f32,
    /// Up to two runner-up hypotheses, strongest first.
    pub alternatives: Vec<TempoAlternative>,
}

impl Tempo {
    /// Seconds per beat.
    #[must_use]
    #[inline]
    pub fn period(&self) -> f64 {
        60. / f64::from(self.bpm)
    }
}

/// The coarse pipeline stages, in execution order.
///
/// Progress reporting and cooperative cancellation both happen at these
/// boundaries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Standardize,
    Framing,
    Onset,
    Tempo,
    Candidates,
    Selection,
}

/// Observer for pipeline progress.
///
/// Returning `false` from [`report`](Self::report) asks the pipeline to stop
/// at the next stage boundary; the caller then sees a cancelled outcome
/// rather than a result.
pub trait ProgressSink {
    fn report(&mut self, stage: Stage, current: usize, total: usize) -> bool;
}

/// A sink that ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    #[inline]
    fn report(&mut self, _stage: Stage, _current: usize, _total: usize) -> bool {
        true
    }
}
