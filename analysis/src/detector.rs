//! The per-parse pipeline driver.
//!
//! [`DetectorSession`] consumes samples incrementally (chunks may arrive at
//! any granularity) and keeps a hop-aligned carry so the frame sequence is
//! identical no matter how the audio was sliced. [`BeatDetector`] is the
//! whole-buffer convenience over the same session, which is what makes
//! chunked and single-buffer parses agree.
//!
//! Progress and cooperative cancellation happen at stage boundaries: the
//! sink is consulted after each frame batch and between the coarse stages.

use log::debug;

use crate::buffer::AudioBuffer;
use crate::candidates::{self, CandidateOptions};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::frames::{FeatureExtractor, frame_count};
use crate::onset::{OnsetDetector, OnsetOptions, OnsetOutput};
use crate::select::{self, SelectionMethod, SelectionOutcome};
use crate::tempo::{self, TempoOptions};
use crate::window::WindowType;
use crate::{NoProgress, ProgressSink, Stage, Tempo};

/// Full tuning for one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    pub frame_size: usize,
    pub hop_size: usize,
    pub window: WindowType,
    /// Zero-pad the trailing partial frame instead of dropping it.
    pub pad_final_frame: bool,
    /// Re-pick onsets with the detected tempo as a refractory prior.
    pub multi_pass: bool,
    /// Candidates below this confidence never reach selection.
    pub confidence_threshold: f32,
    pub onset: OnsetOptions,
    pub tempo: TempoOptions,
    pub candidates: CandidateOptions,
}

impl Default for DetectorOptions {
    #[inline]
    fn default() -> Self {
        Self {
            frame_size: 2048,
            hop_size: 512,
            window: WindowType::Hanning,
            pad_final_frame: false,
            multi_pass: false,
            confidence_threshold: 0.6,
            onset: OnsetOptions::default(),
            tempo: TempoOptions::default(),
            candidates: CandidateOptions::default(),
        }
    }
}

impl DetectorOptions {
    /// # Errors
    ///
    /// `InvalidParameter` on inconsistent geometry, weights, or tempo range.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.frame_size < 2 {
            return Err(AnalysisError::InvalidParameter(format!(
                "frame size {} must be at least 2",
                self.frame_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(AnalysisError::InvalidParameter(format!(
                "hop size {} must be in 1..={}",
                self.hop_size, self.frame_size
            )));
        }
        if !self.confidence_threshold.is_finite()
            || !(0. ..=1.).contains(&self.confidence_threshold)
        {
            return Err(AnalysisError::InvalidParameter(format!(
                "confidence threshold {} must be in [0, 1]",
                self.confidence_threshold
            )));
        }
        self.onset.validate()?;
        self.tempo.validate()
    }
}

/// Everything the pipeline learned about one piece of audio, before
/// selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Deduplicated candidates above the confidence threshold, time-ordered.
    pub candidates: Vec<crate::BeatCandidate>,
    pub tempo: Option<Tempo>,
    pub frames_processed: usize,
    /// The signal energy sat below the floor; candidates are empty and this
    /// is a property of the input, not an error.
    pub low_signal: bool,
    /// Seconds of audio consumed.
    pub duration: f64,
}

/// Incremental detection over arbitrarily sliced sample chunks.
#[derive(Debug)]
pub struct DetectorSession {
    opts: DetectorOptions,
    extractor: FeatureExtractor,
    onset: OnsetDetector,
    /// Unconsumed tail, always shorter than one frame after a push.
    pending: Vec<f32>,
    /// Absolute sample index of `pending[0]`.
    pending_offset: usize,
    total_samples: usize,
    frames_done: usize,
    /// Expected total frames, 0 when unknown (pure streaming).
    frames_hint: usize,
}

impl DetectorSession {
    /// # Errors
    ///
    /// `InvalidParameter` on a zero sample rate or invalid options.
    #[allow(clippy::missing_inline_in_public_items, clippy::cast_precision_loss)]
    pub fn new(sample_rate: u32, opts: DetectorOptions) -> AnalysisResult<Self> {
        opts.validate()?;
        let extractor =
            FeatureExtractor::new(sample_rate, opts.frame_size, opts.hop_size, opts.window)?;
        let center_seconds = opts.frame_size as f64 / (2. * f64::from(sample_rate));
        let onset = OnsetDetector::new(extractor.hop_seconds(), center_seconds, opts.onset)?;
        Ok(Self {
            opts,
            extractor,
            onset,
            pending: Vec::new(),
            pending_offset: 0,
            total_samples: 0,
            frames_done: 0,
            frames_hint: 0,
        })
    }

    /// Tell the session how many samples to expect, for progress totals.
    #[inline]
    pub fn expect_samples(&mut self, total: usize) {
        self.frames_hint = frame_count(
            total,
            self.opts.frame_size,
            self.opts.hop_size,
            self.opts.pad_final_frame,
        );
    }

    #[must_use]
    #[inline]
    pub const fn total_samples(&self) -> usize {
        self.total_samples
    }

    #[must_use]
    #[inline]
    pub const fn frames_processed(&self) -> usize {
        self.frames_done
    }

    /// Feed the next block of samples.
    ///
    /// Returns `false` when the sink asked to cancel; the session is then
    /// spent and [`finish`](Self::finish) should not be called.
    ///
    /// # Errors
    ///
    /// Propagates extraction failures (`NumericInstability` on non-finite
    /// spectra).
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn push_samples(
        &mut self,
        samples: &[f32],
        sink: &mut dyn ProgressSink,
    ) -> AnalysisResult<bool> {
        self.total_samples += samples.len();
        self.pending.extend_from_slice(samples);

        let ready = frame_count(
            self.pending.len(),
            self.opts.frame_size,
            self.opts.hop_size,
            false,
        );
        if ready > 0 {
            let span = (ready - 1) * self.opts.hop_size + self.opts.frame_size;
            let frames = self
                .extractor
                .extract_all(&self.pending[..span], self.pending_offset)?;
            for frame in &frames {
                self.onset.process_frame(frame);
            }
            self.frames_done += frames.len();

            let consumed = ready * self.opts.hop_size;
            self.pending.drain(..consumed.min(self.pending.len()));
            self.pending_offset += consumed;
        }

        Ok(sink.report(
            Stage::Framing,
            self.frames_done,
            self.frames_hint.max(self.frames_done),
        ))
    }

    /// Run the remaining stages and collapse the session into a
    /// [`Detection`].
    ///
    /// Returns `Ok(None)` when the sink cancelled at a stage boundary.
    ///
    /// # Errors
    ///
    /// Propagates onset fusion, tempo, and numeric failures.
    /// `InsufficientSignal` from the onset stage is folded into
    /// `low_signal` instead of surfacing as an error.
    #[allow(clippy::missing_inline_in_public_items, clippy::cast_precision_loss)]
    pub fn finish(mut self, sink: &mut dyn ProgressSink) -> AnalysisResult<Option<Detection>> {
        if self.opts.pad_final_frame && !self.pending.is_empty() {
            self.pending.resize(self.opts.frame_size, 0.);
            let frame = self
                .extractor
                .extract(&self.pending, self.pending_offset)?;
            self.onset.process_frame(&frame);
            self.frames_done += 1;
        }

        let duration = self.total_samples as f64 / f64::from(self.extractor.sample_rate());
        let frames_processed = self.frames_done;

        if !sink.report(Stage::Onset, 0, 1) {
            return Ok(None);
        }
        let first_pass = match self.onset.finalize() {
            Ok(output) => output,
            Err(AnalysisError::InsufficientSignal(reason)) => {
                debug!("low signal: {reason}");
                return Ok(Some(Detection {
                    candidates: Vec::new(),
                    tempo: None,
                    frames_processed,
                    low_signal: true,
                    duration,
                }));
            }
            Err(other) => return Err(other),
        };

        if !sink.report(Stage::Tempo, 0, 1) {
            return Ok(None);
        }
        let tempo = tempo::estimate(&first_pass.envelope, &first_pass.peaks, &self.opts.tempo)?;

        // optionally re-pick onsets with the tempo as a refractory prior
        let OnsetOutput { peaks, .. } = match (&tempo, self.opts.multi_pass) {
            (Some(tempo), true) => self.onset.finalize_with_prior(Some(tempo.bpm))?,
            _ => first_pass,
        };

        if !sink.report(Stage::Candidates, 0, 1) {
            return Ok(None);
        }
        let mut candidates =
            candidates::build(&peaks, tempo.as_ref(), duration, &self.opts.candidates);
        candidates.retain(|c| c.confidence >= self.opts.confidence_threshold);

        Ok(Some(Detection {
            candidates,
            tempo,
            frames_processed,
            low_signal: false,
            duration,
        }))
    }
}

/// Whole-buffer detection.
#[derive(Debug)]
pub struct BeatDetector {
    sample_rate: u32,
    opts: DetectorOptions,
}

impl BeatDetector {
    /// # Errors
    ///
    /// `InvalidParameter` on a zero sample rate or invalid options.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(sample_rate: u32, opts: DetectorOptions) -> AnalysisResult<Self> {
        opts.validate()?;
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidParameter(
                "sample rate must be positive".into(),
            ));
        }
        Ok(Self { sample_rate, opts })
    }

    #[must_use]
    #[inline]
    pub const fn options(&self) -> &DetectorOptions {
        &self.opts
    }

    /// Run the pipeline over one standardized buffer.
    ///
    /// Returns `Ok(None)` when the sink cancelled.
    ///
    /// # Errors
    ///
    /// See [`DetectorSession::finish`].
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn detect(
        &self,
        buffer: &AudioBuffer,
        sink: &mut dyn ProgressSink,
    ) -> AnalysisResult<Option<Detection>> {
        let mut session = DetectorSession::new(self.sample_rate, self.opts)?;
        session.expect_samples(buffer.len());

        // feed in roughly one-second batches so progress stays live and
        // cancellation is observed within bounded time
        let batch = (self.sample_rate as usize).max(self.opts.frame_size);
        for chunk in buffer.samples().chunks(batch) {
            if !session.push_samples(chunk, sink)? {
                return Ok(None);
            }
        }
        session.finish(sink)
    }

    /// Detect, then select up to `requested` beats.
    ///
    /// Returns `Ok(None)` when the sink cancelled.
    ///
    /// # Errors
    ///
    /// See [`detect`](Self::detect).
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn detect_beats(
        &self,
        buffer: &AudioBuffer,
        requested: Option<usize>,
        method: SelectionMethod,
        sink: &mut dyn ProgressSink,
    ) -> AnalysisResult<Option<(SelectionOutcome, Detection)>> {
        let Some(detection) = self.detect(buffer, sink)? else {
            return Ok(None);
        };
        if !sink.report(Stage::Selection, 0, 1) {
            return Ok(None);
        }
        let outcome = select::select(
            &detection.candidates,
            requested,
            method,
            detection.duration,
            self.opts.tempo.max_tempo,
        );
        Ok(Some((outcome, detection)))
    }

    /// Convenience for callers that don't care about progress.
    ///
    /// # Errors
    ///
    /// See [`detect_beats`](Self::detect_beats).
    ///
    /// # Panics
    ///
    /// Never: the no-op sink cannot cancel.
    #[inline]
    pub fn detect_beats_simple(
        &self,
        buffer: &AudioBuffer,
        requested: Option<usize>,
        method: SelectionMethod,
    ) -> AnalysisResult<(SelectionOutcome, Detection)> {
        self.detect_beats(buffer, requested, method, &mut NoProgress)
            .map(|detection| detection.expect("NoProgress never cancels"))
    }
}
