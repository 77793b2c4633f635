//! The validated mono sample container and the standardization pipeline
//! that produces it.
//!
//! Standardization is the deterministic transform every parse starts with:
//! collapse interleaved channels to mono by averaging, resample to the
//! target rate, optionally pull the peak down to 0.95 headroom.

use log::warn;

use crate::errors::{AnalysisError, AnalysisResult};
use crate::resample::resample;

/// Headroom target for peak normalization.
pub const NORMALIZE_HEADROOM: f32 = 0.95;

/// Mono audio at a known sample rate, validated on construction.
///
/// Invariants: at least one sample, every sample finite, positive rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer, validating the invariants.
    ///
    /// # Errors
    ///
    /// `EmptyInput` on zero samples, `InvalidParameter` on a zero rate,
    /// `InvalidAudio` if any sample is NaN or infinite.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> AnalysisResult<Self> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidParameter(
                "sample rate must be positive".into(),
            ));
        }
        if let Some(position) = samples.iter().position(|s| !s.is_finite()) {
            return Err(AnalysisError::InvalidAudio(format!(
                "non-finite sample at index {position}"
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    #[must_use]
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    #[inline]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length in seconds.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    #[inline]
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Number of samples outside `[-1, 1]`. Tolerated, but worth surfacing.
    #[must_use]
    #[inline]
    pub fn clipped_count(&self) -> usize {
        self.samples.iter().filter(|s| s.abs() > 1.).count()
    }

    #[must_use]
    #[inline]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Knobs for [`standardize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardizeOptions {
    /// Rate the buffer is resampled to.
    pub target_sample_rate: u32,
    /// Skip the resampling step entirely when false.
    pub resample: bool,
    /// Peak-normalize to [`NORMALIZE_HEADROOM`].
    pub normalize: bool,
    /// Run the anti-alias prefilter when downsampling.
    pub filter: bool,
    /// Replace non-finite samples with silence instead of failing.
    pub cleanup: bool,
}

impl Default for StandardizeOptions {
    #[inline]
    fn default() -> Self {
        Self {
            target_sample_rate: 44100,
            resample: true,
            normalize: true,
            filter: true,
            cleanup: false,
        }
    }
}

/// A standardized buffer plus everything worth reporting about the trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardized {
    pub buffer: AudioBuffer,
    /// Human-readable notes (cleanup actions, clipping) for parse metadata.
    pub warnings: Vec<String>,
    /// Samples outside `[-1, 1]` observed before normalization.
    pub clipped: usize,
}

/// Collapse, resample, and normalize raw interleaved samples.
///
/// # Errors
///
/// `EmptyInput` on no samples, `InvalidParameter` on zero channels/rates,
/// `InvalidAudio` on non-finite samples unless `opts.cleanup` is set.
#[allow(
    clippy::missing_inline_in_public_items,
    clippy::cast_precision_loss,
    clippy::cast_lossless
)]
pub fn standardize(
    raw: &[f32],
    channels: u16,
    from_rate: u32,
    opts: &StandardizeOptions,
) -> AnalysisResult<Standardized> {
    if raw.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    if channels == 0 {
        return Err(AnalysisError::InvalidParameter(
            "channel count must be positive".into(),
        ));
    }
    if from_rate == 0 || opts.target_sample_rate == 0 {
        return Err(AnalysisError::InvalidParameter(
            "sample rates must be positive".into(),
        ));
    }

    let mut warnings = Vec::new();

    // non-finite policy first, so the mono mix never sees NaN
    let mut cleaned: Vec<f32>;
    let source: &[f32] = if let Some(position) = raw.iter().position(|s| !s.is_finite()) {
        if !opts.cleanup {
            return Err(AnalysisError::InvalidAudio(format!(
                "non-finite sample at index {position}"
            )));
        }
        cleaned = raw.to_vec();
        let mut replaced = 0usize;
        for sample in &mut cleaned {
            if !sample.is_finite() {
                *sample = 0.;
                replaced += 1;
            }
        }
        warn!("replaced {replaced} non-finite samples with silence");
        warnings.push(format!("replaced {replaced} non-finite samples with silence"));
        &cleaned
    } else {
        raw
    };

    // channels are interleaved; average them into one
    let mut mono: Vec<f32> = match channels {
        1 => source.to_vec(),
        _ => source
            .chunks_exact(channels as usize)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect(),
    };
    if mono.is_empty() {
        // fewer samples than channels in one interleaved step
        return Err(AnalysisError::EmptyInput);
    }

    let clipped = mono.iter().filter(|s| s.abs() > 1.).count();
    if clipped > 0 {
        warnings.push(format!("{clipped} samples exceed full scale"));
    }

    if opts.resample && from_rate != opts.target_sample_rate {
        mono = resample(&mono, from_rate, opts.target_sample_rate, opts.filter)?;
        if mono.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
    }

    if opts.normalize {
        normalize_peak(&mut mono, NORMALIZE_HEADROOM);
    }
    mono.shrink_to_fit();

    let rate = if opts.resample {
        opts.target_sample_rate
    } else {
        from_rate
    };
    Ok(Standardized {
        buffer: AudioBuffer::new(mono, rate)?,
        warnings,
        clipped,
    })
}

/// Scale `samples` so the absolute peak sits at `headroom`.
///
/// Silence is left untouched. Applying this twice is a fixed point: the
/// second pass sees a peak already at `headroom` and rescales by 1.
#[allow(clippy::missing_inline_in_public_items)]
pub fn normalize_peak(samples: &mut [f32], headroom: f32) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak <= f32::EPSILON {
        return;
    }
    let gain = headroom / peak;
    for sample in samples {
        *sample *= gain;
    }
}
