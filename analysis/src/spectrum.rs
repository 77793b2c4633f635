//! One-sided spectra and the spectral shape features derived from them.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::errors::{AnalysisError, AnalysisResult};
use crate::utils::{ensure_finite, next_power_of_two};

/// A forward FFT plan for a fixed input size.
///
/// Input is zero-padded to the next power of two; the transform returns the
/// one-sided spectrum of length `padded / 2 + 1`.
pub struct ForwardFft {
    fft: Arc<dyn Fft<f32>>,
    padded_size: usize,
}

impl std::fmt::Debug for ForwardFft {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardFft")
            .field("padded_size", &self.padded_size)
            .finish_non_exhaustive()
    }
}

impl ForwardFft {
    /// Plan a transform for inputs of (at most) `input_size` samples.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `input_size` is zero.
    #[inline]
    pub fn new(input_size: usize) -> AnalysisResult<Self> {
        if input_size == 0 {
            return Err(AnalysisError::InvalidParameter(
                "FFT input size must be at least 1".into(),
            ));
        }
        let padded_size = next_power_of_two(input_size);
        let fft = FftPlanner::new().plan_fft_forward(padded_size);
        Ok(Self { fft, padded_size })
    }

    /// Length of the one-sided spectrum this plan produces.
    #[must_use]
    #[inline]
    pub const fn spectrum_len(&self) -> usize {
        self.padded_size / 2 + 1
    }

    /// Compute the one-sided complex spectrum of `signal`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `signal` is longer than the planned
    /// size, and `NumericInstability` if the transform produces a non-finite
    /// value.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn process(&self, signal: &[f32]) -> AnalysisResult<Vec<Complex<f32>>> {
        if signal.len() > self.padded_size {
            return Err(AnalysisError::InvalidParameter(format!(
                "signal of {} samples exceeds planned FFT size {}",
                signal.len(),
                self.padded_size
            )));
        }

        let mut buffer: Vec<Complex<f32>> = signal
            .iter()
            .map(|&x| Complex::new(x, 0.))
            .chain(std::iter::repeat_n(
                Complex::new(0., 0.),
                self.padded_size - signal.len(),
            ))
            .collect();
        self.fft.process(&mut buffer);

        buffer.truncate(self.spectrum_len());
        if buffer.iter().any(|c| !c.re.is_finite() || !c.im.is_finite()) {
            return Err(AnalysisError::NumericInstability("fft".into()));
        }
        Ok(buffer)
    }
}

/// One-sided magnitude spectrum of `signal` (zero-padded to a power of two).
///
/// # Errors
///
/// See [`ForwardFft::process`].
#[allow(clippy::missing_inline_in_public_items)]
pub fn magnitude_spectrum(signal: &[f32]) -> AnalysisResult<Vec<f32>> {
    let spectrum = ForwardFft::new(signal.len().max(1))?.process(signal)?;
    Ok(spectrum.iter().map(|c| c.re.hypot(c.im)).collect())
}

/// One-sided power spectrum of `signal`.
///
/// # Errors
///
/// See [`ForwardFft::process`].
#[allow(clippy::missing_inline_in_public_items)]
pub fn power_spectrum(signal: &[f32]) -> AnalysisResult<Vec<f32>> {
    let spectrum = ForwardFft::new(signal.len().max(1))?.process(signal)?;
    Ok(spectrum.iter().map(|c| c.norm_sqr()).collect())
}

/// Log-compressed copy of a magnitude spectrum, `ln(1 + m)` per bin.
#[must_use]
#[inline]
pub fn log_magnitude(magnitudes: &[f32]) -> Vec<f32> {
    magnitudes.iter().map(|m| m.ln_1p()).collect()
}

/// Magnitude-weighted mean frequency of a one-sided spectrum.
///
/// Bin `i` maps to `i * sr / (2 * (len - 1))` Hz. A zero-energy spectrum has
/// a centroid of zero.
#[allow(clippy::cast_precision_loss, clippy::missing_inline_in_public_items)]
#[must_use]
pub fn spectral_centroid(magnitudes: &[f32], sample_rate: u32) -> f32 {
    if magnitudes.len() < 2 {
        return 0.;
    }
    let total: f32 = magnitudes.iter().sum();
    if total <= f32::EPSILON {
        return 0.;
    }

    let bin_hz = sample_rate as f32 / (2. * (magnitudes.len() - 1) as f32);
    let weighted: f32 = magnitudes
        .iter()
        .enumerate()
        .map(|(i, m)| i as f32 * bin_hz * m)
        .sum();
    weighted / total
}

/// Smallest frequency below which `fraction` of the total magnitude lies.
///
/// A zero-energy spectrum rolls off at zero.
#[allow(clippy::cast_precision_loss, clippy::missing_inline_in_public_items)]
#[must_use]
pub fn spectral_rolloff(magnitudes: &[f32], sample_rate: u32, fraction: f32) -> f32 {
    if magnitudes.len() < 2 {
        return 0.;
    }
    let total: f32 = magnitudes.iter().sum();
    if total <= f32::EPSILON {
        return 0.;
    }

    let bin_hz = sample_rate as f32 / (2. * (magnitudes.len() - 1) as f32);
    let target = total * fraction.clamp(0., 1.);
    let mut cumulative = 0.;
    for (i, m) in magnitudes.iter().enumerate() {
        cumulative += m;
        if cumulative >= target {
            return i as f32 * bin_hz;
        }
    }
    (magnitudes.len() - 1) as f32 * bin_hz
}

/// Guard a spectrum against NaN/Inf before it feeds downstream stages.
///
/// # Errors
///
/// Returns `NumericInstability` naming `stage` if any bin is non-finite.
#[inline]
pub fn guard_spectrum(stage: &str, magnitudes: &[f32]) -> AnalysisResult<()> {
    ensure_finite(stage, magnitudes)
}
