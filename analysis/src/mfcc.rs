//! Mel-frequency cepstral coefficients.
//!
//! Pre-emphasis, power spectrum, triangular mel filter bank, log energies,
//! and an orthonormal DCT-II. Filter banks are cached per
//! `(sample_rate, bands, spectrum bins)` since they only depend on those.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use once_cell::sync::Lazy;

use crate::errors::{AnalysisError, AnalysisResult};
use crate::spectrum::power_spectrum;
use crate::utils::ensure_finite;

/// Number of triangular filters in the default bank.
pub const MEL_BANDS: usize = 26;
/// Number of cepstral coefficients kept by default.
pub const MFCC_COEFFICIENTS: usize = 13;
/// Pre-emphasis coefficient.
pub const PRE_EMPHASIS: f32 = 0.97;

const LOG_FLOOR: f32 = 1e-10;

#[must_use]
#[inline]
pub fn hz_to_mel(hz: f32) -> f32 {
    2595. * (1. + hz / 700.).log10()
}

#[must_use]
#[inline]
pub fn mel_to_hz(mel: f32) -> f32 {
    700. * (10.0f32.powf(mel / 2595.) - 1.)
}

/// A bank of triangular mel filters over a one-sided power spectrum.
#[derive(Debug)]
pub struct MelFilterBank {
    /// One weight vector per band, each as long as the spectrum.
    filters: Vec<Vec<f32>>,
}

impl MelFilterBank {
    /// Number of bands.
    #[must_use]
    #[inline]
    pub fn bands(&self) -> usize {
        self.filters.len()
    }

    /// Apply the bank to a power spectrum, yielding one energy per band.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the spectrum length does not match the bank.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn apply(&self, power: &[f32]) -> AnalysisResult<Vec<f32>> {
        let expected = self.filters.first().map_or(0, Vec::len);
        if power.len() != expected {
            return Err(AnalysisError::InvalidParameter(format!(
                "spectrum of {} bins does not match filter bank of {expected}",
                power.len()
            )));
        }
        Ok(self
            .filters
            .iter()
            .map(|filter| filter.iter().zip(power).map(|(w, p)| w * p).sum())
            .collect())
    }
}

static BANK_CACHE: Lazy<Mutex<HashMap<(u32, usize, usize), Arc<MelFilterBank>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Get the (cached) mel filter bank for the given layout.
///
/// Filters span `[0, sample_rate / 2]` with triangular responses centered on
/// equally spaced mel points.
///
/// # Errors
///
/// `InvalidParameter` if `bands` is zero, the spectrum is too short to hold
/// the bank, or the sample rate is zero.
///
/// # Panics
///
/// Panics if the cache mutex was poisoned by a panicking thread.
#[allow(clippy::missing_inline_in_public_items)]
pub fn mel_filter_bank(
    sample_rate: u32,
    bands: usize,
    spectrum_len: usize,
) -> AnalysisResult<Arc<MelFilterBank>> {
    if sample_rate == 0 {
        return Err(AnalysisError::InvalidParameter(
            "sample rate must be positive".into(),
        ));
    }
    if bands == 0 {
        return Err(AnalysisError::InvalidParameter(
            "mel filter bank needs at least one band".into(),
        ));
    }
    if spectrum_len < bands + 2 {
        return Err(AnalysisError::InvalidParameter(format!(
            "spectrum of {spectrum_len} bins cannot hold {bands} mel bands"
        )));
    }

    let mut cache = BANK_CACHE.lock().unwrap();
    if let Some(bank) = cache.get(&(sample_rate, bands, spectrum_len)) {
        return Ok(Arc::clone(bank));
    }

    let bank = Arc::new(compute_bank(sample_rate, bands, spectrum_len));
    cache.insert((sample_rate, bands, spectrum_len), Arc::clone(&bank));
    Ok(bank)
}

#[allow(clippy::cast_precision_loss)]
fn compute_bank(sample_rate: u32, bands: usize, spectrum_len: usize) -> MelFilterBank {
    let nyquist = sample_rate as f32 / 2.;
    let max_mel = hz_to_mel(nyquist);

    // band centers at equally spaced mel points, with one extra point on
    // each side for the triangle feet
    let points: Vec<f32> = (0..bands + 2)
        .map(|i| mel_to_hz(max_mel * i as f32 / (bands + 1) as f32))
        .collect();
    let bin_hz = nyquist / (spectrum_len - 1) as f32;

    let filters = (0..bands)
        .map(|band| {
            let (left, center, right) = (points[band], points[band + 1], points[band + 2]);
            (0..spectrum_len)
                .map(|bin| {
                    let hz = bin as f32 * bin_hz;
                    if hz <= left || hz >= right {
                        0.
                    } else if hz <= center {
                        (hz - left) / (center - left)
                    } else {
                        (right - hz) / (right - center)
                    }
                })
                .collect()
        })
        .collect();

    MelFilterBank { filters }
}

/// Compute the first `n_coefficients` MFCCs of one frame.
///
/// # Errors
///
/// `InvalidParameter` on an empty frame, a zero coefficient count, or more
/// coefficients than mel bands; `NumericInstability` if the cepstrum goes
/// non-finite.
#[allow(clippy::missing_inline_in_public_items)]
pub fn mfcc(frame: &[f32], sample_rate: u32, n_coefficients: usize) -> AnalysisResult<Vec<f32>> {
    if frame.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    if n_coefficients == 0 || n_coefficients > MEL_BANDS {
        return Err(AnalysisError::InvalidParameter(format!(
            "coefficient count {n_coefficients} must be in 1..={MEL_BANDS}"
        )));
    }

    // pre-emphasis boosts the high band before the spectrum is taken
    let mut emphasized = Vec::with_capacity(frame.len());
    emphasized.push(frame[0]);
    for pair in frame.windows(2) {
        emphasized.push(PRE_EMPHASIS.mul_add(-pair[0], pair[1]));
    }

    let power = power_spectrum(&emphasized)?;
    let bank = mel_filter_bank(sample_rate, MEL_BANDS, power.len())?;
    let energies = bank.apply(&power)?;
    let log_energies: Vec<f32> = energies.iter().map(|e| e.max(LOG_FLOOR).ln()).collect();

    let cepstrum = dct_ii_orthonormal(&log_energies, n_coefficients);
    ensure_finite("mfcc", &cepstrum)?;
    Ok(cepstrum)
}

/// Orthonormal DCT-II, keeping the first `keep` coefficients.
#[allow(clippy::cast_precision_loss)]
fn dct_ii_orthonormal(input: &[f32], keep: usize) -> Vec<f32> {
    let n = input.len() as f32;
    (0..keep)
        .map(|k| {
            let sum: f32 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x * (std::f32::consts::PI * k as f32 * (2. * i as f32 + 1.) / (2. * n)).cos()
                })
                .sum();
            let scale = if k == 0 { (1. / n).sqrt() } else { (2. / n).sqrt() };
            scale * sum
        })
        .collect()
}
