//! Onset detection.
//!
//! Three detection functions are computed per frame and fused into one
//! envelope: spectral flux, frame energy, and a complex-domain deviation
//! measure. Peaks of the fused envelope are picked against an adaptive
//! median + MAD threshold with a refractory period.
//!
//! The detector is a streaming object in the spirit of the other descriptor
//! types: feed it frames as they are produced, then call
//! [`finalize`](OnsetDetector::finalize) once.

use ndarray::arr1;
use ndarray_stats::Quantile1dExt;
use ndarray_stats::interpolate::Midpoint;
use noisy_float::prelude::*;

use crate::errors::{AnalysisError, AnalysisResult};
use crate::frames::FeatureFrame;
use crate::utils::ensure_finite;

/// Tuning for the onset stage.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OnsetOptions {
    /// Fusion weight of the spectral-flux function.
    pub flux_weight: f32,
    /// Fusion weight of the energy function.
    pub energy_weight: f32,
    /// Fusion weight of the complex-domain function.
    pub complex_weight: f32,
    /// Log-compress magnitudes before the flux difference.
    pub log_magnitude: bool,
    /// Weight flux bins by frequency, emphasizing percussive energy.
    pub hf_weighting: bool,
    /// Compute the energy function from frequency-weighted spectra instead
    /// of plain RMS.
    pub hf_emphasis: bool,
    /// Use squared L2 energy instead of RMS.
    pub squared_energy: bool,
    /// Sliding window length (frames) for the adaptive threshold.
    pub threshold_window: usize,
    /// MAD multiplier added to the sliding median.
    pub threshold_k: f32,
    /// Hard floor on the spacing of picked peaks, seconds.
    pub min_peak_gap: f64,
    /// Upper tempo bound; the refractory period never drops below one beat
    /// at this tempo.
    pub max_tempo: f32,
    /// Mean frame RMS below this counts as no usable signal.
    pub energy_floor: f32,
}

impl Default for OnsetOptions {
    #[inline]
    fn default() -> Self {
        Self {
            flux_weight: 0.5,
            energy_weight: 0.3,
            complex_weight: 0.2,
            log_magnitude: false,
            hf_weighting: false,
            hf_emphasis: false,
            squared_energy: false,
            threshold_window: 20,
            threshold_k: 1.5,
            min_peak_gap: 0.03,
            max_tempo: 200.,
            energy_floor: 1e-5,
        }
    }
}

impl OnsetOptions {
    /// # Errors
    ///
    /// `InvalidParameter` on non-finite or negative weights, a zero weight
    /// sum, a zero threshold window, or a non-positive tempo bound.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn validate(&self) -> AnalysisResult<()> {
        let weights = [self.flux_weight, self.energy_weight, self.complex_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.) {
            return Err(AnalysisError::InvalidParameter(
                "onset fusion weights must be finite and non-negative".into(),
            ));
        }
        if weights.iter().sum::<f32>() <= 0. {
            return Err(AnalysisError::InvalidParameter(
                "onset fusion weights must not all be zero".into(),
            ));
        }
        if self.threshold_window == 0 {
            return Err(AnalysisError::InvalidParameter(
                "threshold window must hold at least one frame".into(),
            ));
        }
        if !self.max_tempo.is_finite() || self.max_tempo <= 0. {
            return Err(AnalysisError::InvalidParameter(format!(
                "max tempo {} must be positive",
                self.max_tempo
            )));
        }
        if !self.min_peak_gap.is_finite() || self.min_peak_gap < 0. {
            return Err(AnalysisError::InvalidParameter(
                "minimum peak gap must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// The fused onset envelope: one non-negative score per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OnsetEnvelope {
    pub scores: Vec<f32>,
    /// Seconds between consecutive scores.
    pub hop_seconds: f64,
}

impl OnsetEnvelope {
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Time of the `index`-th score, seconds.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    #[inline]
    pub fn time(&self, index: usize) -> f64 {
        index as f64 * self.hop_seconds
    }
}

/// A picked onset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetPeak {
    /// Frame index into the envelope.
    pub index: usize,
    /// Seconds from the start of the audio.
    pub time: f64,
    /// Fused envelope score at the peak.
    pub score: f32,
    /// Score relative to the strongest peak, in `[0, 1]`.
    pub confidence: f32,
}

/// Result of [`OnsetDetector::finalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct OnsetOutput {
    pub envelope: OnsetEnvelope,
    pub peaks: Vec<OnsetPeak>,
}

/// Streaming three-way onset detector.
#[derive(Debug, Clone)]
pub struct OnsetDetector {
    opts: OnsetOptions,
    hop_seconds: f64,
    center_seconds: f64,
    flux: Vec<f32>,
    energy: Vec<f32>,
    complex: Vec<f32>,
    rms_sum: f64,
    prev_magnitude: Option<Vec<f32>>,
    prev_phase: Option<Vec<f32>>,
    prev_prev_phase: Option<Vec<f32>>,
}

impl OnsetDetector {
    /// `center_seconds` is half the frame length: a transient's windowed
    /// response is strongest in the frame centered on it, so picked peaks
    /// report `frame start + center`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` on a non-positive hop, a negative center, or
    /// invalid options.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(hop_seconds: f64, center_seconds: f64, opts: OnsetOptions) -> AnalysisResult<Self> {
        if !hop_seconds.is_finite() || hop_seconds <= 0. {
            return Err(AnalysisError::InvalidParameter(format!(
                "hop of {hop_seconds} seconds must be positive"
            )));
        }
        if !center_seconds.is_finite() || center_seconds < 0. {
            return Err(AnalysisError::InvalidParameter(format!(
                "frame center of {center_seconds} seconds must be non-negative"
            )));
        }
        opts.validate()?;
        Ok(Self {
            opts,
            hop_seconds,
            center_seconds,
            flux: Vec::new(),
            energy: Vec::new(),
            complex: Vec::new(),
            rms_sum: 0.,
            prev_magnitude: None,
            prev_phase: None,
            prev_prev_phase: None,
        })
    }

    /// Frames seen so far.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.flux.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }

    /// Feed the next frame. Frames must arrive in time order.
    #[allow(clippy::missing_inline_in_public_items, clippy::cast_precision_loss)]
    pub fn process_frame(&mut self, frame: &FeatureFrame) {
        let magnitudes = self.shaped_magnitudes(frame);

        // spectral flux: half-wave rectified positive change per bin
        let flux = self.prev_magnitude.as_ref().map_or(0., |prev| {
            magnitudes
                .iter()
                .zip(prev)
                .map(|(m, p)| (m - p).max(0.))
                .sum()
        });
        self.flux.push(flux);

        // energy
        let energy = if self.opts.hf_emphasis {
            let n = frame.magnitude_spectrum.len() as f32;
            let weighted: f32 = frame
                .magnitude_spectrum
                .iter()
                .enumerate()
                .map(|(k, m)| {
                    let w = k as f32 / n;
                    (w * m) * (w * m)
                })
                .sum();
            let mean = weighted / n;
            if self.opts.squared_energy {
                mean
            } else {
                mean.sqrt()
            }
        } else if self.opts.squared_energy {
            frame.rms * frame.rms
        } else {
            frame.rms
        };
        self.energy.push(energy);

        // complex domain: deviation from a one-step linear phase predictor
        let complex = match (&self.prev_phase, &self.prev_prev_phase, &self.prev_magnitude) {
            (Some(phase1), Some(phase2), Some(magnitude1)) => frame
                .magnitude_spectrum
                .iter()
                .zip(&frame.phase_spectrum)
                .zip(phase1.iter().zip(phase2))
                .zip(magnitude1)
                .map(|(((m, phi), (p1, p2)), m1)| {
                    let predicted = 2.0f32.mul_add(*p1, -*p2);
                    let expected_re = m1 * predicted.cos();
                    let expected_im = m1 * predicted.sin();
                    (m * phi.cos() - expected_re).hypot(m * phi.sin() - expected_im)
                })
                .sum(),
            _ => 0.,
        };
        self.complex.push(complex);

        self.rms_sum += f64::from(frame.rms);
        self.prev_prev_phase = self.prev_phase.take();
        self.prev_phase = Some(frame.phase_spectrum.clone());
        self.prev_magnitude = Some(magnitudes);
    }

    /// Magnitudes after the configured flux shaping.
    #[allow(clippy::cast_precision_loss)]
    fn shaped_magnitudes(&self, frame: &FeatureFrame) -> Vec<f32> {
        let n = frame.magnitude_spectrum.len() as f32;
        frame
            .magnitude_spectrum
            .iter()
            .enumerate()
            .map(|(k, m)| {
                let mut value = *m;
                if self.opts.hf_weighting {
                    value *= k as f32 / n;
                }
                if self.opts.log_magnitude {
                    value = value.ln_1p();
                }
                value
            })
            .collect()
    }

    /// Fuse, threshold, and pick peaks.
    ///
    /// # Errors
    ///
    /// `InsufficientSignal` when the mean frame RMS sits below the floor,
    /// `NumericInstability` if any score went non-finite.
    #[inline]
    pub fn finalize(&self) -> AnalysisResult<OnsetOutput> {
        self.finalize_with_prior(None)
    }

    /// Like [`finalize`](Self::finalize), with a tempo prior tightening the
    /// refractory period to half a beat at the given BPM.
    ///
    /// # Errors
    ///
    /// See [`finalize`](Self::finalize).
    #[allow(clippy::missing_inline_in_public_items, clippy::cast_precision_loss)]
    pub fn finalize_with_prior(&self, tempo_prior_bpm: Option<f32>) -> AnalysisResult<OnsetOutput> {
        let envelope_len = self.flux.len();
        if envelope_len == 0 {
            return Ok(OnsetOutput {
                envelope: OnsetEnvelope {
                    scores: Vec::new(),
                    hop_seconds: self.hop_seconds,
                },
                peaks: Vec::new(),
            });
        }

        let mean_rms = self.rms_sum / envelope_len as f64;
        if mean_rms < f64::from(self.opts.energy_floor) {
            return Err(AnalysisError::InsufficientSignal(format!(
                "mean frame energy {mean_rms:.2e} is below the floor"
            )));
        }

        let scores = self.combined_scores()?;
        let threshold = adaptive_threshold(
            &scores,
            self.opts.threshold_window,
            self.opts.threshold_k,
        );

        let min_gap = tempo_prior_bpm.map_or_else(
            || f64::from(60. / self.opts.max_tempo).max(self.opts.min_peak_gap),
            |bpm| (30. / f64::from(bpm)).max(self.opts.min_peak_gap),
        );
        let peaks = pick_peaks(
            &scores,
            &threshold,
            self.hop_seconds,
            self.center_seconds,
            min_gap,
        );

        Ok(OnsetOutput {
            envelope: OnsetEnvelope {
                scores,
                hop_seconds: self.hop_seconds,
            },
            peaks,
        })
    }

    /// Weighted sum of the three functions, each normalized to `[0, 1]`.
    fn combined_scores(&self) -> AnalysisResult<Vec<f32>> {
        let weight_sum = self.opts.flux_weight + self.opts.energy_weight + self.opts.complex_weight;
        let (wf, we, wc) = (
            self.opts.flux_weight / weight_sum,
            self.opts.energy_weight / weight_sum,
            self.opts.complex_weight / weight_sum,
        );

        let norm = |values: &[f32]| -> f32 {
            let max = values.iter().fold(0.0f32, |acc, v| acc.max(*v));
            if max > 0. { 1. / max } else { 0. }
        };
        let (nf, ne, nc) = (norm(&self.flux), norm(&self.energy), norm(&self.complex));

        let scores: Vec<f32> = (0..self.flux.len())
            .map(|i| {
                wc.mul_add(
                    self.complex[i] * nc,
                    wf.mul_add(self.flux[i] * nf, we * self.energy[i] * ne),
                )
            })
            .collect();
        ensure_finite("onset fusion", &scores)?;
        Ok(scores)
    }
}

/// Sliding median + `k`·MAD threshold, one value per score.
fn adaptive_threshold(scores: &[f32], window: usize, k: f32) -> Vec<f32> {
    let half = window / 2;
    (0..scores.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(scores.len());
            let median = median_of(&scores[start..end]);
            let deviations: Vec<f32> = scores[start..end]
                .iter()
                .map(|s| (s - median).abs())
                .collect();
            let mad = median_of(&deviations);
            k.mul_add(mad, median)
        })
        .collect()
}

fn median_of(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.;
    }
    arr1(values)
        .mapv(n32)
        .quantile_mut(n64(0.5), &Midpoint)
        .map_or(0., noisy_float::types::N32::raw)
}

/// Local maxima above the threshold, spaced at least `min_gap` apart.
///
/// Within a refractory window the stronger peak wins.
fn pick_peaks(
    scores: &[f32],
    threshold: &[f32],
    hop_seconds: f64,
    center_seconds: f64,
    min_gap: f64,
) -> Vec<OnsetPeak> {
    let mut peaks: Vec<OnsetPeak> = Vec::new();
    for t in 1..scores.len().saturating_sub(1) {
        if scores[t] <= scores[t - 1] || scores[t] < scores[t + 1] || scores[t] <= threshold[t] {
            continue;
        }

        #[allow(clippy::cast_precision_loss)]
        let time = (t as f64).mul_add(hop_seconds, center_seconds);
        let peak = OnsetPeak {
            index: t,
            time,
            score: scores[t],
            confidence: 0.,
        };
        match peaks.last_mut() {
            Some(last) if time - last.time < min_gap => {
                if peak.score > last.score {
                    *last = peak;
                }
            }
            _ => peaks.push(peak),
        }
    }

    let max_score = peaks.iter().fold(0.0f32, |acc, p| acc.max(p.score));
    if max_score > 0. {
        for peak in &mut peaks {
            peak.confidence = (peak.score / max_score).clamp(0., 1.);
        }
    }
    peaks
}
