//! Tempo estimation from the fused onset envelope.
//!
//! Autocorrelation of the envelope over the musically plausible lag range,
//! with multi-scale voting, octave resolution against the onset peaks, and a
//! phase estimate for the beat grid.

use log::debug;

use crate::errors::{AnalysisError, AnalysisResult};
use crate::onset::{OnsetEnvelope, OnsetPeak};
use crate::utils::acf;
use crate::{Tempo, TempoAlternative};

/// Tuning for the tempo stage.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TempoOptions {
    /// Lower bound of the search range, BPM.
    pub min_tempo: f32,
    /// Upper bound of the search range, BPM.
    pub max_tempo: f32,
    /// Vote across half- and double-hop decimations of the envelope.
    pub multi_scale: bool,
    /// Widen the search range once when the winner sits near its edges.
    pub genre_adaptive: bool,
}

impl Default for TempoOptions {
    #[inline]
    fn default() -> Self {
        Self {
            min_tempo: 60.,
            max_tempo: 200.,
            multi_scale: true,
            genre_adaptive: false,
        }
    }
}

impl TempoOptions {
    /// # Errors
    ///
    /// `InvalidParameter` unless `0 < min_tempo < max_tempo`.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn validate(&self) -> AnalysisResult<()> {
        if !self.min_tempo.is_finite()
            || !self.max_tempo.is_finite()
            || self.min_tempo <= 0.
            || self.min_tempo >= self.max_tempo
        {
            return Err(AnalysisError::InvalidParameter(format!(
                "tempo range {}..{} BPM must satisfy 0 < min < max",
                self.min_tempo, self.max_tempo
            )));
        }
        Ok(())
    }
}

/// A tempo hypothesis produced by one autocorrelation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Hypothesis {
    bpm: f32,
    salience: f32,
}

/// Maximum relative BPM distance for two hypotheses to merge.
const MERGE_TOLERANCE: f32 = 0.02;
/// Relative distance within which a runner-up counts as an octave of the
/// winner.
const OCTAVE_TOLERANCE: f32 = 0.05;
/// Runner-up hypotheses reported in `Tempo::alternatives`.
const MAX_ALTERNATIVES: usize = 2;

/// Estimate the global tempo.
///
/// Returns `Ok(None)` when the envelope carries no usable periodicity (too
/// short, flat, or without autocorrelation peaks in range).
///
/// # Errors
///
/// `InvalidParameter` on an invalid tempo range, `NumericInstability` if the
/// autocorrelation goes non-finite.
#[allow(clippy::missing_inline_in_public_items)]
pub fn estimate(
    envelope: &OnsetEnvelope,
    peaks: &[OnsetPeak],
    opts: &TempoOptions,
) -> AnalysisResult<Option<Tempo>> {
    opts.validate()?;

    if envelope.len() < 8 || envelope.scores.iter().all(|s| *s <= f32::EPSILON) {
        return Ok(None);
    }

    let mut hypotheses = collect_hypotheses(envelope, opts)?;
    if hypotheses.is_empty() && opts.genre_adaptive {
        // nothing in range: widen once before giving up
        let widened = widened_range(opts);
        hypotheses = collect_hypotheses(envelope, &widened)?;
    }
    let Some(&best) = hypotheses.first() else {
        return Ok(None);
    };

    // widen the prior when the winner hugs the edge of the range
    let best = if opts.genre_adaptive && (best.bpm < 90. || best.bpm > 160.) {
        let widened = widened_range(opts);
        let rerun = collect_hypotheses(envelope, &widened)?;
        rerun.first().copied().map_or(best, |wider| {
            if wider.salience > best.salience {
                wider
            } else {
                best
            }
        })
    } else {
        best
    };

    let chosen = resolve_octave(best, &hypotheses, peaks);
    let (phase, alignment) = best_phase(chosen.bpm, peaks, envelope.hop_seconds);

    let alternatives: Vec<TempoAlternative> = hypotheses
        .iter()
        .filter(|h| relative_distance(h.bpm, chosen.bpm) > MERGE_TOLERANCE)
        .take(MAX_ALTERNATIVES)
        .map(|h| TempoAlternative {
            bpm: h.bpm,
            confidence: h.salience.clamp(0., 1.),
        })
        .collect();

    let confidence = 0.4f32
        .mul_add(alignment, 0.6 * chosen.salience)
        .clamp(0., 1.);
    let bpm = chosen.bpm.clamp(opts.min_tempo, opts.max_tempo);
    debug!("tempo: {bpm:.1} BPM, confidence {confidence:.2}, phase {phase:.3}s");

    Ok(Some(Tempo {
        bpm,
        confidence,
        time_signature: None,
        phase,
        stability: stability(peaks, f64::from(60. / bpm)),
        alternatives,
    }))
}

fn widened_range(opts: &TempoOptions) -> TempoOptions {
    TempoOptions {
        min_tempo: (opts.min_tempo * 0.75).max(20.),
        max_tempo: (opts.max_tempo * 1.25).min(320.),
        genre_adaptive: false,
        ..*opts
    }
}

/// Gather merged hypotheses across the configured scales, strongest first.
fn collect_hypotheses(
    envelope: &OnsetEnvelope,
    opts: &TempoOptions,
) -> AnalysisResult<Vec<Hypothesis>> {
    let mut pool = acf_hypotheses(&envelope.scores, envelope.hop_seconds, opts, 1.0)?;

    if opts.multi_scale {
        let halved: Vec<f32> = envelope
            .scores
            .chunks(2)
            .map(|pair| pair.iter().sum::<f32>() / 2.)
            .collect();
        pool.extend(acf_hypotheses(
            &halved,
            envelope.hop_seconds * 2.,
            opts,
            0.5,
        )?);

        let mut doubled = Vec::with_capacity(envelope.len() * 2);
        for pair in envelope.scores.windows(2) {
            doubled.push(pair[0]);
            doubled.push((pair[0] + pair[1]) / 2.);
        }
        if let Some(&last) = envelope.scores.last() {
            doubled.push(last);
        }
        pool.extend(acf_hypotheses(
            &doubled,
            envelope.hop_seconds / 2.,
            opts,
            0.5,
        )?);
    }

    // merge votes that agree within tolerance, weighted by salience
    let mut merged: Vec<Hypothesis> = Vec::new();
    pool.sort_by(|a, b| b.salience.total_cmp(&a.salience));
    for hypothesis in pool {
        if let Some(existing) = merged
            .iter_mut()
            .find(|m| relative_distance(m.bpm, hypothesis.bpm) <= MERGE_TOLERANCE)
        {
            let total = existing.salience + hypothesis.salience;
            existing.bpm = (existing.bpm * existing.salience + hypothesis.bpm * hypothesis.salience)
                / total;
            // capped so merged votes stay comparable to single-scale ones
            existing.salience = total.min(1.);
        } else {
            merged.push(hypothesis);
        }
    }
    merged.sort_by(|a, b| b.salience.total_cmp(&a.salience).then(a.bpm.total_cmp(&b.bpm)));
    Ok(merged)
}

/// Autocorrelation peaks of one envelope scale, as tempo hypotheses.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn acf_hypotheses(
    scores: &[f32],
    hop_seconds: f64,
    opts: &TempoOptions,
    weight: f32,
) -> AnalysisResult<Vec<Hypothesis>> {
    if scores.len() < 4 {
        return Ok(Vec::new());
    }

    let min_lag = ((60. / f64::from(opts.max_tempo)) / hop_seconds).ceil() as usize;
    let max_lag = (((60. / f64::from(opts.min_tempo)) / hop_seconds).ceil() as usize)
        .min(scores.len() - 1);
    if min_lag < 1 || min_lag >= max_lag {
        return Ok(Vec::new());
    }

    let correlation = acf(scores, max_lag)?;
    crate::utils::ensure_finite("tempo autocorrelation", &correlation)?;
    let energy = correlation[0];
    if energy <= f32::EPSILON {
        return Ok(Vec::new());
    }
    let floor = correlation[min_lag..=max_lag]
        .iter()
        .fold(f32::INFINITY, |acc, v| acc.min(*v));

    let mut hypotheses = Vec::new();
    for lag in min_lag.max(1)..max_lag {
        let here = correlation[lag];
        if here <= correlation[lag - 1] || here < correlation[lag + 1] {
            continue;
        }
        // prominence above the in-range floor, normalized by signal energy
        let salience = ((here - floor) / (energy - floor).max(f32::EPSILON)).clamp(0., 1.);
        if salience <= 0. {
            continue;
        }

        // parabolic interpolation sharpens the lag estimate
        let denominator =
            correlation[lag - 1] - 2. * here + correlation[lag + 1];
        let offset = if denominator.abs() > f32::EPSILON {
            (0.5 * (correlation[lag - 1] - correlation[lag + 1]) / denominator).clamp(-0.5, 0.5)
        } else {
            0.
        };
        let refined_lag = lag as f64 + f64::from(offset);
        let bpm = (60. / (refined_lag * hop_seconds)) as f32;
        if bpm >= opts.min_tempo * 0.99 && bpm <= opts.max_tempo * 1.01 {
            hypotheses.push(Hypothesis {
                bpm,
                salience: salience * weight,
            });
        }
    }
    hypotheses.sort_by(|a, b| b.salience.total_cmp(&a.salience));
    hypotheses.truncate(5);
    Ok(hypotheses)
}

/// Pick between the winner and an octave-related runner-up by how well each
/// one's grid lines up with the onset peaks.
fn resolve_octave(best: Hypothesis, hypotheses: &[Hypothesis], peaks: &[OnsetPeak]) -> Hypothesis {
    let octave_rival = hypotheses.iter().skip(1).find(|h| {
        relative_distance(h.bpm, best.bpm * 2.) <= OCTAVE_TOLERANCE
            || relative_distance(h.bpm, best.bpm / 2.) <= OCTAVE_TOLERANCE
    });
    let Some(&rival) = octave_rival else {
        return best;
    };

    let (_, best_alignment) = best_phase(best.bpm, peaks, 0.005);
    let (_, rival_alignment) = best_phase(rival.bpm, peaks, 0.005);
    if rival_alignment > best_alignment {
        debug!(
            "octave resolution: {} BPM grid fits onsets better than {} BPM",
            rival.bpm, best.bpm
        );
        rival
    } else {
        best
    }
}

/// Search the grid offset in `[0, period)` that best explains the peaks.
///
/// Returns `(phase seconds, alignment in [0, 1])`. With no peaks both are 0.
fn best_phase(bpm: f32, peaks: &[OnsetPeak], step_seconds: f64) -> (f64, f32) {
    if peaks.is_empty() || bpm <= 0. {
        return (0., 0.);
    }
    let period = f64::from(60. / bpm);
    let tolerance = period * 0.15;
    let total_score: f32 = peaks.iter().map(|p| p.score).sum();
    if total_score <= 0. {
        return (0., 0.);
    }

    let step = step_seconds.clamp(period / 128., period / 4.);
    let mut best = (0., 0.0f32);
    let mut phase = 0.;
    while phase < period {
        let mut aligned = 0.0f32;
        for peak in peaks {
            let position = (peak.time - phase).rem_euclid(period);
            let distance = position.min(period - position);
            if distance < tolerance {
                #[allow(clippy::cast_possible_truncation)]
                let closeness = (1. - distance / tolerance) as f32;
                aligned += peak.score * closeness;
            }
        }
        if aligned > best.1 {
            best = (phase, aligned);
        }
        phase += step;
    }
    (best.0, (best.1 / total_score).clamp(0., 1.))
}

/// Fraction of inter-peak intervals that sit within 10% of the beat period
/// or its double.
fn stability(peaks: &[OnsetPeak], period: f64) -> f32 {
    if peaks.len() < 2 || period <= 0. {
        return 0.;
    }
    let intervals: Vec<f64> = peaks.windows(2).map(|p| p[1].time - p[0].time).collect();
    let steady = intervals
        .iter()
        .filter(|delta| {
            let beats = (**delta / period).round().max(1.);
            (**delta - beats * period).abs() < period * 0.1
        })
        .count();
    #[allow(clippy::cast_precision_loss)]
    let fraction = steady as f32 / intervals.len() as f32;
    fraction
}

fn relative_distance(a: f32, b: f32) -> f32 {
    if b.abs() <= f32::EPSILON {
        return f32::INFINITY;
    }
    (a - b).abs() / b.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onset::OnsetEnvelope;

    const HOP_SECONDS: f64 = 512. / 44100.;

    /// An envelope with unit spikes every `period_seconds`.
    fn spiky_envelope(period_seconds: f64, total_seconds: f64) -> OnsetEnvelope {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let len = (total_seconds / HOP_SECONDS) as usize;
        let mut scores = vec![0.0f32; len];
        let mut t = 0.;
        while t < total_seconds {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let index = (t / HOP_SECONDS).round() as usize;
            if index < len {
                scores[index] = 1.;
            }
            t += period_seconds;
        }
        OnsetEnvelope {
            scores,
            hop_seconds: HOP_SECONDS,
        }
    }

    fn peaks_of(envelope: &OnsetEnvelope) -> Vec<OnsetPeak> {
        envelope
            .scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > 0.)
            .map(|(i, s)| OnsetPeak {
                index: i,
                time: envelope.time(i),
                score: *s,
                confidence: 1.,
            })
            .collect()
    }

    #[test]
    fn test_click_grid_at_120_bpm() {
        let envelope = spiky_envelope(0.5, 10.);
        let peaks = peaks_of(&envelope);
        let tempo = estimate(&envelope, &peaks, &TempoOptions::default())
            .unwrap()
            .unwrap();
        assert!(
            (118. ..=122.).contains(&tempo.bpm),
            "{} not in 118..=122",
            tempo.bpm
        );
        assert!(tempo.confidence > 0.8, "confidence {}", tempo.confidence);
        assert!(tempo.stability > 0.9, "stability {}", tempo.stability);
    }

    #[test]
    fn test_slow_grid_at_60_bpm() {
        let envelope = spiky_envelope(1.0, 20.);
        let peaks = peaks_of(&envelope);
        let tempo = estimate(&envelope, &peaks, &TempoOptions::default())
            .unwrap()
            .unwrap();
        // 60 and its octave 120 both explain a 1 s grid; either answer must
        // be one of the two
        assert!(
            (58. ..=62.).contains(&tempo.bpm) || (118. ..=122.).contains(&tempo.bpm),
            "{} not near 60 or 120",
            tempo.bpm
        );
    }

    #[test]
    fn test_flat_envelope_has_no_tempo() {
        let envelope = OnsetEnvelope {
            scores: vec![0.0f32; 1000],
            hop_seconds: HOP_SECONDS,
        };
        assert!(
            estimate(&envelope, &[], &TempoOptions::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_short_envelope_has_no_tempo() {
        let envelope = OnsetEnvelope {
            scores: vec![1.0f32; 4],
            hop_seconds: HOP_SECONDS,
        };
        assert!(
            estimate(&envelope, &[], &TempoOptions::default())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_alternatives_cover_competing_tempo() {
        // spikes every 0.5 s, every second one stronger: 60 and 120 BPM both
        // present
        let mut envelope = spiky_envelope(0.5, 30.);
        let mut strong = true;
        for score in &mut envelope.scores {
            if *score > 0. {
                *score = if strong { 1. } else { 0.6 };
                strong = !strong;
            }
        }
        let peaks = peaks_of(&envelope);
        let tempo = estimate(&envelope, &peaks, &TempoOptions::default())
            .unwrap()
            .unwrap();

        let near = |bpm: f32, target: f32| relative_distance(bpm, target) < 0.05;
        assert!(
            near(tempo.bpm, 60.) || near(tempo.bpm, 120.),
            "{} not near 60 or 120",
            tempo.bpm
        );
        let other = if near(tempo.bpm, 120.) { 60. } else { 120. };
        assert!(
            tempo
                .alternatives
                .iter()
                .any(|alt| near(alt.bpm, other) && alt.confidence >= 0.4),
            "no alternative near {other} with confidence >= 0.4: {:?}",
            tempo.alternatives
        );
    }

    #[test]
    fn test_bpm_stays_in_configured_range() {
        let envelope = spiky_envelope(0.5, 10.);
        let peaks = peaks_of(&envelope);
        let opts = TempoOptions {
            min_tempo: 100.,
            max_tempo: 140.,
            ..TempoOptions::default()
        };
        let tempo = estimate(&envelope, &peaks, &opts).unwrap().unwrap();
        assert!(tempo.bpm >= 100. && tempo.bpm <= 140.);
    }

    #[test]
    fn test_phase_tracks_shifted_grid() {
        // spikes at 0.25, 0.75, 1.25, ...: a 120 BPM grid offset by 0.25 s
        let mut envelope = spiky_envelope(0.5, 10.);
        let shift = (0.25 / HOP_SECONDS).round() as usize;
        envelope.scores.rotate_right(shift);
        let peaks = peaks_of(&envelope);
        let tempo = estimate(&envelope, &peaks, &TempoOptions::default())
            .unwrap()
            .unwrap();
        let period = tempo.period();
        let offset = (tempo.phase - 0.25).rem_euclid(period);
        let distance = offset.min(period - offset);
        assert!(
            distance < 0.05,
            "phase {} not aligned with 0.25 s grid",
            tempo.phase
        );
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let envelope = spiky_envelope(0.5, 5.);
        let bad = TempoOptions {
            min_tempo: 200.,
            max_tempo: 60.,
            ..TempoOptions::default()
        };
        assert!(estimate(&envelope, &[], &bad).is_err());

        let zero = TempoOptions {
            min_tempo: 0.,
            ..TempoOptions::default()
        };
        assert!(estimate(&envelope, &[], &zero).is_err());
    }

    #[test]
    fn test_estimation_is_deterministic() {
        let envelope = spiky_envelope(0.5, 10.);
        let peaks = peaks_of(&envelope);
        let a = estimate(&envelope, &peaks, &TempoOptions::default()).unwrap();
        let b = estimate(&envelope, &peaks, &TempoOptions::default()).unwrap();
        assert_eq!(a, b);
    }
}
