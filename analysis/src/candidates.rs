//! Fusing onset peaks with the tempo grid into beat candidates.

use crate::onset::OnsetPeak;
use crate::{BeatCandidate, CandidateSource, Tempo};

/// Tuning for candidate building.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CandidateOptions {
    /// Half-width of the grid/onset matching window, seconds.
    pub match_window: f64,
    /// Candidates closer than this collapse into the stronger one, seconds.
    pub dedup_window: f64,
    /// Unmatched onsets below this confidence are dropped.
    pub onset_keep_threshold: f32,
    /// Weight of the onset evidence in a fused candidate's confidence.
    pub onset_weight: f32,
    /// Weight of the grid evidence in a fused candidate's confidence.
    pub tempo_weight: f32,
}

impl Default for CandidateOptions {
    #[inline]
    fn default() -> Self {
        Self {
            match_window: 0.06,
            dedup_window: 0.03,
            onset_keep_threshold: 0.3,
            onset_weight: 0.5,
            tempo_weight: 0.5,
        }
    }
}

/// Grid candidates inherit the tempo confidence scaled by this.
const GRID_CONFIDENCE_SCALE: f32 = 0.5;

/// Build deduplicated beat candidates from onset peaks and the tempo grid.
///
/// Without a tempo, every peak above the keep threshold becomes an `onset`
/// candidate. With one, grid points matched to a peak within the window fuse
/// into a `fused` candidate at the peak's time; lone grid points become
/// reduced-confidence `grid` candidates; strong unmatched peaks survive as
/// `onset` candidates.
#[allow(clippy::missing_inline_in_public_items)]
#[must_use]
pub fn build(
    peaks: &[OnsetPeak],
    tempo: Option<&Tempo>,
    duration: f64,
    opts: &CandidateOptions,
) -> Vec<BeatCandidate> {
    let mut candidates: Vec<BeatCandidate> = Vec::new();
    let weight_sum = (opts.onset_weight + opts.tempo_weight).max(f32::EPSILON);
    let (onset_weight, tempo_weight) = (
        opts.onset_weight / weight_sum,
        opts.tempo_weight / weight_sum,
    );

    let mut matched = vec![false; peaks.len()];
    if let Some(tempo) = tempo {
        let period = tempo.period();
        if period > 0. {
            let mut grid_point = tempo.phase;
            while grid_point <= duration {
                let nearest = peaks
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| (p.time - grid_point).abs() <= opts.match_window)
                    .min_by(|(_, a), (_, b)| {
                        (a.time - grid_point)
                            .abs()
                            .total_cmp(&(b.time - grid_point).abs())
                    });

                if let Some((index, peak)) = nearest {
                    matched[index] = true;
                    candidates.push(BeatCandidate {
                        timestamp: peak.time,
                        confidence: onset_weight
                            .mul_add(peak.confidence, tempo_weight * tempo.confidence)
                            .clamp(0., 1.),
                        strength: peak.score,
                        source: CandidateSource::Fused,
                    });
                } else {
                    candidates.push(BeatCandidate {
                        timestamp: grid_point,
                        confidence: (tempo.confidence * GRID_CONFIDENCE_SCALE).clamp(0., 1.),
                        strength: 0.,
                        source: CandidateSource::Grid,
                    });
                }
                grid_point += period;
            }
        }
    }

    for (peak, matched) in peaks.iter().zip(&matched) {
        if *matched || peak.confidence < opts.onset_keep_threshold {
            continue;
        }
        if peak.time < 0. || peak.time > duration {
            continue;
        }
        candidates.push(BeatCandidate {
            timestamp: peak.time,
            confidence: peak.confidence.clamp(0., 1.),
            strength: peak.score,
            source: CandidateSource::Onset,
        });
    }

    candidates.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    dedup(candidates, opts.dedup_window)
}

/// Collapse candidates closer than `window`, keeping the higher confidence.
fn dedup(sorted: Vec<BeatCandidate>, window: f64) -> Vec<BeatCandidate> {
    let mut output: Vec<BeatCandidate> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        match output.last_mut() {
            Some(last) if candidate.timestamp - last.timestamp < window => {
                if candidate.confidence > last.confidence {
                    *last = candidate;
                }
            }
            _ => output.push(candidate),
        }
    }
    output
}
