//! Reducing beat candidates to the requested count.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{Beat, BeatCandidate};

/// How the final beat set is chosen from the candidates.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SelectionMethod {
    /// Candidates nearest the centers of `N` equal time slots.
    Uniform,
    /// Greedy score balancing confidence, strength, and spacing.
    #[default]
    Adaptive,
    /// The `N` strongest candidates.
    Energy,
    /// Every `⌈|C|/N⌉`-th candidate of the time-ordered list.
    Regular,
}

/// Adaptive scoring weights.
const ADAPTIVE_CONFIDENCE_WEIGHT: f32 = 0.5;
const ADAPTIVE_STRENGTH_WEIGHT: f32 = 0.3;
const ADAPTIVE_PROXIMITY_WEIGHT: f32 = 0.2;

/// The selected beats plus bookkeeping for the parse metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionOutcome {
    /// Final beats, ordered by ascending timestamp.
    pub beats: Vec<Beat>,
    /// Set when the request was silently capped at `duration · max_tempo / 60`.
    pub capped_count: Option<usize>,
}

/// Select up to `requested` beats from time-ordered candidates.
///
/// `requested = None` means "no explicit limit"; the physical cap of one
/// beat per `60 / max_tempo` seconds still applies.
#[allow(
    clippy::missing_inline_in_public_items,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn select(
    candidates: &[BeatCandidate],
    requested: Option<usize>,
    method: SelectionMethod,
    duration: f64,
    max_tempo: f32,
) -> SelectionOutcome {
    let physical_cap = (duration * f64::from(max_tempo) / 60.).floor().max(0.) as usize;
    let requested_count = requested.unwrap_or(usize::MAX);
    let capped_count = (requested_count > physical_cap).then_some(physical_cap);
    let target = requested_count.min(physical_cap);

    if target == 0 || candidates.is_empty() {
        return SelectionOutcome {
            beats: Vec::new(),
            capped_count,
        };
    }

    let mut sorted: Vec<BeatCandidate> = candidates.to_vec();
    sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    if sorted.len() <= target {
        return SelectionOutcome {
            beats: sorted.into_iter().map(BeatCandidate::into_beat).collect(),
            capped_count,
        };
    }

    let chosen = match method {
        SelectionMethod::Uniform => select_uniform(&sorted, target, duration),
        SelectionMethod::Regular => select_regular(&sorted, target),
        SelectionMethod::Energy => select_energy(&sorted, target),
        SelectionMethod::Adaptive => select_adaptive(&sorted, target, duration),
    };

    let mut beats: Vec<Beat> = chosen.into_iter().map(BeatCandidate::into_beat).collect();
    beats.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    SelectionOutcome {
        beats,
        capped_count,
    }
}

/// Nearest candidate to each slot center `duration · (i + 0.5) / n`.
#[allow(clippy::cast_precision_loss)]
fn select_uniform(sorted: &[BeatCandidate], target: usize, duration: f64) -> Vec<BeatCandidate> {
    let mut used = vec![false; sorted.len()];
    let mut chosen = Vec::with_capacity(target);
    for slot in 0..target {
        let center = duration * (slot as f64 + 0.5) / target as f64;
        let nearest = sorted
            .iter()
            .enumerate()
            .filter(|(i, _)| !used[*i])
            .min_by(|(_, a), (_, b)| {
                (a.timestamp - center)
                    .abs()
                    .total_cmp(&(b.timestamp - center).abs())
                    .then(a.timestamp.total_cmp(&b.timestamp))
            });
        if let Some((index, candidate)) = nearest {
            used[index] = true;
            chosen.push(*candidate);
        }
    }
    chosen
}

/// Every `⌈|C| / n⌉`-th candidate of the time-ordered list.
fn select_regular(sorted: &[BeatCandidate], target: usize) -> Vec<BeatCandidate> {
    let stride = sorted.len().div_ceil(target).max(1);
    sorted.iter().step_by(stride).take(target).copied().collect()
}

/// Top `n` by strength, ties to the earlier candidate.
fn select_energy(sorted: &[BeatCandidate], target: usize) -> Vec<BeatCandidate> {
    let mut by_strength: Vec<BeatCandidate> = sorted.to_vec();
    by_strength.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then(a.timestamp.total_cmp(&b.timestamp))
    });
    by_strength.truncate(target);
    by_strength
}

/// Greedy pick maximizing `0.5·confidence + 0.3·strength − 0.2·proximity`.
#[allow(clippy::cast_precision_loss)]
fn select_adaptive(sorted: &[BeatCandidate], target: usize, duration: f64) -> Vec<BeatCandidate> {
    let max_strength = sorted.iter().fold(0.0f32, |acc, c| acc.max(c.strength));
    let strength_norm = if max_strength > 0. {
        1. / max_strength
    } else {
        0.
    };
    let slot = if duration > 0. {
        duration / target as f64
    } else {
        1.
    };

    let mut used = vec![false; sorted.len()];
    let mut chosen_times: Vec<f64> = Vec::with_capacity(target);
    let mut chosen = Vec::with_capacity(target);

    for _ in 0..target {
        let mut best: Option<(usize, f32)> = None;
        for (index, candidate) in sorted.iter().enumerate() {
            if used[index] {
                continue;
            }
            let proximity = chosen_times
                .iter()
                .map(|t| (candidate.timestamp - t).abs())
                .fold(f64::INFINITY, f64::min);
            #[allow(clippy::cast_possible_truncation)]
            let penalty = if proximity.is_finite() {
                (1. - proximity / slot).max(0.) as f32
            } else {
                0.
            };
            let score = ADAPTIVE_STRENGTH_WEIGHT.mul_add(
                candidate.strength * strength_norm,
                ADAPTIVE_CONFIDENCE_WEIGHT * candidate.confidence,
            ) - ADAPTIVE_PROXIMITY_WEIGHT * penalty;

            // strict comparison keeps the earliest candidate on ties
            let improves = best.is_none_or(|(_, best_score)| score > best_score);
            if improves {
                best = Some((index, score));
            }
        }
        let Some((index, _)) = best else { break };
        used[index] = true;
        chosen_times.push(sorted[index].timestamp);
        chosen.push(sorted[index]);
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CandidateSource;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    fn candidate(timestamp: f64, confidence: f32, strength: f32) -> BeatCandidate {
        BeatCandidate {
            timestamp,
            confidence,
            strength,
            source: CandidateSource::Fused,
        }
    }

    /// Ten evenly spaced candidates over ten seconds.
    fn grid_candidates() -> Vec<BeatCandidate> {
        (0..10)
            .map(|i| candidate(f64::from(i) + 0.5, 0.8, 1.))
            .collect()
    }

    #[test]
    fn test_zero_request_returns_empty() {
        let outcome = select(
            &grid_candidates(),
            Some(0),
            SelectionMethod::Adaptive,
            10.,
            200.,
        );
        assert!(outcome.beats.is_empty());
    }

    #[test]
    fn test_fewer_candidates_than_requested_returns_all() {
        let outcome = select(
            &grid_candidates(),
            Some(50),
            SelectionMethod::Adaptive,
            10.,
            200.,
        );
        assert_eq!(outcome.beats.len(), 10);
        assert!(outcome.capped_count.is_some());
    }

    #[test]
    fn test_request_capped_by_physical_limit() {
        // 1 second at max 120 BPM caps at 2 beats
        let candidates = vec![
            candidate(0.2, 0.9, 1.),
            candidate(0.5, 0.9, 1.),
            candidate(0.8, 0.9, 1.),
        ];
        let outcome = select(&candidates, Some(10), SelectionMethod::Energy, 1., 120.);
        assert_eq!(outcome.beats.len(), 2);
        assert_eq!(outcome.capped_count, Some(2));
    }

    #[test]
    fn test_no_request_means_physical_cap_only() {
        let outcome = select(&grid_candidates(), None, SelectionMethod::Adaptive, 10., 200.);
        assert_eq!(outcome.beats.len(), 10);
        assert!(outcome.capped_count.is_some());
    }

    #[rstest]
    #[case::uniform(SelectionMethod::Uniform)]
    #[case::adaptive(SelectionMethod::Adaptive)]
    #[case::energy(SelectionMethod::Energy)]
    #[case::regular(SelectionMethod::Regular)]
    fn test_output_is_time_ordered_and_sized(#[case] method: SelectionMethod) {
        let outcome = select(&grid_candidates(), Some(5), method, 10., 200.);
        assert_eq!(outcome.beats.len(), 5);
        for pair in outcome.beats.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_uniform_tracks_slot_centers() {
        let outcome = select(
            &grid_candidates(),
            Some(5),
            SelectionMethod::Uniform,
            10.,
            200.,
        );
        // slot centers at 1, 3, 5, 7, 9; nearest candidates at .5 offsets
        let times: Vec<f64> = outcome.beats.iter().map(|b| b.timestamp).collect();
        for (time, center) in times.iter().zip([1., 3., 5., 7., 9.]) {
            assert!(
                (time - center).abs() <= 0.5 + 1e-9,
                "{time} too far from slot center {center}"
            );
        }
    }

    #[test]
    fn test_regular_takes_strided_candidates() {
        let outcome = select(
            &grid_candidates(),
            Some(5),
            SelectionMethod::Regular,
            10.,
            200.,
        );
        let times: Vec<f64> = outcome.beats.iter().map(|b| b.timestamp).collect();
        assert_eq!(times, vec![0.5, 2.5, 4.5, 6.5, 8.5]);
    }

    #[test]
    fn test_energy_keeps_strongest() {
        let mut candidates = grid_candidates();
        candidates[3].strength = 10.;
        candidates[7].strength = 8.;
        let outcome = select(&candidates, Some(2), SelectionMethod::Energy, 10., 200.);
        let times: Vec<f64> = outcome.beats.iter().map(|b| b.timestamp).collect();
        assert_eq!(times, vec![3.5, 7.5]);
    }

    #[test]
    fn test_energy_ties_break_earlier() {
        let candidates = vec![
            candidate(1., 0.5, 1.),
            candidate(2., 0.5, 1.),
            candidate(3., 0.5, 1.),
        ];
        let outcome = select(&candidates, Some(1), SelectionMethod::Energy, 10., 200.);
        assert_eq!(outcome.beats.len(), 1);
        assert!((outcome.beats[0].timestamp - 1.).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_prefers_confident_spread_out_beats() {
        let mut candidates = grid_candidates();
        // a weak cluster around 5 s should not crowd out the rest
        candidates.push(candidate(5.02, 0.3, 0.1));
        candidates.push(candidate(5.04, 0.3, 0.1));
        let outcome = select(&candidates, Some(5), SelectionMethod::Adaptive, 10., 200.);
        assert_eq!(outcome.beats.len(), 5);
        for pair in outcome.beats.windows(2) {
            assert!(
                pair[1].timestamp - pair[0].timestamp > 0.5,
                "adaptive selection clustered at {} and {}",
                pair[0].timestamp,
                pair[1].timestamp
            );
        }
    }

    #[test]
    fn test_empty_candidates_yield_empty_outcome() {
        for method in SelectionMethod::iter() {
            let outcome = select(&[], Some(5), method, 10., 200.);
            assert!(outcome.beats.is_empty());
        }
    }

    #[test]
    fn test_method_round_trips_through_strings() {
        for method in SelectionMethod::iter() {
            let parsed: SelectionMethod = method.to_string().parse().unwrap();
            assert_eq!(parsed, method);
        }
        assert_eq!(SelectionMethod::default(), SelectionMethod::Adaptive);
    }
}
