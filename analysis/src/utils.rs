use crate::errors::{AnalysisError, AnalysisResult};

#[allow(clippy::cast_precision_loss)]
#[must_use]
#[inline]
pub fn mean(input: &[f32]) -> f32 {
    if input.is_empty() {
        return 0.;
    }
    input.iter().sum::<f32>() / input.len() as f32
}

/// Root-mean-square of a block of samples.
#[allow(clippy::cast_precision_loss)]
#[must_use]
#[inline]
pub fn rms(input: &[f32]) -> f32 {
    if input.is_empty() {
        return 0.;
    }
    (input.iter().map(|x| x * x).sum::<f32>() / input.len() as f32).sqrt()
}

/// Count sign flips across a block. Zero samples count as non-positive, so
/// silence produces no crossings.
pub(crate) fn zero_crossings(samples: &[f32]) -> u32 {
    samples
        .iter()
        .fold((0u32, None), |(count, previous), sample| {
            let positive = *sample > 0.;
            match previous {
                Some(p) if p != positive => (count + 1, Some(positive)),
                _ => (count, Some(positive)),
            }
        })
        .0
}

/// Biased autocorrelation of `input` for lags `0..=max_lag`.
///
/// `acf[k] = (1 / (N - k)) * sum(x[i] * x[i + k])`, the biased normalization
/// keeps the estimate well behaved at long lags.
///
/// # Errors
///
/// Returns `InvalidParameter` if `input` is empty or `max_lag` is not below
/// the input length.
#[allow(clippy::cast_precision_loss, clippy::missing_inline_in_public_items)]
pub fn acf(input: &[f32], max_lag: usize) -> AnalysisResult<Vec<f32>> {
    if input.is_empty() {
        return Err(AnalysisError::InvalidParameter(
            "autocorrelation input is empty".into(),
        ));
    }
    if max_lag >= input.len() {
        return Err(AnalysisError::InvalidParameter(format!(
            "autocorrelation lag {max_lag} exceeds input length {}",
            input.len()
        )));
    }

    let n = input.len();
    let mut output = Vec::with_capacity(max_lag + 1);
    for lag in 0..=max_lag {
        let sum: f32 = input[..n - lag]
            .iter()
            .zip(&input[lag..])
            .map(|(a, b)| a * b)
            .sum();
        output.push(sum / (n - lag) as f32);
    }
    Ok(output)
}

/// The smallest power of two that is `>= n`.
#[must_use]
#[inline]
pub fn next_power_of_two(n: usize) -> usize {
    n.next_power_of_two()
}

/// Guard against NaN/Inf escaping a DSP stage.
pub(crate) fn ensure_finite(stage: &str, values: &[f32]) -> AnalysisResult<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(AnalysisError::NumericInstability(stage.to_string()))
    }
}
