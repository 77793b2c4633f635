//! Sample-rate conversion by linear interpolation.
//!
//! Downsampling runs the signal through a 4th-order Butterworth low-pass at
//! the target Nyquist first so aliases don't fold into the band of interest.

use crate::errors::{AnalysisError, AnalysisResult};
use crate::filters::antialias_lowpass;
use crate::utils::ensure_finite;

/// Resample `samples` from `from_rate` to `to_rate`.
///
/// Equal rates return a copy. The output holds exactly
/// `⌊len * to_rate / from_rate⌋` samples, each linearly interpolated between
/// the two neighboring source samples.
///
/// # Errors
///
/// `InvalidParameter` if either rate is zero, `NumericInstability` if the
/// interpolation produces a non-finite sample.
#[allow(clippy::missing_inline_in_public_items, clippy::cast_precision_loss)]
pub fn resample(
    samples: &[f32],
    from_rate: u32,
    to_rate: u32,
    anti_alias: bool,
) -> AnalysisResult<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(AnalysisError::InvalidParameter(format!(
            "sample rates must be positive (got {from_rate} -> {to_rate})"
        )));
    }
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let filtered: Vec<f32>;
    let source = if to_rate < from_rate && anti_alias {
        let mut prefilter = antialias_lowpass(to_rate as f32 / 2., from_rate)?;
        filtered = {
            let mut buffer = samples.to_vec();
            prefilter.process_buffer(&mut buffer);
            buffer
        };
        &filtered
    } else {
        samples
    };

    let out_len = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let ratio = f64::from(from_rate) / f64::from(to_rate);

    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let position = i as f64 * ratio;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = (position.floor() as usize).min(source.len() - 1);
        #[allow(clippy::cast_possible_truncation)]
        let fraction = (position - position.floor()) as f32;
        let a = source[index];
        let b = source[(index + 1).min(source.len() - 1)];
        output.push(a + (b - a) * fraction);
    }

    ensure_finite("resample", &output)?;
    Ok(output)
}
