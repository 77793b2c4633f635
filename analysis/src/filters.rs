//! IIR biquad filters.
//!
//! Butterworth designs at orders 1 and 2 via the bilinear transform, plus an
//! RBJ-style notch. Sections run in Direct-Form II with a single delay line.

use crate::errors::{AnalysisError, AnalysisResult};

/// Minimum spacing (Hz) kept between a band edge and DC / Nyquist.
const BAND_EDGE_MARGIN: f32 = 10.;

/// Default quality factor for the notch filter.
pub const NOTCH_Q: f32 = 10.;

/// A single second-order section, Direct-Form II.
///
/// Coefficients are normalized so `a0 == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    w1: f32,
    w2: f32,
}

impl Biquad {
    #[must_use]
    #[inline]
    pub const fn new(b0: f32, b1: f32, b2: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            w1: 0.,
            w2: 0.,
        }
    }

    /// Process one sample through the section.
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let w0 = x - self.a1 * self.w1 - self.a2 * self.w2;
        let y = self.b0 * w0 + self.b1 * self.w1 + self.b2 * self.w2;
        self.w2 = self.w1;
        self.w1 = w0;
        y
    }

    /// Filter a buffer in place.
    #[inline]
    pub fn process_buffer(&mut self, samples: &mut [f32]) {
        for sample in samples {
            *sample = self.process(*sample);
        }
    }

    /// Clear the delay line.
    #[inline]
    pub fn reset(&mut self) {
        self.w1 = 0.;
        self.w2 = 0.;
    }
}

/// A cascade of biquad sections applied in order.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    sections: Vec<Biquad>,
}

impl FilterChain {
    #[must_use]
    #[inline]
    pub const fn new(sections: Vec<Biquad>) -> Self {
        Self { sections }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.sections.iter_mut().fold(x, |acc, s| s.process(acc))
    }

    #[inline]
    pub fn process_buffer(&mut self, samples: &mut [f32]) {
        for section in &mut self.sections {
            section.process_buffer(samples);
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }
}

fn validate_cutoff(cutoff: f32, sample_rate: u32) -> AnalysisResult<()> {
    if sample_rate == 0 {
        return Err(AnalysisError::InvalidParameter(
            "sample rate must be positive".into(),
        ));
    }
    #[allow(clippy::cast_precision_loss)]
    let nyquist = sample_rate as f32 / 2.;
    if !cutoff.is_finite() || cutoff <= 0. || cutoff >= nyquist {
        return Err(AnalysisError::InvalidParameter(format!(
            "cutoff {cutoff} Hz must lie strictly between 0 and {nyquist} Hz"
        )));
    }
    Ok(())
}

fn validate_order(order: u8) -> AnalysisResult<()> {
    match order {
        1 | 2 => Ok(()),
        _ => Err(AnalysisError::Unsupported(format!(
            "Butterworth order {order} (orders 1 and 2 are implemented)"
        ))),
    }
}

/// Pre-warped angular frequency for the bilinear transform.
#[allow(clippy::cast_precision_loss)]
fn warp(cutoff: f32, sample_rate: u32) -> f32 {
    (std::f32::consts::PI * cutoff / sample_rate as f32).tan()
}

fn lowpass_section(cutoff: f32, sample_rate: u32, q: f32) -> Biquad {
    let w = warp(cutoff, sample_rate);
    let norm = 1. / (1. + w / q + w * w);
    let b0 = w * w * norm;
    Biquad::new(
        b0,
        2. * b0,
        b0,
        2. * (w * w - 1.) * norm,
        (1. - w / q + w * w) * norm,
    )
}

fn highpass_section(cutoff: f32, sample_rate: u32, q: f32) -> Biquad {
    let w = warp(cutoff, sample_rate);
    let norm = 1. / (1. + w / q + w * w);
    Biquad::new(
        norm,
        -2. * norm,
        norm,
        2. * (w * w - 1.) * norm,
        (1. - w / q + w * w) * norm,
    )
}

fn first_order_lowpass(cutoff: f32, sample_rate: u32) -> Biquad {
    let w = warp(cutoff, sample_rate);
    let norm = 1. / (1. + w);
    Biquad::new(w * norm, w * norm, 0., (w - 1.) * norm, 0.)
}

fn first_order_highpass(cutoff: f32, sample_rate: u32) -> Biquad {
    let w = warp(cutoff, sample_rate);
    let norm = 1. / (1. + w);
    Biquad::new(norm, -norm, 0., (w - 1.) * norm, 0.)
}

/// Butterworth low-pass of the given order.
///
/// # Errors
///
/// `Unsupported` for orders other than 1 and 2; `InvalidParameter` when the
/// cutoff does not satisfy `0 < cutoff < sample_rate / 2`.
#[allow(clippy::missing_inline_in_public_items)]
pub fn butterworth_lowpass(order: u8, cutoff: f32, sample_rate: u32) -> AnalysisResult<FilterChain> {
    validate_order(order)?;
    validate_cutoff(cutoff, sample_rate)?;
    let section = match order {
        1 => first_order_lowpass(cutoff, sample_rate),
        _ => lowpass_section(cutoff, sample_rate, std::f32::consts::FRAC_1_SQRT_2),
    };
    Ok(FilterChain::new(vec![section]))
}

/// Butterworth high-pass of the given order.
///
/// # Errors
///
/// `Unsupported` for orders other than 1 and 2; `InvalidParameter` when the
/// cutoff does not satisfy `0 < cutoff < sample_rate / 2`.
#[allow(clippy::missing_inline_in_public_items)]
pub fn butterworth_highpass(
    order: u8,
    cutoff: f32,
    sample_rate: u32,
) -> AnalysisResult<FilterChain> {
    validate_order(order)?;
    validate_cutoff(cutoff, sample_rate)?;
    let section = match order {
        1 => first_order_highpass(cutoff, sample_rate),
        _ => highpass_section(cutoff, sample_rate, std::f32::consts::FRAC_1_SQRT_2),
    };
    Ok(FilterChain::new(vec![section]))
}

/// 4th-order Butterworth low-pass: two cascaded sections with the exact
/// Butterworth pole Q pairs.
///
/// # Errors
///
/// `InvalidParameter` when the cutoff does not satisfy
/// `0 < cutoff < sample_rate / 2`.
#[allow(clippy::missing_inline_in_public_items)]
pub fn antialias_lowpass(cutoff: f32, sample_rate: u32) -> AnalysisResult<FilterChain> {
    validate_cutoff(cutoff, sample_rate)?;
    Ok(FilterChain::new(vec![
        lowpass_section(cutoff, sample_rate, 0.541_196_1),
        lowpass_section(cutoff, sample_rate, 1.306_563),
    ]))
}

/// Band-pass as a high-pass/low-pass cascade around `center`.
///
/// Edges are pulled in by [`BAND_EDGE_MARGIN`] from DC and Nyquist.
///
/// # Errors
///
/// `InvalidParameter` if the clamped band collapses (`low >= high`) or the
/// center/bandwidth are not positive finite values.
#[allow(
    clippy::missing_inline_in_public_items,
    clippy::cast_precision_loss,
    clippy::similar_names
)]
pub fn bandpass(center: f32, bandwidth: f32, sample_rate: u32) -> AnalysisResult<FilterChain> {
    if sample_rate == 0 {
        return Err(AnalysisError::InvalidParameter(
            "sample rate must be positive".into(),
        ));
    }
    if !center.is_finite() || !bandwidth.is_finite() || center <= 0. || bandwidth <= 0. {
        return Err(AnalysisError::InvalidParameter(format!(
            "band-pass center {center} Hz / bandwidth {bandwidth} Hz must be positive"
        )));
    }

    let nyquist = sample_rate as f32 / 2.;
    let low = (center - bandwidth / 2.).max(BAND_EDGE_MARGIN);
    let high = (center + bandwidth / 2.).min(nyquist - BAND_EDGE_MARGIN);
    if low >= high {
        return Err(AnalysisError::InvalidParameter(format!(
            "band-pass band collapsed: low edge {low} Hz >= high edge {high} Hz"
        )));
    }

    let highpass = butterworth_highpass(2, low, sample_rate)?;
    let lowpass = butterworth_lowpass(2, high, sample_rate)?;
    let mut sections = highpass.sections;
    sections.extend(lowpass.sections);
    Ok(FilterChain::new(sections))
}

/// RBJ notch at `center` with the given quality factor.
///
/// # Errors
///
/// `InvalidParameter` when the center does not satisfy
/// `0 < center < sample_rate / 2` or `q` is not positive.
#[allow(clippy::missing_inline_in_public_items, clippy::cast_precision_loss)]
pub fn notch(center: f32, q: f32, sample_rate: u32) -> AnalysisResult<Biquad> {
    validate_cutoff(center, sample_rate)?;
    if !q.is_finite() || q <= 0. {
        return Err(AnalysisError::InvalidParameter(format!(
            "notch Q {q} must be positive"
        )));
    }

    let w0 = 2. * std::f32::consts::PI * center / sample_rate as f32;
    let alpha = w0.sin() / (2. * q);
    let cos_w0 = w0.cos();
    let a0 = 1. + alpha;
    Ok(Biquad::new(
        1. / a0,
        -2. * cos_w0 / a0,
        1. / a0,
        -2. * cos_w0 / a0,
        (1. - alpha) / a0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AnalysisError;
    use rstest::rstest;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        #[allow(clippy::cast_precision_loss)]
        (0..len)
            .map(|i| (2. * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    /// Steady-state RMS after letting the transient settle.
    fn settled_rms(filter: &mut FilterChain, signal: &[f32]) -> f32 {
        let mut out = signal.to_vec();
        filter.process_buffer(&mut out);
        crate::utils::rms(&out[out.len() / 2..])
    }

    #[rstest]
    #[case::order_zero(0)]
    #[case::order_three(3)]
    #[case::order_eight(8)]
    fn test_unsupported_orders(#[case] order: u8) {
        assert!(matches!(
            butterworth_lowpass(order, 1000., 44100),
            Err(AnalysisError::Unsupported(_))
        ));
        assert!(matches!(
            butterworth_highpass(order, 1000., 44100),
            Err(AnalysisError::Unsupported(_))
        ));
    }

    #[rstest]
    #[case::zero(0.)]
    #[case::negative(-100.)]
    #[case::nyquist(22050.)]
    #[case::above_nyquist(30000.)]
    fn test_invalid_cutoffs(#[case] cutoff: f32) {
        assert!(matches!(
            butterworth_lowpass(2, cutoff, 44100),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }

    #[rstest]
    #[case::order_one(1)]
    #[case::order_two(2)]
    fn test_lowpass_attenuates_high_frequencies(#[case] order: u8) {
        let mut filter = butterworth_lowpass(order, 1000., 44100).unwrap();
        let pass = settled_rms(&mut filter, &sine(100., 44100, 8192));
        filter.reset();
        let stop = settled_rms(&mut filter, &sine(10000., 44100, 8192));
        assert!(
            pass > 4. * stop,
            "passband rms {pass} should dwarf stopband rms {stop}"
        );
    }

    #[rstest]
    #[case::order_one(1)]
    #[case::order_two(2)]
    fn test_highpass_attenuates_low_frequencies(#[case] order: u8) {
        let mut filter = butterworth_highpass(order, 1000., 44100).unwrap();
        let stop = settled_rms(&mut filter, &sine(100., 44100, 8192));
        filter.reset();
        let pass = settled_rms(&mut filter, &sine(10000., 44100, 8192));
        assert!(
            pass > 4. * stop,
            "passband rms {pass} should dwarf stopband rms {stop}"
        );
    }

    #[test]
    fn test_antialias_is_steeper_than_second_order() {
        let mut second = butterworth_lowpass(2, 1000., 44100).unwrap();
        let mut fourth = antialias_lowpass(1000., 44100).unwrap();
        let stop2 = settled_rms(&mut second, &sine(8000., 44100, 8192));
        let stop4 = settled_rms(&mut fourth, &sine(8000., 44100, 8192));
        assert!(
            stop4 < stop2,
            "4th-order stopband {stop4} should undercut 2nd-order {stop2}"
        );
    }

    #[test]
    fn test_bandpass_passes_center_and_rejects_edges() {
        let mut filter = bandpass(2000., 1000., 44100).unwrap();
        let center = settled_rms(&mut filter, &sine(2000., 44100, 8192));
        filter.reset();
        let below = settled_rms(&mut filter, &sine(100., 44100, 8192));
        filter.reset();
        let above = settled_rms(&mut filter, &sine(15000., 44100, 8192));
        assert!(center > 3. * below, "{center} vs below-band {below}");
        assert!(center > 3. * above, "{center} vs above-band {above}");
    }

    #[test]
    fn test_bandpass_collapsed_band_fails() {
        // band falls entirely below the low edge margin
        assert!(bandpass(5., 2., 44100).is_err());
        // band pushed past nyquist
        assert!(bandpass(22040., 100., 44100).is_err());
    }

    #[test]
    fn test_notch_cuts_center_only() {
        let mut filter = notch(1000., NOTCH_Q, 44100).unwrap();
        let mut notched = sine(1000., 44100, 16384);
        filter.process_buffer(&mut notched);
        let cut = crate::utils::rms(&notched[8192..]);

        filter = notch(1000., NOTCH_Q, 44100).unwrap();
        let mut passed = sine(4000., 44100, 16384);
        filter.process_buffer(&mut passed);
        let kept = crate::utils::rms(&passed[8192..]);

        assert!(kept > 5. * cut, "kept {kept} vs cut {cut}");
    }

    #[test]
    fn test_notch_rejects_bad_q() {
        assert!(notch(1000., 0., 44100).is_err());
        assert!(notch(1000., -1., 44100).is_err());
    }

    #[test]
    fn test_dc_passes_lowpass_unchanged() {
        let mut filter = butterworth_lowpass(2, 1000., 44100).unwrap();
        let mut dc = vec![1.0f32; 4096];
        filter.process_buffer(&mut dc);
        let tail = dc[4000];
        assert!(0.01 > (1. - tail).abs(), "{tail} !~= 1");
    }
}
