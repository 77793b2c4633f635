//! Framing and per-frame feature extraction.
//!
//! Frames start at multiples of the hop size and never cross the end of the
//! signal unless the caller explicitly pads the tail first.

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::errors::{AnalysisError, AnalysisResult};
use crate::spectrum::{ForwardFft, spectral_centroid, spectral_rolloff};
use crate::utils::{ensure_finite, rms, zero_crossings};
use crate::window::{self, WindowType};

/// Fraction of total magnitude used for the rolloff feature.
pub const ROLLOFF_FRACTION: f32 = 0.85;

/// Number of full frames in `len` samples.
///
/// `⌊(len - frame) / hop⌋ + 1` when the signal holds at least one frame,
/// zero otherwise. `pad` adds the trailing partial frame.
#[allow(clippy::missing_inline_in_public_items)]
#[must_use]
pub fn frame_count(len: usize, frame_size: usize, hop_size: usize, pad: bool) -> usize {
    if frame_size == 0 || hop_size == 0 {
        return 0;
    }
    if len < frame_size {
        return usize::from(pad && len > 0);
    }
    let full = (len - frame_size) / hop_size + 1;
    // is there a remainder frame that padding would expose?
    if pad && (len - frame_size) % hop_size != 0 {
        full + 1
    } else {
        full
    }
}

/// Iterate the full frames of `samples`.
#[inline]
pub fn frames(samples: &[f32], frame_size: usize, hop_size: usize) -> impl Iterator<Item = &[f32]> {
    samples.windows(frame_size).step_by(hop_size.max(1))
}

/// Copy of `samples` zero-padded so the last hop-aligned frame is complete.
///
/// Returns the input length unchanged when no padding is needed.
#[allow(clippy::missing_inline_in_public_items)]
#[must_use]
pub fn pad_to_frame_boundary(samples: &[f32], frame_size: usize, hop_size: usize) -> Vec<f32> {
    let mut padded = samples.to_vec();
    if samples.is_empty() || frame_size == 0 || hop_size == 0 {
        return padded;
    }
    let count = frame_count(samples.len(), frame_size, hop_size, true);
    let needed = (count - 1) * hop_size + frame_size;
    padded.resize(needed.max(samples.len()), 0.);
    padded
}

/// Per-frame features used by the onset detectors.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    /// Sample offset of the frame start.
    pub start: usize,
    pub rms: f32,
    /// Zero-crossing rate in `[0, 1]`.
    pub zcr: f32,
    pub spectral_centroid: f32,
    pub spectral_rolloff: f32,
    /// One-sided magnitude spectrum of the windowed frame.
    pub magnitude_spectrum: Vec<f32>,
    /// Matching phase per bin, for the complex-domain detector.
    pub phase_spectrum: Vec<f32>,
}

impl FeatureFrame {
    /// Frame start in seconds.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    #[inline]
    pub fn time(&self, sample_rate: u32) -> f64 {
        self.start as f64 / f64::from(sample_rate)
    }
}

/// Windowed FFT-based feature extraction with a reusable plan.
#[derive(Debug)]
pub struct FeatureExtractor {
    sample_rate: u32,
    frame_size: usize,
    hop_size: usize,
    window_type: WindowType,
    fft: ForwardFft,
}

impl FeatureExtractor {
    /// # Errors
    ///
    /// `InvalidParameter` when `frame_size < 2`, `hop_size` is zero, or the
    /// hop exceeds the frame.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(
        sample_rate: u32,
        frame_size: usize,
        hop_size: usize,
        window_type: WindowType,
    ) -> AnalysisResult<Self> {
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidParameter(
                "sample rate must be positive".into(),
            ));
        }
        if frame_size < 2 {
            return Err(AnalysisError::InvalidParameter(format!(
                "frame size {frame_size} must be at least 2"
            )));
        }
        if hop_size == 0 || hop_size > frame_size {
            return Err(AnalysisError::InvalidParameter(format!(
                "hop size {hop_size} must be in 1..={frame_size}"
            )));
        }
        Ok(Self {
            sample_rate,
            frame_size,
            hop_size,
            window_type,
            fft: ForwardFft::new(frame_size)?,
        })
    }

    #[must_use]
    #[inline]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    #[inline]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[must_use]
    #[inline]
    pub const fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Seconds between consecutive frame starts.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    #[inline]
    pub fn hop_seconds(&self) -> f64 {
        self.hop_size as f64 / f64::from(self.sample_rate)
    }

    /// Extract features for one frame starting at sample `start`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` on a frame of the wrong length,
    /// `NumericInstability` if the spectrum goes non-finite.
    #[allow(clippy::missing_inline_in_public_items, clippy::cast_precision_loss)]
    pub fn extract(&self, frame: &[f32], start: usize) -> AnalysisResult<FeatureFrame> {
        if frame.len() != self.frame_size {
            return Err(AnalysisError::InvalidParameter(format!(
                "frame of {} samples does not match configured size {}",
                frame.len(),
                self.frame_size
            )));
        }

        let frame_rms = rms(frame);
        let zcr = if frame_rms <= f32::EPSILON {
            0.
        } else {
            zero_crossings(frame) as f32 / frame.len() as f32
        };

        let mut windowed = frame.to_vec();
        window::apply(self.window_type, &mut windowed)?;
        let spectrum = self.fft.process(&windowed)?;
        let magnitude_spectrum: Vec<f32> = spectrum.iter().map(|c| c.re.hypot(c.im)).collect();
        let phase_spectrum: Vec<f32> = spectrum.iter().map(|c| c.im.atan2(c.re)).collect();
        ensure_finite("feature extraction", &magnitude_spectrum)?;

        let spectral_centroid = if frame_rms <= f32::EPSILON {
            0.
        } else {
            spectral_centroid(&magnitude_spectrum, self.sample_rate)
        };
        let spectral_rolloff =
            spectral_rolloff(&magnitude_spectrum, self.sample_rate, ROLLOFF_FRACTION);

        Ok(FeatureFrame {
            start,
            rms: frame_rms,
            zcr,
            spectral_centroid,
            spectral_rolloff,
            magnitude_spectrum,
            phase_spectrum,
        })
    }

    /// Extract every hop-aligned frame of `samples`, in parallel.
    ///
    /// `base_offset` shifts the reported frame starts, which keeps absolute
    /// positions meaningful when the caller feeds a tail of a longer signal.
    ///
    /// # Errors
    ///
    /// Propagates the first failing frame.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn extract_all(
        &self,
        samples: &[f32],
        base_offset: usize,
    ) -> AnalysisResult<Vec<FeatureFrame>> {
        let count = frame_count(samples.len(), self.frame_size, self.hop_size, false);
        (0..count)
            .into_par_iter()
            .map(|i| {
                let start = i * self.hop_size;
                self.extract(&samples[start..start + self.frame_size], base_offset + start)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case::exact_fit(1024, 1024, 256, false, 1)]
    #[case::typical(44100, 2048, 512, false, 83)]
    #[case::too_short(1000, 2048, 512, false, 0)]
    #[case::too_short_padded(1000, 2048, 512, true, 1)]
    #[case::remainder_padded(2049, 2048, 512, true, 2)]
    #[case::no_remainder_padded(2048, 2048, 512, true, 1)]
    #[case::hop_equals_frame(4096, 1024, 1024, false, 4)]
    fn test_frame_count(
        #[case] len: usize,
        #[case] frame: usize,
        #[case] hop: usize,
        #[case] pad: bool,
        #[case] expected: usize,
    ) {
        assert_eq!(frame_count(len, frame, hop, pad), expected);
    }

    #[test]
    fn test_frames_iterator_matches_count() {
        let samples = vec![0.0f32; 44100];
        let count = frames(&samples, 2048, 512).count();
        assert_eq!(count, frame_count(44100, 2048, 512, false));
    }

    #[test]
    fn test_frames_start_at_hop_multiples() {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..4096).map(|i| i as f32).collect();
        for (i, frame) in frames(&samples, 1024, 256).enumerate() {
            assert!((frame[0] - (i * 256) as f32).abs() < f32::EPSILON);
            assert_eq!(frame.len(), 1024);
        }
    }

    #[test]
    fn test_pad_to_frame_boundary() {
        let samples = vec![1.0f32; 2049];
        let padded = pad_to_frame_boundary(&samples, 2048, 512);
        // second frame starts at 512 and needs 2560 samples total
        assert_eq!(padded.len(), 2560);
        assert!(padded[2049..].iter().all(|s| s.abs() < f32::EPSILON));

        let exact = vec![1.0f32; 2048];
        assert_eq!(pad_to_frame_boundary(&exact, 2048, 512).len(), 2048);
    }

    #[test]
    fn test_extractor_validates_geometry() {
        assert!(FeatureExtractor::new(44100, 1, 1, WindowType::Hanning).is_err());
        assert!(FeatureExtractor::new(44100, 2048, 0, WindowType::Hanning).is_err());
        assert!(FeatureExtractor::new(44100, 2048, 4096, WindowType::Hanning).is_err());
        assert!(FeatureExtractor::new(0, 2048, 512, WindowType::Hanning).is_err());
    }

    #[test]
    fn test_silent_frame_features_are_zero() {
        let extractor = FeatureExtractor::new(44100, 2048, 512, WindowType::Hanning).unwrap();
        let frame = extractor.extract(&vec![0.0f32; 2048], 0).unwrap();
        assert!(frame.rms.abs() < f32::EPSILON);
        assert!(frame.zcr.abs() < f32::EPSILON);
        assert!(frame.spectral_centroid.abs() < f32::EPSILON);
        assert!(frame.spectral_rolloff.abs() < f32::EPSILON);
        assert_eq!(frame.magnitude_spectrum.len(), 1025);
    }

    #[test]
    fn test_tonal_frame_centroid_near_tone() {
        let extractor = FeatureExtractor::new(44100, 2048, 512, WindowType::Hanning).unwrap();
        #[allow(clippy::cast_precision_loss)]
        let tone: Vec<f32> = (0..2048)
            .map(|i| (2. * std::f32::consts::PI * 1000. * i as f32 / 44100.).sin())
            .collect();
        let frame = extractor.extract(&tone, 0).unwrap();
        assert!(
            (frame.spectral_centroid - 1000.).abs() < 150.,
            "{} not near 1000 Hz",
            frame.spectral_centroid
        );
        assert!(frame.rms > 0.5);
        assert!(frame.zcr > 0.01);
    }

    #[test]
    fn test_extract_all_matches_sequential() {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..8192)
            .map(|i| (2. * std::f32::consts::PI * 220. * i as f32 / 44100.).sin())
            .collect();
        let extractor = FeatureExtractor::new(44100, 2048, 512, WindowType::Hanning).unwrap();
        let parallel = extractor.extract_all(&samples, 0).unwrap();

        let sequential: Vec<FeatureFrame> = frames(&samples, 2048, 512)
            .enumerate()
            .map(|(i, frame)| extractor.extract(frame, i * 512).unwrap())
            .collect();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_extract_all_applies_base_offset() {
        let samples = vec![0.0f32; 4096];
        let extractor = FeatureExtractor::new(44100, 2048, 512, WindowType::Hanning).unwrap();
        let frames = extractor.extract_all(&samples, 10_000).unwrap();
        assert_eq!(frames[0].start, 10_000);
        assert_eq!(frames[1].start, 10_512);
    }

    #[test]
    fn test_wrong_frame_length_is_rejected() {
        let extractor = FeatureExtractor::new(44100, 2048, 512, WindowType::Hanning).unwrap();
        assert!(extractor.extract(&vec![0.0f32; 1024], 0).is_err());
    }
}
