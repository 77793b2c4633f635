//! Parser configuration.
//!
//! Configs are plain value objects with documented defaults. Validation
//! happens once, at parser construction; after that the config is shared
//! read-only. [`ParserConfig::load`] layers a TOML file and
//! `BEATGRID_`-prefixed environment variables over the defaults, so
//! deployments can tune the parser without code changes.

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use beatgrid_analysis::buffer::StandardizeOptions;
use beatgrid_analysis::candidates::CandidateOptions;
use beatgrid_analysis::detector::DetectorOptions;
use beatgrid_analysis::onset::OnsetOptions;
use beatgrid_analysis::select::SelectionMethod;
use beatgrid_analysis::tempo::TempoOptions;
use beatgrid_analysis::window::WindowType;

use crate::errors::{CoreResult, Error};

/// How a `ParseOutcome` is rendered by the output helpers.
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
pub enum OutputFormat {
    #[default]
    Json,
    Xml,
    Csv,
}

/// Construction-time parser settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Standardization target rate, Hz.
    pub sample_rate: u32,
    /// Analysis frame length, samples.
    pub frame_size: usize,
    /// Frame advance, samples. `None` means `frame_size / 4`.
    pub hop_size: Option<usize>,
    /// Lower bound of the tempo search, BPM.
    pub min_tempo: f32,
    /// Upper bound of the tempo search, BPM.
    pub max_tempo: f32,
    /// Candidate-fusion weight of onset evidence (renormalized against
    /// `tempo_weight`).
    pub onset_weight: f32,
    /// Candidate-fusion weight of tempo-grid evidence.
    pub tempo_weight: f32,
    /// Share of the spectral-flux function in the onset score fusion.
    pub spectral_weight: f32,
    /// Re-pick onsets with the detected tempo as a prior.
    pub multi_pass_enabled: bool,
    /// Widen the tempo prior when the winner sits below 90 or above 160 BPM.
    pub genre_adaptive: bool,
    /// Candidates below this confidence are dropped.
    pub confidence_threshold: f32,
    pub include_metadata: bool,
    pub include_confidence_scores: bool,
    /// Master switch for the resampling step of standardization.
    pub enable_preprocessing: bool,
    /// Peak-normalize to 0.95 headroom during standardization.
    pub enable_normalization: bool,
    /// Anti-alias prefilter when standardization downsamples.
    pub enable_filtering: bool,
    /// Replace non-finite input samples with silence instead of failing.
    pub enable_cleanup: bool,
    /// Analysis window shape.
    pub window: WindowType,
    pub output_format: OutputFormat,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 2048,
            hop_size: None,
            min_tempo: 60.,
            max_tempo: 200.,
            onset_weight: 0.4,
            tempo_weight: 0.4,
            spectral_weight: 0.2,
            multi_pass_enabled: false,
            genre_adaptive: false,
            confidence_threshold: 0.6,
            include_metadata: true,
            include_confidence_scores: true,
            enable_preprocessing: true,
            enable_normalization: true,
            enable_filtering: true,
            enable_cleanup: false,
            window: WindowType::Hanning,
            output_format: OutputFormat::Json,
        }
    }
}

impl ParserConfig {
    /// Layer `Beatgrid.toml`-style file settings and `BEATGRID_*`
    /// environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on unreadable/unparsable sources or failed
    /// validation.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        let source = builder
            .add_source(Environment::with_prefix("BEATGRID"))
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        // `serde(default)` fills the keys the sources leave out
        let settings: Self = source
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Hop size with the `frame_size / 4` default applied.
    #[must_use]
    pub fn resolved_hop_size(&self) -> usize {
        self.hop_size.unwrap_or_else(|| (self.frame_size / 4).max(1))
    }

    /// Re-check every documented constraint.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the violated constraint.
    pub fn validate(&self) -> CoreResult<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be positive".into()));
        }
        if self.frame_size < 64 {
            return Err(Error::InvalidConfig(format!(
                "frame_size {} must be at least 64",
                self.frame_size
            )));
        }
        let hop = self.resolved_hop_size();
        if hop == 0 || hop > self.frame_size {
            return Err(Error::InvalidConfig(format!(
                "hop_size {hop} must be in 1..={}",
                self.frame_size
            )));
        }
        if !self.min_tempo.is_finite()
            || !self.max_tempo.is_finite()
            || self.min_tempo <= 0.
            || self.min_tempo >= self.max_tempo
        {
            return Err(Error::InvalidConfig(format!(
                "tempo range {}..{} must satisfy 0 < min < max",
                self.min_tempo, self.max_tempo
            )));
        }
        for (name, value) in [
            ("onset_weight", self.onset_weight),
            ("tempo_weight", self.tempo_weight),
            ("spectral_weight", self.spectral_weight),
            ("confidence_threshold", self.confidence_threshold),
        ] {
            if !value.is_finite() || !(0. ..=1.).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{name} {value} must be in [0, 1]"
                )));
            }
        }
        if self.onset_weight + self.tempo_weight <= 0. {
            return Err(Error::InvalidConfig(
                "onset_weight and tempo_weight must not both be zero".into(),
            ));
        }
        Ok(())
    }

    /// The detector tuning for one parse, with per-call overrides applied.
    #[must_use]
    pub fn detector_options(&self, overrides: &ParseOptions) -> DetectorOptions {
        let frame_size = overrides.window_size.unwrap_or(self.frame_size);
        let hop_size = overrides
            .hop_size
            .unwrap_or_else(|| self.hop_size.unwrap_or_else(|| (frame_size / 4).max(1)));

        let onset = overrides.onset.unwrap_or(OnsetOptions {
            flux_weight: self.spectral_weight,
            max_tempo: self.max_tempo,
            ..OnsetOptions::default()
        });
        let tempo = overrides.tempo.unwrap_or(TempoOptions {
            min_tempo: self.min_tempo,
            max_tempo: self.max_tempo,
            genre_adaptive: self.genre_adaptive,
            ..TempoOptions::default()
        });

        DetectorOptions {
            frame_size,
            hop_size,
            window: self.window,
            pad_final_frame: false,
            multi_pass: self.multi_pass_enabled,
            confidence_threshold: overrides
                .min_confidence
                .unwrap_or(self.confidence_threshold),
            onset,
            tempo,
            candidates: CandidateOptions {
                onset_weight: self.onset_weight,
                tempo_weight: self.tempo_weight,
                ..CandidateOptions::default()
            },
        }
    }

    /// The standardization knobs for one parse.
    ///
    /// The target rate is always the config's; a `ParseOptions::sample_rate`
    /// describes the rate of the *incoming* samples.
    #[must_use]
    pub fn standardize_options(&self) -> StandardizeOptions {
        StandardizeOptions {
            target_sample_rate: self.sample_rate,
            resample: self.enable_preprocessing,
            normalize: self.enable_normalization,
            filter: self.enable_filtering,
            cleanup: self.enable_cleanup,
        }
    }
}

/// Per-call options for a single parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// The `N` in "give me up to N beats". `None` means no explicit limit.
    pub target_picture_count: Option<usize>,
    pub selection_method: SelectionMethod,
    /// Override of the config's confidence threshold.
    pub min_confidence: Option<f32>,
    /// Frame-size override, samples.
    pub window_size: Option<usize>,
    /// Hop-size override, samples.
    pub hop_size: Option<usize>,
    /// Rate of the provided samples, Hz, when it differs from the config's
    /// standardization target. Buffer parses resample to the target; chunk
    /// parses analyze at this rate as-is.
    pub sample_rate: Option<u32>,
    /// Interleaved channel count of the input samples.
    pub channels: u16,
    /// Recorded verbatim in the result metadata.
    pub filename: Option<String>,
    /// Full onset-stage override.
    pub onset: Option<OnsetOptions>,
    /// Full tempo-stage override.
    pub tempo: Option<TempoOptions>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            target_picture_count: None,
            selection_method: SelectionMethod::default(),
            min_confidence: None,
            window_size: None,
            hop_size: None,
            sample_rate: None,
            channels: 1,
            filename: None,
            onset: None,
            tempo: None,
        }
    }
}

impl ParseOptions {
    /// # Errors
    ///
    /// `InvalidConfig` on out-of-range overrides.
    pub fn validate(&self) -> CoreResult<()> {
        if self.channels == 0 {
            return Err(Error::InvalidConfig("channels must be positive".into()));
        }
        if self.sample_rate == Some(0) {
            return Err(Error::InvalidConfig("sample_rate must be positive".into()));
        }
        if let Some(threshold) = self.min_confidence {
            if !threshold.is_finite() || !(0. ..=1.).contains(&threshold) {
                return Err(Error::InvalidConfig(format!(
                    "min_confidence {threshold} must be in [0, 1]"
                )));
            }
        }
        if let (Some(window), Some(hop)) = (self.window_size, self.hop_size) {
            if hop > window {
                return Err(Error::InvalidConfig(format!(
                    "hop_size {hop} must not exceed window_size {window}"
                )));
            }
        }
        Ok(())
    }
}
