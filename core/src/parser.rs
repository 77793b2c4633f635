//! The parser facade: configuration capture, plugin lifecycle, and the
//! buffer/chunk parse paths.

use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use beatgrid_analysis::buffer::{self, AudioBuffer};
use beatgrid_analysis::detector::{BeatDetector, Detection, DetectorSession};
use beatgrid_analysis::select::{self, SelectionMethod};
use beatgrid_analysis::{Beat, NoProgress, ProgressSink, Stage, Tempo};

use crate::config::{ParseOptions, ParserConfig};
use crate::errors::{CoreResult, Error};
use crate::plugin::{ParserPlugin, PluginRegistry};
use crate::streaming::{StreamOptions, scrub_chunk};

/// Container extensions whose decoded PCM this parser understands.
/// Informational only; decoding itself is the caller's job.
pub const SUPPORTED_FORMATS: &[&str] = &[".wav", ".mp3", ".ogg", ".flac", ".m4a"];

/// The analysis parameters echoed into the result metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseParameters {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub selection_method: SelectionMethod,
    pub target_picture_count: Option<usize>,
    pub confidence_threshold: f32,
}

/// Bookkeeping attached to every successful parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub processing_time_ms: u64,
    /// Sample count after standardization.
    pub samples_processed: usize,
    /// `None` when `include_metadata` is off.
    pub parameters: Option<ParseParameters>,
    pub filename: Option<String>,
    /// Standardization and plugin notes (cleanup actions, clipping).
    pub warnings: Vec<String>,
    /// Set when the requested beat count was capped by the physical limit.
    pub capped_count: Option<usize>,
    /// The audio carried too little energy to analyze.
    pub low_signal: bool,
}

/// The result of one parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOutcome {
    /// Selected beats, ordered by ascending timestamp.
    pub beats: Vec<Beat>,
    pub tempo: Option<Tempo>,
    pub metadata: ParseMetadata,
}

/// The main entry point: captures a validated config at construction, runs
/// parses, and owns the plugin registry.
///
/// Plugin registration is frozen after the first parse.
#[derive(Debug)]
pub struct Parser {
    config: ParserConfig,
    plugins: PluginRegistry,
    has_parsed: bool,
}

impl Parser {
    /// # Errors
    ///
    /// `InvalidConfig` when the config violates a documented constraint.
    pub fn new(config: ParserConfig) -> CoreResult<Self> {
        config.validate()?;
        debug!(
            "parser ready: {} Hz, frame {}, hop {}",
            config.sample_rate,
            config.frame_size,
            config.resolved_hop_size()
        );
        Ok(Self {
            config,
            plugins: PluginRegistry::new(),
            has_parsed: false,
        })
    }

    /// Read-only view of the captured config.
    #[must_use]
    pub const fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// The semantic version of this library.
    #[must_use]
    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// See [`SUPPORTED_FORMATS`].
    #[must_use]
    pub const fn supported_formats() -> &'static [&'static str] {
        SUPPORTED_FORMATS
    }

    /// Register a plugin. Forbidden after the first parse.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` after a parse has run or on a duplicate name.
    pub fn add_plugin(&mut self, plugin: Box<dyn ParserPlugin>) -> CoreResult<()> {
        if self.has_parsed {
            return Err(Error::InvalidConfig(
                "plugins cannot be added after the first parse".into(),
            ));
        }
        self.plugins.register(plugin)
    }

    /// Remove a plugin by name. Forbidden after the first parse.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` after a parse has run or when no such plugin exists.
    pub fn remove_plugin(&mut self, name: &str) -> CoreResult<()> {
        if self.has_parsed {
            return Err(Error::InvalidConfig(
                "plugins cannot be removed after the first parse".into(),
            ));
        }
        self.plugins.remove(name)
    }

    /// Parse one buffer of interleaved samples.
    ///
    /// The buffer is standardized (mono mix, resample, optional normalize)
    /// before detection; `options.channels` describes the interleaving.
    ///
    /// # Errors
    ///
    /// Analysis and plugin failures per the crate error taxonomy.
    pub fn parse_buffer(
        &mut self,
        samples: Vec<f32>,
        options: &ParseOptions,
    ) -> CoreResult<ParseOutcome> {
        self.parse_buffer_with_progress(samples, options, &mut NoProgress)
    }

    /// [`parse_buffer`](Self::parse_buffer) with a progress sink.
    ///
    /// # Errors
    ///
    /// Additionally `Cancelled` when the sink asks to stop.
    pub fn parse_buffer_with_progress(
        &mut self,
        samples: Vec<f32>,
        options: &ParseOptions,
        sink: &mut dyn ProgressSink,
    ) -> CoreResult<ParseOutcome> {
        options.validate()?;
        let started = Instant::now();
        self.plugins.initialize(&self.config)?;
        self.has_parsed = true;

        if !sink.report(Stage::Standardize, 0, 1) {
            return Err(Error::Cancelled);
        }
        let standardized = buffer::standardize(
            &samples,
            options.channels,
            options.sample_rate.unwrap_or(self.config.sample_rate),
            &self.config.standardize_options(),
        )?;
        drop(samples);
        let mut warnings = standardized.warnings;
        let samples_processed = standardized.buffer.len();
        let sample_rate = standardized.buffer.sample_rate();

        // plugin audio hooks run on the standardized mono signal
        let processed = self
            .plugins
            .process_audio(standardized.buffer.into_samples(), &self.config)?;
        let buffer = AudioBuffer::new(processed, sample_rate)?;

        let detector = BeatDetector::new(sample_rate, self.config.detector_options(options))?;
        let Some(detection) = detector.detect(&buffer, sink)? else {
            return Err(Error::Cancelled);
        };

        self.assemble(
            detection,
            options,
            sample_rate,
            samples_processed,
            &mut warnings,
            started,
            sink,
        )
    }

    /// Parse a finite sequence of chunks with bounded memory.
    ///
    /// Chunks must be mono and already at the agreed sample rate
    /// (`options.sample_rate` or the config default); standardization's
    /// resample and normalize steps do not apply here. Adjacent chunks may
    /// share `stream.overlap` of their length; the duplicated head of each
    /// later chunk is skipped.
    ///
    /// A failing chunk collapses the whole parse; no partial result is
    /// returned.
    ///
    /// # Errors
    ///
    /// `EmptyInput` on no chunks, `InvalidConfig` on non-mono options,
    /// otherwise as [`parse_buffer`](Self::parse_buffer).
    pub fn parse_chunks(
        &mut self,
        chunks: &[Vec<f32>],
        options: &ParseOptions,
        stream: &StreamOptions,
        sink: &mut dyn ProgressSink,
    ) -> CoreResult<ParseOutcome> {
        options.validate()?;
        stream.validate()?;
        if options.channels != 1 {
            return Err(Error::InvalidConfig(
                "chunked parsing expects mono chunks".into(),
            ));
        }
        if chunks.is_empty() || chunks.iter().all(Vec::is_empty) {
            return Err(Error::Analysis(
                beatgrid_analysis::errors::AnalysisError::EmptyInput,
            ));
        }

        let started = Instant::now();
        self.plugins.initialize(&self.config)?;
        self.has_parsed = true;

        let sample_rate = options.sample_rate.unwrap_or(self.config.sample_rate);
        let mut session =
            DetectorSession::new(sample_rate, self.config.detector_options(options))?;
        session.expect_samples(stream.effective_len(chunks));

        if !sink.report(Stage::Standardize, 0, 1) {
            return Err(Error::Cancelled);
        }

        let mut warnings = Vec::new();
        let mut scrubbed_total = 0usize;
        for (index, chunk) in chunks.iter().enumerate() {
            let skip = stream.head_skip(index, chunk.len());
            let body = &chunk[skip..];
            if body.is_empty() {
                continue;
            }

            let clean = scrub_chunk(body, self.config.enable_cleanup)?;
            scrubbed_total += body.iter().filter(|s| !s.is_finite()).count();

            let processed = self.plugins.process_audio(clean, &self.config)?;
            if !session.push_samples(&processed, sink)? {
                return Err(Error::Cancelled);
            }
        }
        if scrubbed_total > 0 {
            warnings.push(format!(
                "replaced {scrubbed_total} non-finite samples with silence"
            ));
        }

        let samples_processed = session.total_samples();
        let Some(detection) = session.finish(sink)? else {
            return Err(Error::Cancelled);
        };

        self.assemble(
            detection,
            options,
            sample_rate,
            samples_processed,
            &mut warnings,
            started,
            sink,
        )
    }

    /// Shared back half of both parse paths: plugin beat hooks, selection,
    /// and metadata assembly.
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &mut self,
        detection: Detection,
        options: &ParseOptions,
        sample_rate: u32,
        samples_processed: usize,
        warnings: &mut Vec<String>,
        started: Instant,
        sink: &mut dyn ProgressSink,
    ) -> CoreResult<ParseOutcome> {
        let candidates = self.plugins.process_beats(
            detection.candidates,
            detection.duration,
            &self.config,
        )?;

        if !sink.report(Stage::Selection, 0, 1) {
            return Err(Error::Cancelled);
        }
        let detector_options = self.config.detector_options(options);
        let selection = select::select(
            &candidates,
            options.target_picture_count,
            options.selection_method,
            detection.duration,
            detector_options.tempo.max_tempo,
        );

        if detection.low_signal {
            warnings.push("signal energy below the analysis floor".into());
        }

        let parameters = self.config.include_metadata.then(|| ParseParameters {
            sample_rate,
            frame_size: detector_options.frame_size,
            hop_size: detector_options.hop_size,
            selection_method: options.selection_method,
            target_picture_count: options.target_picture_count,
            confidence_threshold: detector_options.confidence_threshold,
        });

        #[allow(clippy::cast_possible_truncation)]
        let processing_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            "parse finished: {} beats from {samples_processed} samples in {processing_time_ms} ms",
            selection.beats.len(),
        );

        Ok(ParseOutcome {
            beats: selection.beats,
            tempo: detection.tempo,
            metadata: ParseMetadata {
                processing_time_ms,
                samples_processed,
                parameters,
                filename: options.filename.clone(),
                warnings: std::mem::take(warnings),
                capped_count: selection.capped_count,
                low_signal: detection.low_signal,
            },
        })
    }

    /// Run plugin cleanup hooks in reverse registration order. Idempotent.
    pub fn cleanup(&mut self) {
        self.plugins.cleanup();
    }
}
