//! Rendering a [`ParseOutcome`] for external consumers.
//!
//! These are convenience writers for the `output_format` config key; the
//! parse result itself stays a plain struct. CSV holds one row per beat,
//! XML mirrors the JSON shape, and both honor the `include_*` config
//! toggles.

use csv::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::config::{OutputFormat, ParserConfig};
use crate::errors::{CoreResult, Error};
use crate::parser::ParseOutcome;

/// Render `outcome` in the config's `output_format`.
///
/// # Errors
///
/// `InvalidConfig` when serialization fails (a writer error or non-UTF8
/// intermediate).
pub fn render(outcome: &ParseOutcome, config: &ParserConfig) -> CoreResult<String> {
    match config.output_format {
        OutputFormat::Json => to_json(outcome, config),
        OutputFormat::Csv => to_csv(outcome, config),
        OutputFormat::Xml => to_xml(outcome, config),
    }
}

/// Pretty JSON of the whole outcome.
///
/// # Errors
///
/// `InvalidConfig` when serialization fails.
pub fn to_json(outcome: &ParseOutcome, config: &ParserConfig) -> CoreResult<String> {
    let trimmed = trim(outcome, config);
    serde_json::to_string_pretty(&trimmed).map_err(|e| Error::InvalidConfig(e.to_string()))
}

/// One CSV row per beat: `timestamp,confidence,strength,source`.
///
/// # Errors
///
/// `InvalidConfig` when the writer fails.
pub fn to_csv(outcome: &ParseOutcome, config: &ParserConfig) -> CoreResult<String> {
    let trimmed = trim(outcome, config);
    let mut writer = Writer::from_writer(Vec::new());
    let wrap = |e: csv::Error| Error::InvalidConfig(e.to_string());

    if config.include_confidence_scores {
        writer
            .write_record(["timestamp", "confidence", "strength", "source"])
            .map_err(wrap)?;
    } else {
        writer
            .write_record(["timestamp", "strength", "source"])
            .map_err(wrap)?;
    }
    for beat in &trimmed.beats {
        if config.include_confidence_scores {
            writer
                .write_record(&[
                    format!("{:.6}", beat.timestamp),
                    format!("{:.4}", beat.confidence),
                    format!("{:.4}", beat.strength),
                    beat.source.to_string(),
                ])
                .map_err(wrap)?;
        } else {
            writer
                .write_record(&[
                    format!("{:.6}", beat.timestamp),
                    format!("{:.4}", beat.strength),
                    beat.source.to_string(),
                ])
                .map_err(wrap)?;
        }
    }
    writer.flush().map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::InvalidConfig(e.to_string()))
}

/// XML mirroring the JSON shape.
///
/// # Errors
///
/// `InvalidConfig` when the writer fails.
pub fn to_xml(outcome: &ParseOutcome, config: &ParserConfig) -> CoreResult<String> {
    let trimmed = trim(outcome, config);
    let mut writer = quick_xml::Writer::new_with_indent(Vec::new(), b' ', 2);
    let io_wrap = |e: std::io::Error| Error::InvalidConfig(e.to_string());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(io_wrap)?;
    writer
        .write_event(Event::Start(BytesStart::new("parseResult")))
        .map_err(io_wrap)?;

    writer
        .write_event(Event::Start(BytesStart::new("beats")))
        .map_err(io_wrap)?;
    for beat in &trimmed.beats {
        let mut element = BytesStart::new("beat");
        element.push_attribute(("timestamp", format!("{:.6}", beat.timestamp).as_str()));
        if config.include_confidence_scores {
            element.push_attribute(("confidence", format!("{:.4}", beat.confidence).as_str()));
        }
        element.push_attribute(("strength", format!("{:.4}", beat.strength).as_str()));
        element.push_attribute(("source", beat.source.to_string().as_str()));
        writer.write_event(Event::Empty(element)).map_err(io_wrap)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("beats")))
        .map_err(io_wrap)?;

    if let Some(tempo) = &trimmed.tempo {
        let mut element = BytesStart::new("tempo");
        element.push_attribute(("bpm", format!("{:.2}", tempo.bpm).as_str()));
        element.push_attribute(("confidence", format!("{:.4}", tempo.confidence).as_str()));
        element.push_attribute(("phase", format!("{:.6}", tempo.phase).as_str()));
        writer.write_event(Event::Empty(element)).map_err(io_wrap)?;
    }

    writer
        .write_event(Event::Start(BytesStart::new("metadata")))
        .map_err(io_wrap)?;
    let metadata_json = serde_json::to_string(&trimmed.metadata)
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;
    writer
        .write_event(Event::Text(BytesText::new(&metadata_json)))
        .map_err(io_wrap)?;
    writer
        .write_event(Event::End(BytesEnd::new("metadata")))
        .map_err(io_wrap)?;

    writer
        .write_event(Event::End(BytesEnd::new("parseResult")))
        .map_err(io_wrap)?;

    String::from_utf8(writer.into_inner()).map_err(|e| Error::InvalidConfig(e.to_string()))
}

/// Apply the `include_*` toggles.
fn trim(outcome: &ParseOutcome, config: &ParserConfig) -> ParseOutcome {
    let mut trimmed = outcome.clone();
    if !config.include_metadata {
        trimmed.metadata.parameters = None;
        trimmed.metadata.warnings.clear();
    }
    if !config.include_confidence_scores {
        for beat in &mut trimmed.beats {
            beat.confidence = 1.;
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseMetadata, ParseParameters};
    use beatgrid_analysis::select::SelectionMethod;
    use beatgrid_analysis::{Beat, CandidateSource, Tempo};
    use pretty_assertions::assert_eq;

    fn outcome() -> ParseOutcome {
        ParseOutcome {
            beats: vec![
                Beat {
                    timestamp: 0.5,
                    confidence: 0.9,
                    strength: 1.,
                    source: CandidateSource::Fused,
                },
                Beat {
                    timestamp: 1.0,
                    confidence: 0.8,
                    strength: 0.7,
                    source: CandidateSource::Grid,
                },
            ],
            tempo: Some(Tempo {
                bpm: 120.,
                confidence: 0.95,
                time_signature: None,
                phase: 0.5,
                stability: 1.,
                alternatives: vec![],
            }),
            metadata: ParseMetadata {
                processing_time_ms: 12,
                samples_processed: 441_000,
                parameters: Some(ParseParameters {
                    sample_rate: 44100,
                    frame_size: 2048,
                    hop_size: 512,
                    selection_method: SelectionMethod::Adaptive,
                    target_picture_count: Some(2),
                    confidence_threshold: 0.6,
                }),
                filename: Some("song.wav".into()),
                warnings: vec![],
                capped_count: None,
                low_signal: false,
            },
        }
    }

    #[test]
    fn test_json_round_trips() {
        let config = ParserConfig::default();
        let json = to_json(&outcome(), &config).unwrap();
        let back: ParseOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome());
    }

    #[test]
    fn test_csv_has_one_row_per_beat() {
        let config = ParserConfig::default();
        let csv = to_csv(&outcome(), &config).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,confidence,strength,source");
        assert!(lines[1].starts_with("0.500000,0.9000,"));
        assert!(lines[2].ends_with("grid"));
    }

    #[test]
    fn test_csv_without_confidence_column() {
        let config = ParserConfig {
            include_confidence_scores: false,
            ..ParserConfig::default()
        };
        let csv = to_csv(&outcome(), &config).unwrap();
        assert!(csv.lines().next().unwrap() == "timestamp,strength,source");
        assert!(!csv.contains("confidence"));
    }

    #[test]
    fn test_xml_shape() {
        let config = ParserConfig::default();
        let xml = to_xml(&outcome(), &config).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<parseResult>"));
        assert_eq!(xml.matches("<beat ").count(), 2);
        assert!(xml.contains("bpm=\"120.00\""));
        assert!(xml.contains("</parseResult>"));
    }

    #[test]
    fn test_render_dispatches_on_config() {
        let mut config = ParserConfig::default();
        assert!(render(&outcome(), &config).unwrap().starts_with('{'));
        config.output_format = OutputFormat::Csv;
        assert!(render(&outcome(), &config).unwrap().starts_with("timestamp"));
        config.output_format = OutputFormat::Xml;
        assert!(render(&outcome(), &config).unwrap().starts_with("<?xml"));
    }

    #[test]
    fn test_metadata_trimmed_when_disabled() {
        let config = ParserConfig {
            include_metadata: false,
            ..ParserConfig::default()
        };
        let json = to_json(&outcome(), &config).unwrap();
        assert!(!json.contains("frame_size"));
    }
}
