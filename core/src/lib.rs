//! Core library for the beatgrid project: the parser facade, validated
//! configuration, the plugin pipeline, chunked ingestion, and the worker
//! offload protocol.
//!
//! The DSP and detection engine itself lives in `beatgrid-analysis`; this
//! crate is the surface consumers program against:
//!
//! ```rust
//! use beatgrid_core::config::{ParseOptions, ParserConfig};
//! use beatgrid_core::parser::Parser;
//!
//! let mut parser = Parser::new(ParserConfig::default()).unwrap();
//! // one second of silence, mono, 44.1 kHz
//! let outcome = parser
//!     .parse_buffer(vec![0.0; 44100], &ParseOptions::default())
//!     .unwrap();
//! assert!(outcome.beats.is_empty());
//! ```

pub mod config;
pub mod errors;
pub mod logger;
pub mod output;
pub mod parser;
pub mod plugin;
pub mod streaming;
pub mod worker;

pub use config::{ParseOptions, ParserConfig};
pub use errors::{CoreResult, Error, ErrorKind};
pub use parser::{ParseOutcome, Parser};

/// Format a duration of audio as `HH:MM:SS.ss`.
#[must_use]
pub fn format_duration(duration: &std::time::Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = duration.as_secs_f32() % 60.;

    format!("{hours:02}:{minutes:02}:{seconds:05.2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_str_eq;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case(Duration::from_secs(0), "00:00:00.00")]
    #[case(Duration::from_secs(61), "00:01:01.00")]
    #[case(Duration::from_secs(3600 + 120 + 1), "01:02:01.00")]
    #[case(Duration::from_millis(1500), "00:00:01.50")]
    fn test_format_duration(#[case] duration: Duration, #[case] expected: &str) {
        assert_str_eq!(format_duration(&duration), expected);
    }
}
