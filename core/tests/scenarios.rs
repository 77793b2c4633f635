//! End-to-end scenarios against the public parser surface.

use beatgrid_analysis::NoProgress;
use beatgrid_core::config::{ParseOptions, ParserConfig};
use beatgrid_core::parser::Parser;
use beatgrid_core::streaming::StreamOptions;

const SR: u32 = 44100;
const HOP_SECONDS: f64 = 512. / 44100.;

/// Unit clicks every `period` samples, `seconds` long.
fn click_track(period: usize, seconds: usize) -> Vec<f32> {
    let len = SR as usize * seconds;
    let mut samples = vec![0.0f32; len];
    for i in (0..len).step_by(period) {
        samples[i] = 1.;
    }
    samples
}

/// Clicks every half second, alternating strong and weak: 60 and 120 BPM
/// are both present.
fn dual_tempo_track(seconds: usize) -> Vec<f32> {
    let len = SR as usize * seconds;
    let mut samples = vec![0.0f32; len];
    let mut strong = true;
    for i in (0..len).step_by(SR as usize / 2) {
        samples[i] = if strong { 1. } else { 0.45 };
        strong = !strong;
    }
    samples
}

#[test]
fn scenario_click_track_120_bpm() {
    let mut parser = Parser::new(ParserConfig::default()).unwrap();
    let options = ParseOptions {
        target_picture_count: Some(10),
        ..ParseOptions::default()
    };
    let outcome = parser
        .parse_buffer(click_track(SR as usize / 2, 10), &options)
        .unwrap();

    // exactly the requested count, strictly increasing, inside the audio
    assert_eq!(outcome.beats.len(), 10);
    for pair in outcome.beats.windows(2) {
        assert!(pair[0].timestamp < pair[1].timestamp);
    }
    for beat in &outcome.beats {
        assert!((0. ..=10.).contains(&beat.timestamp));
        assert!((0. ..=1.).contains(&beat.confidence));
        assert!(beat.strength >= 0.);
        // on the half-second grid to within ~a hop
        let nearest = (beat.timestamp * 2.).round() / 2.;
        assert!(
            (beat.timestamp - nearest).abs() <= HOP_SECONDS + 1e-9,
            "beat at {} off the grid",
            beat.timestamp
        );
    }

    let tempo = outcome.tempo.expect("click track has a tempo");
    assert!((118. ..=122.).contains(&tempo.bpm), "{}", tempo.bpm);
    assert!(tempo.confidence > 0.8, "confidence {}", tempo.confidence);

    assert_eq!(outcome.metadata.samples_processed, SR as usize * 10);
}

#[test]
fn scenario_silence_reports_low_signal() {
    let mut parser = Parser::new(ParserConfig::default()).unwrap();
    let options = ParseOptions {
        target_picture_count: Some(5),
        ..ParseOptions::default()
    };
    let outcome = parser
        .parse_buffer(vec![0.0f32; SR as usize * 5], &options)
        .unwrap();
    assert!(outcome.beats.is_empty());
    assert!(outcome.tempo.is_none());
    assert!(outcome.metadata.low_signal);
}

#[test]
fn scenario_dual_tempo_surfaces_alternative() {
    let mut parser = Parser::new(ParserConfig::default()).unwrap();
    let outcome = parser
        .parse_buffer(dual_tempo_track(30), &ParseOptions::default())
        .unwrap();
    let tempo = outcome.tempo.expect("dual tempo track has a tempo");

    let near = |bpm: f32, target: f32| (bpm - target).abs() / target < 0.05;
    assert!(
        near(tempo.bpm, 60.) || near(tempo.bpm, 120.),
        "winner {} is neither 60 nor 120",
        tempo.bpm
    );
    let other = if near(tempo.bpm, 120.) { 60. } else { 120. };
    assert!(
        tempo
            .alternatives
            .iter()
            .any(|alt| near(alt.bpm, other) && alt.confidence >= 0.4),
        "no alternative near {other} BPM with confidence >= 0.4: {:?}",
        tempo.alternatives
    );
}

#[test]
fn scenario_constant_dc_has_no_confident_tempo() {
    let mut parser = Parser::new(ParserConfig::default()).unwrap();
    let outcome = parser
        .parse_buffer(vec![0.5f32; SR as usize * 5], &ParseOptions::default())
        .unwrap();

    if let Some(tempo) = &outcome.tempo {
        assert!(tempo.confidence < 0.2, "DC tempo confidence {}", tempo.confidence);
    }
    for beat in &outcome.beats {
        assert!(beat.timestamp.is_finite());
        assert!(beat.confidence.is_finite());
    }
}

#[test]
fn scenario_streaming_matches_single_buffer() {
    let audio = click_track(SR as usize / 2, 20);
    let options = ParseOptions {
        target_picture_count: Some(16),
        ..ParseOptions::default()
    };
    let config = ParserConfig::default();

    let mut buffer_parser = Parser::new(config.clone()).unwrap();
    let whole = buffer_parser.parse_buffer(audio.clone(), &options).unwrap();

    // 0.5 s chunks with 10% overlap
    let chunk = SR as usize / 2;
    let step = chunk * 9 / 10;
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk).min(audio.len());
        chunks.push(audio[start..end].to_vec());
        if end == audio.len() {
            break;
        }
        start += step;
    }

    let mut chunk_parser = Parser::new(config).unwrap();
    let chunked = chunk_parser
        .parse_chunks(
            &chunks,
            &options,
            &StreamOptions { overlap: 0.1 },
            &mut NoProgress,
        )
        .unwrap();

    assert_eq!(whole.beats.len(), chunked.beats.len());
    for (a, b) in whole.beats.iter().zip(&chunked.beats) {
        assert!(
            (a.timestamp - b.timestamp).abs() <= HOP_SECONDS,
            "{} vs {}",
            a.timestamp,
            b.timestamp
        );
    }
    match (&whole.tempo, &chunked.tempo) {
        (Some(a), Some(b)) => {
            assert!((a.bpm - b.bpm).abs() <= 1., "{} vs {}", a.bpm, b.bpm);
        }
        (a, b) => panic!("tempo mismatch: {a:?} vs {b:?}"),
    }
}

#[test]
fn scenario_quiet_audio_reports_low_signal() {
    let mut parser = Parser::new(ParserConfig {
        // keep the faint clicks faint
        enable_normalization: false,
        ..ParserConfig::default()
    })
    .unwrap();
    let quiet: Vec<f32> = click_track(SR as usize / 2, 5)
        .into_iter()
        .map(|s| s * 0.001)
        .collect();
    let outcome = parser.parse_buffer(quiet, &ParseOptions::default()).unwrap();
    assert!(outcome.metadata.low_signal);
    assert!(outcome.beats.is_empty());
}

#[test]
fn scenario_requested_count_is_a_hard_ceiling() {
    let mut parser = Parser::new(ParserConfig::default()).unwrap();
    let audio = click_track(SR as usize / 2, 10);

    for n in [0usize, 1, 3, 10, 50] {
        let outcome = parser
            .parse_buffer(
                audio.clone(),
                &ParseOptions {
                    target_picture_count: Some(n),
                    ..ParseOptions::default()
                },
            )
            .unwrap();
        assert!(
            outcome.beats.len() <= n,
            "asked for {n}, got {}",
            outcome.beats.len()
        );
    }
}
