use criterion::{Criterion, black_box, criterion_group, criterion_main};

use beatgrid_analysis::{
    buffer::AudioBuffer,
    detector::{BeatDetector, DetectorOptions},
    select::SelectionMethod,
};

/// 30 seconds of 120 BPM clicks over a quiet noise floor.
fn click_signal(sample_rate: u32) -> Vec<f32> {
    let len = sample_rate as usize * 30;
    let mut state = 0x2545_f491u32;
    let mut samples: Vec<f32> = (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / 8_388_608. * 0.01 - 0.01
        })
        .collect();
    for i in (0..len).step_by(sample_rate as usize / 2) {
        samples[i] = 1.;
    }
    samples
}

fn bench_detect_beats(c: &mut Criterion) {
    let sample_rate = 44100;
    let buffer = AudioBuffer::new(click_signal(sample_rate), sample_rate).unwrap();
    let detector = BeatDetector::new(sample_rate, DetectorOptions::default()).unwrap();

    c.bench_function("beatgrid-analysis: detector.rs: BeatDetector", |b| {
        b.iter(|| {
            detector
                .detect_beats_simple(black_box(&buffer), Some(16), SelectionMethod::Adaptive)
                .unwrap();
        });
    });
}

criterion_group!(benches, bench_detect_beats);
criterion_main!(benches);
