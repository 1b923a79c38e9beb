//! End-to-end tests driving the pipeline and the listening session with
//! synthesized audio.

use std::f32::consts::PI;
use std::time::{Duration, Instant};

use tuner_core::smoothing::{GateDecision, BLANKING_FRAMES};
use tuner_core::tuning::preset;
use tuner_core::{
    frame_channel, Framer, ListeningSession, PipelineConstants, TunerConfig, TunerFrame,
    TunerPipeline, TuningStatus,
};

const SR: u32 = 44_100;
const N: usize = 4096;
const HOP: usize = 1024;

/// Continuous sine sliced into overlapping buffers, as the capture side does.
fn sine_frames(freq: f32, amplitude: f32, count: usize) -> Vec<Vec<f32>> {
    let total = N + HOP * (count - 1);
    let signal: Vec<f32> = (0..total)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SR as f32).sin())
        .collect();
    let mut framer = Framer::new(N, HOP);
    framer.push(&signal)
}

fn silent_frames(count: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; N]; count]
}

fn guitar() -> TunerConfig {
    TunerConfig {
        tuning: preset("guitar-standard").expect("guitar preset"),
        ..TunerConfig::default()
    }
}

fn run(pipeline: &mut TunerPipeline, frames: &[Vec<f32>]) -> Vec<TunerFrame> {
    frames
        .iter()
        .map(|f| pipeline.process(f).expect("well-formed buffer"))
        .collect()
}

#[test]
fn silence_then_a_string_then_silence() {
    let mut pipeline = TunerPipeline::new(guitar()).unwrap();
    let constants = PipelineConstants::default();
    let hold = constants.in_tune_hold_frames();

    let before = run(&mut pipeline, &silent_frames(10));
    for frame in &before {
        assert_eq!(frame.status, TuningStatus::Silent);
        assert!(frame.note.is_none());
        assert!(frame.chord.is_none());
    }

    let tone = run(&mut pipeline, &sine_frames(110.0, 0.5, hold + 20));
    assert_eq!(tone[0].gate, GateDecision::Onset);
    let blanked = tone
        .iter()
        .take_while(|f| f.gate != GateDecision::Process)
        .count();
    assert_eq!(blanked, BLANKING_FRAMES);
    for frame in &tone[..blanked] {
        assert_eq!(frame.status, TuningStatus::Silent);
    }

    for frame in &tone[blanked..] {
        assert_eq!(frame.note_label(), "A2");
        let string = frame.string_match.as_ref().expect("string match");
        assert_eq!(string.string_index, 1);
        assert_eq!(string.string_name, "A2");
        let cents = frame.cents.unwrap();
        assert!(cents.abs() < 3.0, "cents {cents}");
        assert_eq!(frame.status, TuningStatus::InTune);
        assert!(frame.confidence > 0.8);
    }

    let flips: Vec<usize> = tone
        .windows(2)
        .enumerate()
        .filter(|(_, w)| !w[0].tuned_strings[1] && w[1].tuned_strings[1])
        .map(|(i, _)| i + 1)
        .collect();
    assert_eq!(flips.len(), 1, "tuned flag must flip exactly once");
    assert_eq!(flips[0], blanked + hold - 1);
    assert_eq!(
        tone.last().unwrap().tuned_strings,
        vec![false, true, false, false, false, false]
    );

    let after = run(&mut pipeline, &silent_frames(30));
    assert!(after[0].held);
    assert_eq!(after[0].note_label(), "A2");
    let last = after.last().unwrap();
    assert!(!last.held);
    assert_eq!(last.status, TuningStatus::Silent);
    assert!(last.note.is_none());
    assert!(last.tuned_strings[1]);
}

#[test]
fn hysteresis_keeps_the_string_between_targets() {
    // Midway between G3 (196 Hz) and B3 (246.9 Hz) sits A3.
    let mut pipeline = TunerPipeline::new(guitar()).unwrap();
    let g3 = run(&mut pipeline, &sine_frames(196.0, 0.5, 6));
    assert_eq!(g3.last().unwrap().string_match.as_ref().unwrap().string_index, 3);

    // A little sharp of the midpoint: nominally closer to B3, within hysteresis.
    let mid = 196.0 * 2.0_f32.powf(2.0 / 12.0 + 0.01 / 12.0);
    let frames = run(&mut pipeline, &sine_frames(mid, 0.5, 10));
    let last = frames.last().unwrap();
    assert_eq!(last.string_match.as_ref().unwrap().string_index, 3);
}

#[test]
fn session_processes_captured_audio() {
    let (sender, receiver) = frame_channel(8);
    let config = TunerConfig {
        chord_detection: false,
        ..TunerConfig::default()
    };
    let session = ListeningSession::spawn(TunerPipeline::new(config).unwrap(), receiver).unwrap();

    for frame in sine_frames(392.0, 0.4, 20) {
        sender.send(frame);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = None;
    while Instant::now() < deadline {
        match session.updates().recv_timeout(Duration::from_millis(100)) {
            Ok(frame) if frame.gate == GateDecision::Process => {
                seen = Some(frame);
                break;
            }
            _ => {}
        }
    }
    let frame = seen.expect("a processed frame");
    assert_eq!(frame.note_label(), "G4");
    assert_eq!(frame.string_match.as_ref().unwrap().string_index, 0);
    assert!(session.snapshot().is_some());

    session.reset().unwrap();
    session.stop();
}
