//! Drives a `Session` end to end with scripted collaborators, so no audio
//! hardware is needed.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use hummer_core::audio::BUFFER_SIZE;
use hummer_core::{
    export, AudioCapture, CaptureMode, Clock, EngineError, NoteChange, NoteNumber,
    RecordedNote, Resource, Sequence, Session, SessionMode, Synthesizer,
};
use pretty_assertions::assert_eq;

const SAMPLE_RATE: u32 = 44_100;

/// Capture that replays a queue of frames.
#[derive(Default)]
struct ScriptedCapture {
    frames: VecDeque<Vec<f32>>,
    dropped: u64,
    fail: bool,
    acquired: usize,
    released: usize,
}

impl ScriptedCapture {
    fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }
}

impl AudioCapture for ScriptedCapture {
    fn acquire(&mut self) -> anyhow::Result<u32> {
        if self.fail {
            anyhow::bail!("permission denied");
        }
        self.acquired += 1;
        Ok(SAMPLE_RATE)
    }

    fn try_next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.pop_front()
    }

    fn take_dropped_samples(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }

    fn release(&mut self) {
        self.released += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SynthEvent {
    Trigger(u8),
    Silence,
}

#[derive(Default)]
struct RecordingSynth {
    events: Vec<SynthEvent>,
}

impl Synthesizer for RecordingSynth {
    fn trigger(&mut self, note: NoteNumber) {
        self.events.push(SynthEvent::Trigger(note.as_u8()));
    }

    fn silence(&mut self) {
        self.events.push(SynthEvent::Silence);
    }
}

/// A clock the test advances by hand.
#[derive(Clone, Default)]
struct ManualClock(Rc<Cell<f64>>);

impl ManualClock {
    fn set(&self, seconds: f64) {
        self.0.set(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.0.get()
    }
}

type TestSession = Session<ScriptedCapture, RecordingSynth, ManualClock>;

fn session_with(capture: ScriptedCapture) -> (TestSession, ManualClock) {
    let clock = ManualClock::default();
    (Session::new(capture, RecordingSynth::default(), clock.clone()), clock)
}

/// `count` consecutive frames of a sine at `frequency`.
fn tone(frequency: f32, count: usize) -> Vec<Vec<f32>> {
    let step = frequency / SAMPLE_RATE as f32;
    (0..count)
        .map(|f| {
            (0..BUFFER_SIZE)
                .map(|i| {
                    let n = (f * BUFFER_SIZE + i) as f32;
                    0.5 * (2.0 * std::f32::consts::PI * (step * n).fract()).sin()
                })
                .collect()
        })
        .collect()
}

fn silence(count: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; BUFFER_SIZE]; count]
}

fn feed(session: &mut TestSession, frames: Vec<Vec<f32>>) {
    session.capture_mut().frames.extend(frames);
    session.tick();
}

fn note(n: u8) -> NoteNumber {
    NoteNumber::new(n).unwrap()
}

#[test]
fn stop_closes_the_held_note() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.start(CaptureMode::Recording).unwrap();
    feed(&mut session, tone(440.0, 10));
    assert_eq!(session.current_note(), Some(note(69)));
    assert!(session.sequence().is_empty());

    session.stop();

    let sequence = session.sequence();
    assert_eq!(sequence.len(), 1);
    let recorded = sequence.notes()[0];
    assert_eq!(recorded.note, note(69));
    assert_eq!(recorded.start_time, 0.0);
    let expected = (10 * BUFFER_SIZE) as f64 / SAMPLE_RATE as f64;
    assert!((recorded.duration - expected).abs() < 1e-9);

    assert_eq!(session.mode(), SessionMode::Idle);
    assert_eq!(session.resource(), Resource::None);
    assert_eq!(session.capture().released, 1);
}

#[test]
fn dropped_input_still_advances_time() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.start(CaptureMode::Recording).unwrap();

    session.capture_mut().dropped = 3 * BUFFER_SIZE as u64;
    feed(&mut session, tone(440.0, 2));
    let frame_secs = BUFFER_SIZE as f64 / SAMPLE_RATE as f64;
    assert!((session.elapsed() - 5.0 * frame_secs).abs() < 1e-9);

    feed(&mut session, tone(440.0, 2));
    session.stop();

    let sequence = session.sequence();
    assert_eq!(sequence.len(), 1);
    assert!((sequence.notes()[0].duration - 7.0 * frame_secs).abs() < 1e-9);
}

#[test]
fn recording_captures_separate_notes() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.start(CaptureMode::Recording).unwrap();
    feed(&mut session, tone(440.0, 8));
    feed(&mut session, silence(8));
    feed(&mut session, tone(659.26, 8));
    session.stop();

    let notes: Vec<u8> = session.sequence().iter().map(|n| n.note.as_u8()).collect();
    assert_eq!(notes, vec![69, 76]);
    let sequence = session.sequence();
    assert!(sequence.notes()[0].end_time() <= sequence.notes()[1].start_time);
}

#[test]
fn playback_rejected_while_recording() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.start(CaptureMode::Recording).unwrap();
    feed(&mut session, tone(440.0, 4));

    let other = Sequence::from_notes(vec![RecordedNote {
        note: note(60),
        start_time: 0.0,
        duration: 0.5,
    }])
    .unwrap();
    assert!(matches!(session.playback(&other), Err(EngineError::CaptureActive)));

    assert_eq!(session.mode(), SessionMode::Recording);
    assert_eq!(session.resource(), Resource::Capture { sample_rate: SAMPLE_RATE });
    assert_eq!(session.current_note(), Some(note(69)));
    assert!(session.synth().events.is_empty());
}

#[test]
fn capture_failure_leaves_state_unchanged() {
    let (mut session, _) = session_with(ScriptedCapture::failing());
    let err = session.start(CaptureMode::Live).unwrap_err();
    assert!(matches!(err, EngineError::CaptureUnavailable(ref msg) if msg.contains("permission denied")));
    assert_eq!(session.mode(), SessionMode::Idle);
    assert_eq!(session.resource(), Resource::None);
    assert_eq!(session.capture().released, 0);
}

#[test]
fn invalid_octave_shift_keeps_previous_value() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.set_octave_shift(1).unwrap();
    assert!(matches!(session.set_octave_shift(5), Err(EngineError::InvalidConfig(_))));
    assert_eq!(session.config().octave_shift, 1);

    assert!(session.set_sensitivity(-0.5).is_err());
    assert_eq!(session.config().sensitivity, 0.01);
}

#[test]
fn octave_shift_applies_from_next_tick() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.start(CaptureMode::Live).unwrap();
    feed(&mut session, tone(440.0, 3));
    session.set_octave_shift(1).unwrap();
    // The smoothing window still holds the same frequency, so only the
    // mapping changes.
    feed(&mut session, tone(440.0, 1));
    assert_eq!(session.current_note(), Some(note(81)));
}

#[test]
fn live_mode_drives_the_synth() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.start(CaptureMode::Live).unwrap();
    feed(&mut session, tone(440.0, 6));
    feed(&mut session, silence(6));
    session.stop();

    assert_eq!(
        session.synth().events,
        vec![SynthEvent::Trigger(69), SynthEvent::Silence, SynthEvent::Silence]
    );
    // Live mode never records.
    assert!(session.sequence().is_empty());
}

#[test]
fn observers_see_open_and_close() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    let changes = session.subscribe();
    let dropped = session.subscribe();
    drop(dropped);

    session.start(CaptureMode::Recording).unwrap();
    feed(&mut session, tone(440.0, 6));
    session.stop();

    let received: Vec<NoteChange> = changes.try_iter().collect();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].note, Some(note(69)));
    assert_eq!(received[0].at, 0.0);
    assert_eq!(received[1].note, None);
    assert!(received[1].at > 0.0);
}

#[test]
fn playback_follows_the_clock() {
    let (mut session, clock) = session_with(ScriptedCapture::default());
    clock.set(100.0);
    let sequence = Sequence::from_notes(vec![
        RecordedNote { note: note(60), start_time: 0.0, duration: 0.5 },
        RecordedNote { note: note(64), start_time: 0.5, duration: 0.5 },
    ])
    .unwrap();

    session.playback(&sequence).unwrap();
    assert!(session.is_playing());
    assert_eq!(session.mode(), SessionMode::Idle);
    assert_eq!(session.synth().events, vec![SynthEvent::Trigger(60)]);

    clock.set(100.5);
    session.tick();
    assert_eq!(
        session.synth().events,
        vec![SynthEvent::Trigger(60), SynthEvent::Silence, SynthEvent::Trigger(64)]
    );

    clock.set(101.0);
    session.tick();
    assert!(!session.is_playing());
    assert_eq!(session.resource(), Resource::None);
    assert_eq!(session.synth().events.last(), Some(&SynthEvent::Silence));
}

#[test]
fn start_cancels_playback() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    let sequence = Sequence::from_notes(vec![RecordedNote {
        note: note(60),
        start_time: 0.0,
        duration: 2.0,
    }])
    .unwrap();
    session.playback(&sequence).unwrap();

    session.start(CaptureMode::Live).unwrap();
    assert_eq!(session.resource(), Resource::Capture { sample_rate: SAMPLE_RATE });
    assert_eq!(
        session.synth().events,
        vec![SynthEvent::Trigger(60), SynthEvent::Silence]
    );
}

#[test]
fn empty_sequence_is_rejected() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    assert!(matches!(session.playback(&Sequence::new()), Err(EngineError::EmptySequence)));
    assert!(matches!(
        session.export_midi("acoustic_grand_piano"),
        Err(EngineError::EmptySequence)
    ));
    assert_eq!(session.resource(), Resource::None);
}

#[test]
fn export_round_trips_the_recording() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.start(CaptureMode::Recording).unwrap();
    feed(&mut session, tone(440.0, 8));
    feed(&mut session, silence(8));
    feed(&mut session, tone(523.25, 8));
    session.stop();

    assert!(matches!(session.export_midi("theremin"), Err(EngineError::InvalidConfig(_))));

    let bytes = session.export_midi("violin").unwrap();
    let decoded = export::midi_to_sequence(&bytes).unwrap();
    let recorded = session.sequence();
    assert_eq!(decoded.len(), recorded.len());
    let tick = export::tick_duration();
    for (a, b) in decoded.iter().zip(recorded.iter()) {
        assert_eq!(a.note, b.note);
        assert!((a.start_time - b.start_time).abs() <= tick);
        assert!((a.duration - b.duration).abs() <= tick);
    }
}

#[test]
fn switching_modes_closes_the_note() {
    let (mut session, _) = session_with(ScriptedCapture::default());
    session.start(CaptureMode::Recording).unwrap();
    feed(&mut session, tone(440.0, 8));

    session.start(CaptureMode::Live).unwrap();
    assert_eq!(session.mode(), SessionMode::Live);
    assert_eq!(session.current_note(), None);
    assert_eq!(session.capture().acquired, 1);
    assert_eq!(session.sequence().len(), 1);

    // Recording again starts from an empty sequence.
    session.start(CaptureMode::Recording).unwrap();
    assert!(session.sequence().is_empty());
    session.stop();
    assert_eq!(session.capture().released, 1);
}
