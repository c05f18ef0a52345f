//! # Note Stabilizer Module
//!
//! Turns the tick-by-tick stream of pitch estimates into clean note-open and
//! note-close transitions.
//!
//! ## Behaviour
//! - Median smoothing over the last few voiced frequencies, which rejects
//!   single-frame octave errors better than a mean would
//! - Silence hysteresis: a note survives up to `silence_hold_frames` silent
//!   ticks (breaths, consonants) before it is closed
//! - Minimum duration: notes shorter than `min_note_duration_secs` are
//!   discarded outright, leaving a gap rather than extending a neighbour
//!
//! At most one note is open at any time. Closed notes that meet the minimum
//! duration are appended to the recorder handed to [`Stabilizer::tick`], if
//! any.

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::pitch::{self, PitchEstimate};
use crate::sequence::{RecordedNote, Sequence};
use crate::tuning::{self, NoteNumber};

/// Everything the stabilizer needs to know about one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// RMS volume of the frame.
    pub volume: f32,
    pub estimate: PitchEstimate,
    /// Session-relative time at which the frame begins, in seconds.
    pub start: f64,
    /// Session-relative time at which the frame ends, in seconds.
    pub end: f64,
}

impl Observation {
    /// Builds the observation for a captured frame.
    pub fn from_frame(
        frame: &[f32],
        estimate: PitchEstimate,
        start: f64,
        sample_rate: u32,
    ) -> Self {
        Self {
            volume: pitch::rms(frame),
            estimate,
            start,
            end: start + frame.len() as f64 / sample_rate as f64,
        }
    }
}

/// A note that has just been closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosedNote {
    pub note: RecordedNote,
    /// False when the note was shorter than the minimum duration.
    pub kept: bool,
}

/// The transitions produced by one tick.
///
/// A pitch change yields both a close and an open; the close happened first.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Step {
    pub closed: Option<ClosedNote>,
    pub opened: Option<NoteNumber>,
}

#[derive(Debug, Clone, Copy)]
struct OpenNote {
    note: NoteNumber,
    start: f64,
}

/// Stateful smoother between the pitch estimator and the session.
#[derive(Debug, Default)]
pub struct Stabilizer {
    window: VecDeque<f32>,
    silent_ticks: u32,
    open: Option<OpenNote>,
    last_voiced_end: f64,
}

impl Stabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The note currently held open, if any.
    pub fn current_note(&self) -> Option<NoteNumber> {
        self.open.map(|open| open.note)
    }

    /// Forgets the open note, the silence count and the smoothing window.
    pub fn reset(&mut self) {
        self.window.clear();
        self.silent_ticks = 0;
        self.open = None;
        self.last_voiced_end = 0.0;
    }

    /// Processes one tick.
    ///
    /// # Arguments
    /// * `observation` - Volume, pitch estimate and timing of the tick
    /// * `config` - Current tuning knobs, read once per tick
    /// * `recorder` - Where kept notes are appended; `None` outside recording
    pub fn tick(
        &mut self,
        observation: &Observation,
        config: &EngineConfig,
        recorder: Option<&mut Sequence>,
    ) -> Step {
        let voiced =
            observation.volume >= config.sensitivity && observation.estimate.is_pitched();

        if !voiced {
            self.silent_ticks = self.silent_ticks.saturating_add(1);
            if self.silent_ticks > config.silence_hold_frames {
                self.window.clear();
                if self.open.is_some() {
                    let closed = self.close(self.last_voiced_end, config, recorder);
                    return Step { closed, opened: None };
                }
            }
            return Step::default();
        }

        self.silent_ticks = 0;
        self.last_voiced_end = observation.end;
        self.window.push_back(observation.estimate.frequency_hz);
        while self.window.len() > config.smoothing_window.max(1) {
            self.window.pop_front();
        }
        let note = tuning::map_to_note(self.median(), config.octave_shift);

        match self.open {
            Some(open) if open.note == note => Step::default(),
            Some(_) => {
                let closed = self.close(observation.start, config, recorder);
                self.open_note(note, observation.start);
                Step { closed, opened: Some(note) }
            }
            None => {
                self.open_note(note, observation.start);
                Step { closed: None, opened: Some(note) }
            }
        }
    }

    /// Closes the open note as if silence had outlasted the hold.
    pub fn flush(
        &mut self,
        config: &EngineConfig,
        recorder: Option<&mut Sequence>,
    ) -> Option<ClosedNote> {
        let closed = self.close(self.last_voiced_end, config, recorder);
        self.window.clear();
        self.silent_ticks = 0;
        closed
    }

    fn open_note(&mut self, note: NoteNumber, start: f64) {
        debug!("note on {} at {:.3}s", note, start);
        self.open = Some(OpenNote { note, start });
    }

    fn close(
        &mut self,
        end: f64,
        config: &EngineConfig,
        recorder: Option<&mut Sequence>,
    ) -> Option<ClosedNote> {
        let open = self.open.take()?;
        let note = RecordedNote {
            note: open.note,
            start_time: open.start,
            duration: (end - open.start).max(0.0),
        };

        let mut kept = note.duration >= config.min_note_duration_secs;
        if !kept {
            debug!(
                "discarding {} ({:.3}s shorter than {:.3}s)",
                note.note, note.duration, config.min_note_duration_secs
            );
        } else if let Some(recorder) = recorder {
            if let Err(e) = recorder.push(note) {
                warn!("dropping note {}: {}", note.note, e);
                kept = false;
            }
        }

        debug!("note off {} after {:.3}s", note.note, note.duration);
        Some(ClosedNote { note, kept })
    }

    /// Upper median of the smoothing window.
    fn median(&self) -> f32 {
        let mut sorted: Vec<f32> = self.window.iter().copied().collect();
        sorted.sort_by(f32::total_cmp);
        sorted[sorted.len() / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TICK: f64 = 0.05;
    const C4: f32 = 261.63;
    const E4: f32 = 329.63;

    fn voiced(index: usize, frequency: f32) -> Observation {
        Observation {
            volume: 0.2,
            estimate: PitchEstimate { frequency_hz: frequency, confidence: 0.95 },
            start: index as f64 * TICK,
            end: (index + 1) as f64 * TICK,
        }
    }

    fn quiet(index: usize) -> Observation {
        Observation {
            volume: 0.001,
            estimate: PitchEstimate::SILENT,
            start: index as f64 * TICK,
            end: (index + 1) as f64 * TICK,
        }
    }

    fn note(n: u8) -> NoteNumber {
        NoteNumber::new(n).unwrap()
    }

    #[test]
    fn hysteresis_absorbs_short_gap() {
        let config = EngineConfig {
            silence_hold_frames: 8,
            min_note_duration_secs: 0.1,
            ..Default::default()
        };
        let mut stabilizer = Stabilizer::new();
        let mut sequence = Sequence::new();

        let mut ticks: Vec<Observation> = (0..5).map(|i| voiced(i, C4)).collect();
        ticks.extend((5..7).map(quiet));
        ticks.extend((7..12).map(|i| voiced(i, C4)));

        let mut opens = 0;
        for tick in &ticks {
            let step = stabilizer.tick(tick, &config, Some(&mut sequence));
            assert!(step.closed.is_none());
            opens += step.opened.iter().count();
        }
        assert_eq!(opens, 1);

        stabilizer.flush(&config, Some(&mut sequence));
        assert_eq!(sequence.len(), 1);
        let recorded = sequence.notes()[0];
        assert_eq!(recorded.note, note(60));
        assert!(recorded.start_time.abs() < 1e-12);
        assert!((recorded.duration - 12.0 * TICK).abs() < 1e-9);
    }

    #[test]
    fn short_segment_is_discarded() {
        let config = EngineConfig {
            smoothing_window: 1,
            min_note_duration_secs: 0.2, // longer than 3 ticks
            silence_hold_frames: 2,
            ..Default::default()
        };
        let mut stabilizer = Stabilizer::new();
        let mut sequence = Sequence::new();

        for i in 0..3 {
            stabilizer.tick(&voiced(i, C4), &config, Some(&mut sequence));
        }
        let step = stabilizer.tick(&voiced(3, E4), &config, Some(&mut sequence));
        assert_eq!(step.opened, Some(note(64)));
        let closed = step.closed.unwrap();
        assert_eq!(closed.note.note, note(60));
        assert!(!closed.kept);

        for i in 4..10 {
            stabilizer.tick(&voiced(i, E4), &config, Some(&mut sequence));
        }
        for i in 10..13 {
            stabilizer.tick(&quiet(i), &config, Some(&mut sequence));
        }

        assert_eq!(sequence.len(), 1);
        let recorded = sequence.notes()[0];
        assert_eq!(recorded.note, note(64));
        assert!((recorded.start_time - 3.0 * TICK).abs() < 1e-9);
        assert!((recorded.duration - 7.0 * TICK).abs() < 1e-9);
        assert_eq!(stabilizer.current_note(), None);
    }

    #[test]
    fn silence_past_hold_closes_at_last_voiced_tick() {
        let config = EngineConfig {
            silence_hold_frames: 2,
            min_note_duration_secs: 0.0,
            ..Default::default()
        };
        let mut stabilizer = Stabilizer::new();
        let mut sequence = Sequence::new();

        for i in 0..4 {
            stabilizer.tick(&voiced(i, C4), &config, Some(&mut sequence));
        }
        assert!(stabilizer.tick(&quiet(4), &config, Some(&mut sequence)).closed.is_none());
        assert!(stabilizer.tick(&quiet(5), &config, Some(&mut sequence)).closed.is_none());
        let step = stabilizer.tick(&quiet(6), &config, Some(&mut sequence));
        let closed = step.closed.unwrap();
        assert!(closed.kept);
        assert!((closed.note.duration - 4.0 * TICK).abs() < 1e-9);
        assert_eq!(sequence.len(), 1);
    }

    #[test]
    fn jitter_within_a_semitone_does_not_retrigger() {
        let config = EngineConfig::default();
        let mut stabilizer = Stabilizer::new();
        let mut opens = 0;
        for (i, frequency) in [440.0, 443.0, 437.5, 441.2, 438.9].into_iter().enumerate() {
            let step = stabilizer.tick(&voiced(i, frequency), &config, None);
            assert!(step.closed.is_none());
            opens += step.opened.iter().count();
        }
        assert_eq!(opens, 1);
        assert_eq!(stabilizer.current_note(), Some(note(69)));
    }

    #[test]
    fn median_rejects_single_octave_error() {
        let config = EngineConfig { smoothing_window: 5, ..Default::default() };
        let mut stabilizer = Stabilizer::new();
        for i in 0..4 {
            stabilizer.tick(&voiced(i, 220.0), &config, None);
        }
        let step = stabilizer.tick(&voiced(4, 440.0), &config, None);
        assert_eq!(step, Step::default());
        assert_eq!(stabilizer.current_note(), Some(note(57)));
    }

    #[test]
    fn low_confidence_counts_as_silence() {
        let config = EngineConfig { silence_hold_frames: 0, ..Default::default() };
        let mut stabilizer = Stabilizer::new();
        let mut noisy = voiced(0, 440.0);
        noisy.estimate.confidence = 0.4;
        assert_eq!(stabilizer.tick(&noisy, &config, None), Step::default());
        assert_eq!(stabilizer.current_note(), None);
    }

    #[test]
    fn octave_shift_applies_on_next_tick() {
        let mut config = EngineConfig { smoothing_window: 1, ..Default::default() };
        let mut stabilizer = Stabilizer::new();
        stabilizer.tick(&voiced(0, 440.0), &config, None);
        config.octave_shift = -1;
        let step = stabilizer.tick(&voiced(1, 440.0), &config, None);
        assert_eq!(step.opened, Some(note(57)));
        assert_eq!(step.closed.map(|c| c.note.note), Some(note(69)));
    }

    #[test]
    fn flush_without_open_note_is_noop() {
        let mut stabilizer = Stabilizer::new();
        let mut sequence = Sequence::new();
        assert!(stabilizer.flush(&EngineConfig::default(), Some(&mut sequence)).is_none());
        assert!(sequence.is_empty());
    }

    #[test]
    fn observation_from_frame_measures_volume_and_span() {
        let frame = vec![0.5; 441];
        let observation = Observation::from_frame(&frame, PitchEstimate::SILENT, 1.0, 44_100);
        assert!((observation.volume - 0.5).abs() < 1e-6);
        assert!((observation.end - 1.01).abs() < 1e-9);
    }
}
