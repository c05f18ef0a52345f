//! # Sequence Recorder Module
//!
//! Holds the ordered list of notes captured during one recording session.
//! Notes are appended only when the stabilizer closes them, so insertion
//! order is temporal order; the recorder rejects appends that would overlap
//! or go backward in time.
//!
//! ## Features
//! - Ordered, non-overlapping note storage
//! - Independent snapshots for export and playback
//! - Re-scheduling of the notes relative to a playback origin
//! - JSON save/load of a take

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::tuning::NoteNumber;

/// Slack allowed when comparing note boundaries, in seconds.
const TIME_EPSILON: f64 = 1e-9;

/// A closed note of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedNote {
    pub note: NoteNumber,
    /// Onset in seconds, relative to the start of the recording session.
    pub start_time: f64,
    /// Length in seconds.
    pub duration: f64,
}

impl RecordedNote {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// What playback does at a scheduled instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackAction {
    Trigger(NoteNumber),
    Silence,
}

/// One playback action at an absolute clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    pub at: f64,
    pub action: PlaybackAction,
}

/// The ordered notes of one recording session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    notes: Vec<RecordedNote>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a sequence from notes that must already be in temporal order.
    pub fn from_notes(notes: Vec<RecordedNote>) -> Result<Self> {
        let mut sequence = Sequence::new();
        for note in notes {
            sequence.push(note)?;
        }
        Ok(sequence)
    }

    /// Appends a closed note.
    ///
    /// Fails if the note has a negative or non-finite timing, starts before
    /// the previous note ends, or would otherwise break temporal order.
    pub fn push(&mut self, note: RecordedNote) -> Result<()> {
        if !note.start_time.is_finite()
            || !note.duration.is_finite()
            || note.start_time < 0.0
            || note.duration < 0.0
        {
            return Err(EngineError::InvalidSequence(format!(
                "note {} has invalid timing (start {}, duration {})",
                note.note, note.start_time, note.duration
            )));
        }
        if let Some(last) = self.notes.last() {
            if note.start_time + TIME_EPSILON < last.end_time() {
                return Err(EngineError::InvalidSequence(format!(
                    "note {} at {:.3}s overlaps the previous note ending at {:.3}s",
                    note.note,
                    note.start_time,
                    last.end_time()
                )));
            }
        }
        self.notes.push(note);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn notes(&self) -> &[RecordedNote] {
        &self.notes
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordedNote> {
        self.notes.iter()
    }

    /// End time of the last note, 0 for an empty sequence.
    pub fn total_duration(&self) -> f64 {
        self.notes.last().map_or(0.0, RecordedNote::end_time)
    }

    /// Re-schedules every note relative to `origin` (an absolute clock time).
    ///
    /// Each note yields a trigger at its onset and a silence at its end.
    /// When a note ends exactly where the next begins, the silence sorts
    /// first so the following trigger is not cut off.
    pub fn schedule(&self, origin: f64) -> Vec<ScheduledEvent> {
        let mut events: Vec<ScheduledEvent> = self
            .notes
            .iter()
            .flat_map(|n| {
                [
                    ScheduledEvent {
                        at: origin + n.start_time,
                        action: PlaybackAction::Trigger(n.note),
                    },
                    ScheduledEvent {
                        at: origin + n.end_time(),
                        action: PlaybackAction::Silence,
                    },
                ]
            })
            .collect();

        events.sort_by(|a, b| {
            a.at.total_cmp(&b.at).then_with(|| {
                let a_is_silence = a.action == PlaybackAction::Silence;
                let b_is_silence = b.action == PlaybackAction::Silence;
                b_is_silence.cmp(&a_is_silence)
            })
        });
        events
    }

    /// Saves the sequence as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        fs::write(path, json_string)?;
        Ok(())
    }

    /// Loads a sequence from JSON, re-checking its ordering.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let raw: Sequence = serde_json::from_str(&data)?;
        Sequence::from_notes(raw.notes)
    }
}
