//! # Musical Tuning Module
//!
//! This module maps detected frequencies onto the 128 note numbers of
//! twelve-tone equal temperament (A4 = note 69 = 440 Hz) and provides note
//! names and reference frequencies for display and synthesis.
//!
//! ## Features
//! - Frequency to note number quantization with octave transposition
//! - Range clamping to [0, 127]
//! - Note number to name ("C#4") and frequency lookups

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference pitch of A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;

/// Note number of A4.
pub const A4_NOTE: i32 = 69;

/// Highest valid note number.
pub const MAX_NOTE: u8 = 127;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A quantized musical pitch in `[0, 127]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NoteNumber(u8);

impl NoteNumber {
    /// Returns `None` for values above 127.
    pub fn new(value: u8) -> Option<Self> {
        (value <= MAX_NOTE).then_some(Self(value))
    }

    /// Clamps any integer into the valid range.
    pub fn saturating(value: i32) -> Self {
        Self(value.clamp(0, MAX_NOTE as i32) as u8)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Name with octave, e.g. "A4".
    pub fn name(self) -> &'static str {
        &NOTES[self.0 as usize].name
    }

    /// Equal-temperament frequency in Hz.
    pub fn frequency(self) -> f32 {
        NOTES[self.0 as usize].frequency
    }
}

impl TryFrom<u8> for NoteNumber {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NoteNumber::new(value).ok_or_else(|| format!("note number {value} is above {MAX_NOTE}"))
    }
}

impl From<NoteNumber> for u8 {
    fn from(note: NoteNumber) -> u8 {
        note.0
    }
}

impl fmt::Display for NoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Represents a single musical note with its name and frequency.
#[derive(Debug, Clone)]
struct Note {
    name: String,
    frequency: f32,
}

/// Statically computed names and frequencies for all 128 note numbers.
static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    (0..=MAX_NOTE as i32)
        .map(|n| {
            let frequency = A4_FREQUENCY * 2.0_f32.powf((n - A4_NOTE) as f32 / 12.0);
            // Note 0 is C-1; the octave number changes at C.
            let name = format!("{}{}", NOTE_NAMES[(n % 12) as usize], n / 12 - 1);
            Note { name, frequency }
        })
        .collect()
});

/// Converts a frequency into a note number.
///
/// `round(12 * log2(f / 440) + 69) + 12 * octave_shift`, clamped to
/// `[0, 127]`.
///
/// # Arguments
/// * `frequency_hz` - Detected frequency; must be positive. Callers filter
///   unpitched frames before mapping.
/// * `octave_shift` - Transposition in octaves
pub fn map_to_note(frequency_hz: f32, octave_shift: i8) -> NoteNumber {
    debug_assert!(
        frequency_hz.is_finite() && frequency_hz > 0.0,
        "map_to_note called with {frequency_hz} Hz"
    );
    let semitones = 12.0 * (frequency_hz / A4_FREQUENCY).log2() + A4_NOTE as f32;
    // Non-finite input (release builds) lands on the nearest range edge.
    let midi = if semitones.is_finite() {
        semitones.round() as i32
    } else if semitones > 0.0 {
        MAX_NOTE as i32
    } else {
        0
    };
    NoteNumber::saturating(midi + 12 * octave_shift as i32)
}
