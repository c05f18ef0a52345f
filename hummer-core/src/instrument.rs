//! Instrument catalogue: the sounds a recording can be exported with, keyed
//! by id, each mapped to its General MIDI program number.

use serde::Serialize;

/// The instrument used when none is chosen.
pub const DEFAULT_INSTRUMENT: &str = "acoustic_grand_piano";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Instrument {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    /// General MIDI program number (0-based).
    pub midi_program: u8,
}

const fn instrument(
    id: &'static str,
    name: &'static str,
    category: &'static str,
    midi_program: u8,
) -> Instrument {
    Instrument { id, name, category, midi_program }
}

pub static INSTRUMENTS: [Instrument; 19] = [
    // Piano & Keys
    instrument("acoustic_grand_piano", "Grand Piano", "Piano", 0),
    instrument("electric_piano_1", "Electric Piano", "Keys", 4),
    instrument("harpsichord", "Harpsichord", "Keys", 6),
    instrument("rock_organ", "Rock Organ", "Organ", 18),
    // Guitars
    instrument("acoustic_guitar_nylon", "Nylon Guitar", "Guitar", 24),
    instrument("electric_guitar_clean", "Clean Electric", "Guitar", 27),
    instrument("distortion_guitar", "Overdrive Gt", "Guitar", 30),
    // Strings & Orchestral
    instrument("violin", "Violin Solo", "Strings", 40),
    instrument("string_ensemble_1", "String Section", "Orch", 48),
    instrument("cello", "Cello Solo", "Strings", 42),
    instrument("trumpet", "Trumpet", "Brass", 56),
    instrument("alto_sax", "Alto Sax", "Reed", 65),
    // Synth
    instrument("lead_1_square", "Square Lead", "Synth", 80),
    instrument("lead_2_sawtooth", "Saw Lead", "Synth", 81),
    instrument("synth_bass_1", "Analog Bass", "Bass", 38),
    instrument("pad_1_new_age", "New Age Pad", "Atmosphere", 88),
    // Ethnic & Perc
    instrument("sitar", "Sitar", "World", 104),
    instrument("kalimba", "Kalimba", "Perc", 108),
    instrument("marimba", "Marimba", "Perc", 12),
];

pub fn find(id: &str) -> Option<&'static Instrument> {
    INSTRUMENTS.iter().find(|i| i.id == id)
}

/// General MIDI program for an instrument id.
pub fn program_for(id: &str) -> Option<u8> {
    find(id).map(|i| i.midi_program)
}
