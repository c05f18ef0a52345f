//! The sound output handed to the session.

use hummer_core::synth::SineSynth;
use hummer_core::{NoteNumber, Synthesizer};

/// Either the speaker voice or nothing, for commands that only record.
pub enum Voice {
    Sine(SineSynth),
    Mute,
}

impl Synthesizer for Voice {
    fn trigger(&mut self, note: NoteNumber) {
        if let Voice::Sine(synth) = self {
            synth.trigger(note);
        }
    }

    fn silence(&mut self) {
        if let Voice::Sine(synth) = self {
            synth.silence();
        }
    }
}
