// hummer-core/src/lib.rs

//! The core engine for the hum-to-MIDI instrument.
//! This crate turns a microphone signal into a stable monophonic note
//! stream, plays it through a synthesizer voice, records it, replays it
//! and exports it as a Standard MIDI File. It is completely headless
//! and contains no UI code.

pub mod audio;
pub mod collab;
pub mod config;
pub mod error;
pub mod export;
pub mod fft;
pub mod instrument;
pub mod pitch;
pub mod sequence;
pub mod session;
pub mod stabilizer;
pub mod synth;
pub mod tuning;

pub use collab::{AudioCapture, Clock, MonotonicClock, Synthesizer};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use pitch::{estimate_pitch, PitchEstimate};
pub use sequence::{RecordedNote, Sequence};
pub use session::{CaptureMode, NoteChange, Resource, Session, SessionMode};
pub use tuning::{map_to_note, NoteNumber};
