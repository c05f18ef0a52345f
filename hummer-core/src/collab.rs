//! # Collaborator Interfaces
//!
//! The session controller drives three external capabilities through these
//! traits: an audio input, a synthesizer, and a clock. The device-backed
//! implementations live in [`crate::audio`] and [`crate::synth`]; tests
//! substitute scripted fakes.

use std::time::Instant;

use crate::tuning::NoteNumber;

/// A source of mono audio frames.
pub trait AudioCapture {
    /// Opens the input and returns its sample rate in Hz.
    ///
    /// Fails when the device is missing, busy, or access is denied.
    fn acquire(&mut self) -> anyhow::Result<u32>;

    /// Returns the next complete frame, or `None` if none is ready yet.
    /// Never blocks.
    fn try_next_frame(&mut self) -> Option<Vec<f32>>;

    /// Samples discarded since the last call because the consumer fell
    /// behind. The count is reset on every call.
    fn take_dropped_samples(&mut self) -> u64 {
        0
    }

    /// Closes the input. Calling it again, or without a prior acquire, does
    /// nothing.
    fn release(&mut self);
}

/// A monophonic sound generator.
pub trait Synthesizer {
    /// Starts sounding `note`, replacing whatever was sounding.
    fn trigger(&mut self, note: NoteNumber);

    /// Stops all sound.
    fn silence(&mut self);
}

/// Seconds on a monotonic timeline.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Wall-clock time since construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
