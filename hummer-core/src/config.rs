//! # Engine Configuration
//!
//! Live-tunable parameters read by the stabilizer and the note mapper on
//! every tick. The configuration can be loaded from a JSON file; missing
//! fields fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EngineError, Result};

/// Lowest accepted octave transposition.
pub const MIN_OCTAVE_SHIFT: i8 = -2;
/// Highest accepted octave transposition.
pub const MAX_OCTAVE_SHIFT: i8 = 2;

/// Tuning knobs for the stabilizer and note mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transposition in octaves applied to every detected note.
    pub octave_shift: i8,
    /// Minimum RMS volume for a frame to count as voiced.
    pub sensitivity: f32,
    /// Notes shorter than this are discarded instead of recorded.
    pub min_note_duration_secs: f64,
    /// Consecutive silent ticks tolerated before a note is closed.
    pub silence_hold_frames: u32,
    /// Number of frequencies kept for median smoothing.
    pub smoothing_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            octave_shift: 0,
            sensitivity: 0.01,
            min_note_duration_secs: 0.08,
            silence_hold_frames: 4,
            smoothing_window: 5,
        }
    }
}

impl EngineConfig {
    /// Checks every field against its accepted range.
    pub fn validate(&self) -> Result<()> {
        validate_octave_shift(self.octave_shift)?;
        validate_sensitivity(self.sensitivity)?;
        if !self.min_note_duration_secs.is_finite() || self.min_note_duration_secs < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "minimum note duration must be a non-negative number of seconds, got {}",
                self.min_note_duration_secs
            )));
        }
        if self.smoothing_window == 0 {
            return Err(EngineError::InvalidConfig(
                "smoothing window must hold at least one frame".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        fs::write(path, json_string)?;
        Ok(())
    }
}

pub(crate) fn validate_octave_shift(shift: i8) -> Result<()> {
    if (MIN_OCTAVE_SHIFT..=MAX_OCTAVE_SHIFT).contains(&shift) {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "octave shift must be within [{MIN_OCTAVE_SHIFT}, {MAX_OCTAVE_SHIFT}], got {shift}"
        )))
    }
}

pub(crate) fn validate_sensitivity(sensitivity: f32) -> Result<()> {
    if sensitivity.is_finite() && sensitivity > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "sensitivity must be a positive volume threshold, got {sensitivity}"
        )))
    }
}
