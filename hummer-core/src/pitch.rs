//! # Pitch Detection Module
//!
//! This module implements the per-frame pitch estimator used for voice and
//! whistle transcription. It is a pure function of its input: the same frame
//! always yields the same estimate.
//!
//! ## Features
//! - Energy gate that short-circuits near-silent frames
//! - Normalized autocorrelation (NSDF) computed through the FFT
//! - First-strong-peak picking to avoid octave errors
//! - Parabolic interpolation for sub-sample accuracy
//!
//! The estimator reports a frequency together with a confidence score; it
//! does not decide whether a frame is voiced. That decision belongs to the
//! stabilizer, which compares the confidence against [`CONFIDENCE_GATE`].

use serde::{Deserialize, Serialize};

use crate::fft;

/// RMS level below which a frame is reported as silent without analysis.
/// This is a numerical guard, not the user-facing sensitivity.
pub const ENERGY_FLOOR: f32 = 1e-4;

/// Highest correlation peak that still counts as "no pitch".
pub const MIN_CORRELATION: f32 = 0.3;

/// A peak qualifies as the fundamental once it reaches this fraction of the
/// highest peak in the lag range.
pub const PEAK_RATIO: f32 = 0.9;

/// Confidence a voiced frame must reach to be treated as a note.
pub const CONFIDENCE_GATE: f32 = 0.8;

/// Lowest frequency of the vocal/whistle band.
pub const MIN_FREQUENCY_HZ: f32 = 80.0;

/// Highest frequency of the vocal/whistle band.
pub const MAX_FREQUENCY_HZ: f32 = 2000.0;

/// Shortest frame the estimator accepts.
pub const MIN_FRAME_LEN: usize = 64;

/// The result of analysing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Estimated fundamental frequency in Hz, 0 when no pitch was found.
    pub frequency_hz: f32,
    /// Normalized peak correlation in `[0, 1]`.
    pub confidence: f32,
}

impl PitchEstimate {
    /// "No discernible pitch".
    pub const SILENT: PitchEstimate = PitchEstimate {
        frequency_hz: 0.0,
        confidence: 0.0,
    };

    /// Whether the estimate passes the built-in quality gate.
    pub fn is_pitched(&self) -> bool {
        self.frequency_hz > 0.0 && self.confidence >= CONFIDENCE_GATE
    }
}

/// Root-mean-square amplitude of a frame.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Estimates the fundamental frequency of a single frame.
///
/// # Arguments
/// * `signal` - One audio frame, at least [`MIN_FRAME_LEN`] samples
/// * `sample_rate` - Sample rate in Hz
///
/// # Returns
/// * A [`PitchEstimate`]; [`PitchEstimate::SILENT`] for near-silent frames or
///   frames without any usable correlation peak
///
/// # Panics
/// * If the frame is shorter than [`MIN_FRAME_LEN`] or the sample rate is 0.
///   Both are wiring errors, not runtime conditions.
pub fn estimate_pitch(signal: &[f32], sample_rate: u32) -> PitchEstimate {
    assert!(
        signal.len() >= MIN_FRAME_LEN,
        "Input frame must hold at least {MIN_FRAME_LEN} samples, got {}",
        signal.len()
    );
    assert!(sample_rate > 0, "Sample rate must be positive");

    // --- Energy gate ---
    if rms(signal) < ENERGY_FLOOR {
        return PitchEstimate::SILENT;
    }

    let mut centered = signal.to_vec();
    fft::remove_dc_offset(&mut centered);
    let nsdf = normalized_square_difference(&centered);

    let frame_size = centered.len();
    let min_lag = ((sample_rate as f32 / MAX_FREQUENCY_HZ).floor() as usize).max(2);
    let max_lag = ((sample_rate as f32 / MIN_FREQUENCY_HZ).ceil() as usize).min(frame_size / 2);

    // --- Skip the zero-lag lobe ---
    let lobe_end = nsdf
        .iter()
        .skip(1)
        .position(|&v| v <= 0.0)
        .map_or(nsdf.len(), |i| i + 1);
    let start = lobe_end.max(min_lag);
    if start >= max_lag {
        return PitchEstimate::SILENT;
    }

    // --- Quality gate on the highest peak ---
    let highest = nsdf[start..=max_lag]
        .iter()
        .cloned()
        .fold(f32::NEG_INFINITY, f32::max);
    if highest < MIN_CORRELATION {
        return PitchEstimate::SILENT;
    }

    // --- First strong peak ---
    let threshold = highest * PEAK_RATIO;
    let period = (start..=max_lag)
        .find(|&tau| {
            nsdf[tau] >= threshold && nsdf[tau] >= nsdf[tau - 1] && nsdf[tau] > nsdf[tau + 1]
        })
        .or_else(|| (start..=max_lag).find(|&tau| nsdf[tau] == highest))
        .unwrap_or(start);

    // --- Parabolic interpolation ---
    let y1 = nsdf[period - 1];
    let y2 = nsdf[period];
    let y3 = nsdf[period + 1];
    let denominator = y1 - 2.0 * y2 + y3;
    let shift = if denominator.abs() > 1e-9 {
        (0.5 * (y1 - y3) / denominator).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let refined_lag = period as f32 + shift;
    let peak = y2 - 0.25 * (y1 - y3) * shift;

    let frequency = sample_rate as f32 / refined_lag;
    if !frequency.is_finite() || frequency <= 0.0 {
        return PitchEstimate::SILENT;
    }

    PitchEstimate {
        frequency_hz: frequency,
        confidence: peak.clamp(0.0, 1.0),
    }
}

/// Normalized square difference function of a centered frame.
///
/// `n(tau) = 2 r(tau) / m(tau)` where `m(tau)` is the energy of the two
/// overlapping sections. Values lie in `[-1, 1]`; a perfectly periodic signal
/// reaches 1 at multiples of its period.
fn normalized_square_difference(signal: &[f32]) -> Vec<f32> {
    let frame_size = signal.len();
    let acf = fft::autocorrelation(signal);

    let mut nsdf = vec![0.0; frame_size];
    let mut m = 2.0 * acf[0];
    for tau in 0..frame_size {
        if tau > 0 {
            let leaving_tail = signal[frame_size - tau];
            let leaving_head = signal[tau - 1];
            m -= leaving_tail * leaving_tail + leaving_head * leaving_head;
        }
        nsdf[tau] = if m > f32::EPSILON { 2.0 * acf[tau] / m } else { 0.0 };
    }
    nsdf
}
