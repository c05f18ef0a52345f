//! # Fast Fourier Transform (FFT) Module
//!
//! This module provides the FFT-based building blocks of the pitch estimator.
//! The autocorrelation of a frame is computed in the frequency domain
//! (Wiener-Khinchin theorem), which turns an O(n^2) lag scan into two
//! transforms of a zero-padded buffer.
//!
//! ## Features
//! - High-performance FFT using RustFFT
//! - DC offset removal for accurate analysis
//! - Linear (non-circular) autocorrelation through zero padding

use rustfft::{num_complex::Complex, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset biases every autocorrelation lag by the same constant and
/// can hide the periodic structure of a quiet voice. This function centers
/// the signal around zero before analysis.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 { return; }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Computes the linear autocorrelation of a signal.
///
/// The signal is zero-padded to at least twice its length so that the
/// circular correlation produced by the FFT equals the linear one for every
/// lag in `0..signal.len()`.
///
/// # Arguments
/// * `signal` - Input audio signal
///
/// # Returns
/// * `Vec<f32>` - `r[tau] = sum(signal[i] * signal[i + tau])` for each lag
pub fn autocorrelation(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let size = (2 * n).next_power_of_two();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(size);
    let ifft = planner.plan_fft_inverse(size);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&sample| Complex { re: sample, im: 0.0 })
        .chain(std::iter::repeat(Complex { re: 0.0, im: 0.0 }))
        .take(size)
        .collect();

    fft.process(&mut buffer);
    // Power spectrum: X * conj(X)
    for bin in buffer.iter_mut() {
        *bin = Complex { re: bin.norm_sqr(), im: 0.0 };
    }
    ifft.process(&mut buffer);

    // RustFFT does not normalize the inverse transform.
    let scale = 1.0 / size as f32;
    buffer.iter().take(n).map(|c| c.re * scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_autocorrelation(signal: &[f32]) -> Vec<f32> {
        (0..signal.len())
            .map(|tau| {
                signal
                    .iter()
                    .zip(&signal[tau..])
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect()
    }

    #[test]
    fn matches_direct_computation() {
        let signal: Vec<f32> = (0..300)
            .map(|i| ((i as f32) * 0.37).sin() + 0.25 * ((i as f32) * 1.3).cos())
            .collect();
        let fast = autocorrelation(&signal);
        let slow = direct_autocorrelation(&signal);
        assert_eq!(fast.len(), slow.len());
        for (tau, (f, s)) in fast.iter().zip(&slow).enumerate() {
            assert!((f - s).abs() < 1e-2, "lag {tau}: fft {f} vs direct {s}");
        }
    }

    #[test]
    fn empty_signal_has_no_lags() {
        assert!(autocorrelation(&[]).is_empty());
    }

    #[test]
    fn dc_offset_is_removed() {
        let mut signal = vec![1.5, 2.5, 1.5, 2.5];
        remove_dc_offset(&mut signal);
        assert_eq!(signal, vec![-0.5, 0.5, -0.5, 0.5]);
    }
}
