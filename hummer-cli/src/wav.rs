//! Offline capture: replays a WAV file as if it were the microphone.

use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::{Context, Result};
use hummer_core::audio::BUFFER_SIZE;
use hummer_core::pitch::MIN_FRAME_LEN;
use hummer_core::AudioCapture;

/// Frames from a WAV file, down-mixed to mono.
pub struct WavCapture {
    path: PathBuf,
    frames: VecDeque<Vec<f32>>,
}

impl WavCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), frames: VecDeque::new() }
    }

    /// Frames not yet handed out.
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl AudioCapture for WavCapture {
    fn acquire(&mut self) -> Result<u32> {
        let reader = hound::WavReader::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let (samples, sample_rate) = decode_mono(reader)?;
        self.frames = into_frames(samples);
        Ok(sample_rate)
    }

    fn try_next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.pop_front()
    }

    fn release(&mut self) {
        self.frames.clear();
    }
}

fn decode_mono<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<(Vec<f32>, u32)> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read float samples")?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .context("failed to read int samples")?
        }
    };

    let mono = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Splits samples into capture-sized frames. The last frame keeps its real
/// length so note timing matches the file; a tail too short to analyse is
/// dropped.
fn into_frames(samples: Vec<f32>) -> VecDeque<Vec<f32>> {
    samples
        .chunks(BUFFER_SIZE)
        .filter(|chunk| chunk.len() >= MIN_FRAME_LEN)
        .map(<[f32]>::to_vec)
        .collect()
}
