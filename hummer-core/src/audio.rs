//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! [`CpalCapture`] opens the default input device and streams whole frames of
//! mono samples to the processing loop.
//!
//! ## Features
//! - Automatic audio device selection
//! - Sample rate negotiation around 44.1 kHz
//! - Down-mixing of multi-channel inputs to mono
//! - Bounded frame queue between the audio thread and the processing loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{info, warn};

use crate::collab::AudioCapture;

/// Audio buffer size for processing frames.
///
/// This constant defines the number of samples per audio frame.
/// 2048 samples hold several periods of the lowest vocal pitches while
/// keeping a tick at ~46 ms at 44.1 kHz.
pub const BUFFER_SIZE: usize = 2048;

/// Preferred capture rate in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

/// Frames buffered between the audio callback and the processing loop.
/// When the loop falls behind, newer frames are dropped.
const FRAME_QUEUE_DEPTH: usize = 16;

/// Microphone input backed by the default CPAL input device.
#[derive(Default)]
pub struct CpalCapture {
    stream: Option<cpal::Stream>,
    frames: Option<Receiver<Vec<f32>>>,
    dropped_frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCapture for CpalCapture {
    fn acquire(&mut self) -> Result<u32> {
        if self.stream.is_some() {
            return Ok(self.sample_rate);
        }
        let (sender, receiver) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        self.dropped_frames.store(0, Ordering::Relaxed);
        let (stream, sample_rate) = start_audio_capture(sender, self.dropped_frames.clone())?;
        self.stream = Some(stream);
        self.frames = Some(receiver);
        self.sample_rate = sample_rate;
        Ok(sample_rate)
    }

    fn try_next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.as_ref()?.try_recv().ok()
    }

    fn take_dropped_samples(&mut self) -> u64 {
        self.dropped_frames.swap(0, Ordering::Relaxed) * BUFFER_SIZE as u64
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Properly stop the stream before dropping it
            if let Err(e) = stream.pause() {
                warn!("error pausing input stream: {}", e);
            }
            drop(stream);
            info!("audio input released");
        }
        self.frames = None;
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Starts audio capture from the default input device.
///
/// This function:
/// 1. Selects the default audio input device
/// 2. Negotiates an f32 stream as close to 44.1 kHz as the device allows
/// 3. Sets up a callback that down-mixes to mono and sends whole frames
///
/// # Arguments
/// * `sender` - Channel sender for streaming frames to the processing loop
/// * `dropped_frames` - Incremented for every frame discarded on a full queue
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Audio stream handle and sample rate
/// * `Err(e)` - No device, no usable format, or the stream could not start
pub fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    dropped_frames: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host.default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!("using audio input device: {}", device.name()?);

    let configs = device
        .supported_input_configs()
        .context("Failed to query input configurations")?
        .collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = TARGET_SAMPLE_RATE.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));

    let sample_rate_val = config.sample_rate().0;
    let channels = config.channels().max(1) as usize;
    let config: cpal::StreamConfig = config.into();

    info!("selected sample rate: {} Hz, {} channel(s)", sample_rate_val, channels);

    let err_fn = |err| warn!("an error occurred on the input stream: {}", err);

    // This buffer will accumulate mono audio data from the callback.
    let mut audio_buffer = Vec::with_capacity(BUFFER_SIZE * 2);
    let mut total_dropped = 0u64;

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            audio_buffer.extend(
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
            );

            // While we have enough data for a full frame, send it.
            while audio_buffer.len() >= BUFFER_SIZE {
                let frame_to_send = audio_buffer[..BUFFER_SIZE].to_vec();

                // Send the frame, dropping it if the processing loop is behind.
                if let Err(TrySendError::Full(_)) = sender.try_send(frame_to_send) {
                    dropped_frames.fetch_add(1, Ordering::Relaxed);
                    total_dropped += 1;
                    if total_dropped.is_power_of_two() {
                        warn!("processing loop is behind: {} input frames dropped", total_dropped);
                    }
                }

                audio_buffer.drain(..BUFFER_SIZE);
            }
        },
        err_fn,
        None,
    ).context("Failed to build input stream")?;

    stream.play().context("Failed to start input stream")?;

    Ok((stream, sample_rate_val))
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Prefers 32-bit float configurations with the fewest channels whose rate
/// range is closest to the target.
///
/// # Returns
/// * `Some(config)` - Best matching configuration
/// * `None` - No f32 configuration found
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let rate_distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                (min as i64 - target_rate as i64).abs().min((max as i64 - target_rate as i64).abs())
            };
            (rate_distance, c.channels())
        })
}
