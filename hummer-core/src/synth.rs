//! # Sine Voice
//!
//! A single sine oscillator on the default output device. The audio callback
//! reads its target pitch and gate from atomics, so [`Synthesizer::trigger`]
//! and [`Synthesizer::silence`] never block and may be called as often as the
//! stabilizer changes its mind.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use tracing::{info, warn};

use crate::collab::Synthesizer;
use crate::tuning::NoteNumber;

/// Peak output level.
const GAIN: f32 = 0.7;
/// Time for the envelope to reach full level after a trigger.
const ATTACK_SECS: f32 = 0.005;
/// Time for the envelope to fall to zero after a silence.
const RELEASE_SECS: f32 = 0.05;

struct Voice {
    frequency_bits: AtomicU32,
    gate: AtomicBool,
}

impl Voice {
    fn frequency(&self) -> f32 {
        f32::from_bits(self.frequency_bits.load(Ordering::Relaxed))
    }
}

/// Oscillator state owned by the audio thread.
struct Oscillator {
    phase: f32,
    level: f32,
    attack_step: f32,
    release_step: f32,
    sample_rate: f32,
}

impl Oscillator {
    fn new(sample_rate: f32) -> Self {
        Self {
            phase: 0.0,
            level: 0.0,
            attack_step: 1.0 / (ATTACK_SECS * sample_rate),
            release_step: 1.0 / (RELEASE_SECS * sample_rate),
            sample_rate,
        }
    }

    fn next_sample(&mut self, frequency: f32, gate: bool) -> f32 {
        self.level = if gate {
            (self.level + self.attack_step).min(1.0)
        } else {
            (self.level - self.release_step).max(0.0)
        };
        let value = (self.phase * std::f32::consts::TAU).sin() * self.level * GAIN;
        self.phase = (self.phase + frequency / self.sample_rate).fract();
        value
    }
}

/// Monophonic sine synthesizer on the default output device.
pub struct SineSynth {
    voice: Arc<Voice>,
    _stream: cpal::Stream,
}

impl SineSynth {
    /// Opens the default output device and starts a silent stream.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;
        let supported = device
            .default_output_config()
            .context("Failed to query output configuration")?;

        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        info!(
            "using audio output device: {} ({} Hz, {:?})",
            device.name()?,
            config.sample_rate.0,
            sample_format
        );

        let voice = Arc::new(Voice {
            frequency_bits: AtomicU32::new(0f32.to_bits()),
            gate: AtomicBool::new(false),
        });

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, voice.clone())?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, voice.clone())?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, voice.clone())?,
            other => return Err(anyhow!("Unsupported output sample format {other:?}")),
        };
        stream.play().context("Failed to start output stream")?;

        Ok(Self { voice, _stream: stream })
    }
}

impl Synthesizer for SineSynth {
    fn trigger(&mut self, note: NoteNumber) {
        self.voice.frequency_bits.store(note.frequency().to_bits(), Ordering::Relaxed);
        self.voice.gate.store(true, Ordering::Release);
    }

    fn silence(&mut self) {
        self.voice.gate.store(false, Ordering::Release);
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    voice: Arc<Voice>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut oscillator = Oscillator::new(config.sample_rate.0 as f32);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let gate = voice.gate.load(Ordering::Acquire);
            let frequency = voice.frequency();
            for frame in data.chunks_mut(channels) {
                let value = T::from_sample(oscillator.next_sample(frequency, gate));
                frame.fill(value);
            }
        },
        |err| warn!("an error occurred on the output stream: {}", err),
        None,
    ).context("Failed to build output stream")?;

    Ok(stream)
}
