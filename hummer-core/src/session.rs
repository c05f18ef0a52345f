//! # Session Controller Module
//!
//! The session is the sole owner of mutable engine state. It holds the mode
//! (idle, live, recording), the configuration, the recorded sequence, and the
//! token for whichever audio resource is in use, and routes the stabilizer's
//! transitions:
//!
//! - **Live**: every note-open triggers the synthesizer
//! - **Recording**: closed notes land in the sequence through the recorder
//!   handed to the stabilizer
//! - **Idle**: nothing is captured; recorded sequences may be played back
//!
//! Capture and playback are mutually exclusive. The [`Resource`] token
//! records which of the two is held, so neither is ever acquired while the
//! other is live.
//!
//! All methods are meant to be called from one thread, one at a time. Note
//! transitions are published to every channel returned by
//! [`Session::subscribe`].

use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::collab::{AudioCapture, Clock, MonotonicClock, Synthesizer};
use crate::config::{self, EngineConfig};
use crate::error::{EngineError, Result};
use crate::export;
use crate::instrument;
use crate::pitch;
use crate::sequence::{PlaybackAction, ScheduledEvent, Sequence};
use crate::stabilizer::{Observation, Stabilizer, Step};
use crate::tuning::NoteNumber;

/// What the session is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Live,
    Recording,
}

/// The capture modes accepted by [`Session::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Echo each detected note through the synthesizer.
    Live,
    /// Append each detected note to the sequence.
    Recording,
}

impl From<CaptureMode> for SessionMode {
    fn from(mode: CaptureMode) -> Self {
        match mode {
            CaptureMode::Live => SessionMode::Live,
            CaptureMode::Recording => SessionMode::Recording,
        }
    }
}

/// Ownership token for the audio resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    None,
    /// The input is open at the given sample rate.
    Capture { sample_rate: u32 },
    /// A recorded sequence is being played back.
    Playback,
}

/// Published on every note open (`Some`) and close (`None`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteChange {
    pub note: Option<NoteNumber>,
    /// Seconds since the capture session or playback began.
    pub at: f64,
}

/// Mutable state owned by the session.
#[derive(Debug)]
struct SessionState {
    mode: SessionMode,
    resource: Resource,
    sequence: Sequence,
    /// Samples processed since the session's time origin.
    samples_elapsed: u64,
    /// Samples the input discarded since the time origin.
    samples_dropped: u64,
    playback: VecDeque<ScheduledEvent>,
    playback_origin: f64,
    playback_sounding: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: SessionMode::Idle,
            resource: Resource::None,
            sequence: Sequence::new(),
            samples_elapsed: 0,
            samples_dropped: 0,
            playback: VecDeque::new(),
            playback_origin: 0.0,
            playback_sounding: false,
        }
    }
}

/// The capture/playback state machine.
pub struct Session<C, S, K = MonotonicClock> {
    config: EngineConfig,
    state: SessionState,
    stabilizer: Stabilizer,
    capture: C,
    synth: S,
    clock: K,
    observers: Vec<Sender<NoteChange>>,
}

impl<C, S, K> Session<C, S, K>
where
    C: AudioCapture,
    S: Synthesizer,
    K: Clock,
{
    /// Creates an idle session with the default configuration.
    pub fn new(capture: C, synth: S, clock: K) -> Self {
        Self {
            config: EngineConfig::default(),
            state: SessionState::default(),
            stabilizer: Stabilizer::new(),
            capture,
            synth,
            clock,
            observers: Vec::new(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.state.mode
    }

    pub fn resource(&self) -> Resource {
        self.state.resource
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The note currently held open by the stabilizer.
    pub fn current_note(&self) -> Option<NoteNumber> {
        self.stabilizer.current_note()
    }

    /// Whether a playback schedule is still running.
    pub fn is_playing(&self) -> bool {
        self.state.resource == Resource::Playback
    }

    /// Seconds of audio processed since the session's time origin.
    pub fn elapsed(&self) -> f64 {
        match self.state.resource {
            Resource::Capture { sample_rate } => {
                self.state.samples_elapsed as f64 / sample_rate as f64
            }
            _ => 0.0,
        }
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut C {
        &mut self.capture
    }

    pub fn synth(&self) -> &S {
        &self.synth
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Registers a new observer of note transitions.
    pub fn subscribe(&mut self) -> Receiver<NoteChange> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.observers.push(tx);
        rx
    }

    /// Sets the octave transposition, effective from the next tick.
    pub fn set_octave_shift(&mut self, shift: i8) -> Result<()> {
        config::validate_octave_shift(shift)?;
        self.config.octave_shift = shift;
        info!("octave shift set to {shift:+}");
        Ok(())
    }

    /// Sets the volume threshold, effective from the next tick.
    pub fn set_sensitivity(&mut self, sensitivity: f32) -> Result<()> {
        config::validate_sensitivity(sensitivity)?;
        self.config.sensitivity = sensitivity;
        info!("sensitivity set to {sensitivity}");
        Ok(())
    }

    /// Replaces the whole configuration after validating it.
    pub fn set_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Starts capturing in the given mode.
    ///
    /// A running playback is cancelled first. When the input is already
    /// open (switching between live and recording) the open note is closed
    /// under the old mode and the input is kept. On acquisition failure the
    /// session stays as it was and `CaptureUnavailable` is returned.
    pub fn start(&mut self, mode: CaptureMode) -> Result<()> {
        if self.state.resource == Resource::Playback {
            self.stop_playback();
        }

        let sample_rate = match self.state.resource {
            Resource::Capture { sample_rate } => {
                self.finish_open_note();
                if self.state.mode == SessionMode::Live {
                    self.synth.silence();
                }
                sample_rate
            }
            _ => {
                let sample_rate = self
                    .capture
                    .acquire()
                    .map_err(|e| EngineError::CaptureUnavailable(format!("{e:#}")))?;
                if sample_rate == 0 {
                    self.capture.release();
                    return Err(EngineError::CaptureUnavailable(
                        "input reported a sample rate of 0 Hz".to_string(),
                    ));
                }
                self.state.resource = Resource::Capture { sample_rate };
                sample_rate
            }
        };

        self.stabilizer.reset();
        self.state.samples_elapsed = 0;
        self.state.samples_dropped = 0;
        self.capture.take_dropped_samples();
        if mode == CaptureMode::Recording {
            self.state.sequence.clear();
        }
        self.state.mode = mode.into();
        info!("{:?} capture started at {} Hz", self.state.mode, sample_rate);
        Ok(())
    }

    /// Stops capturing and returns to idle.
    ///
    /// An open note is closed as if silence had outlasted the hold, so a
    /// note held at the end of a recording is never lost. No transitions are
    /// published after this returns. In idle it cancels a running playback.
    pub fn stop(&mut self) {
        if self.state.resource == Resource::Playback {
            self.stop_playback();
            return;
        }
        if self.state.mode == SessionMode::Idle {
            return;
        }

        self.finish_open_note();
        if self.state.mode == SessionMode::Live {
            self.synth.silence();
        }
        info!(
            "{:?} capture stopped after {:.2}s ({} notes recorded)",
            self.state.mode,
            self.elapsed(),
            self.state.sequence.len()
        );
        if self.state.samples_dropped > 0 {
            warn!(
                "{} input samples were dropped while the loop was behind",
                self.state.samples_dropped
            );
        }
        self.capture.release();
        self.state.resource = Resource::None;
        self.state.mode = SessionMode::Idle;
    }

    /// Runs one processing tick: analyses every frame the input has ready,
    /// then fires any playback events that have come due.
    pub fn tick(&mut self) {
        if let Resource::Capture { sample_rate } = self.state.resource {
            let dropped = self.capture.take_dropped_samples();
            while let Some(frame) = self.capture.try_next_frame() {
                self.process_frame(&frame, sample_rate);
            }
            // Frames are only dropped on a full queue, so the gap follows
            // the frames that were already queued.
            self.state.samples_elapsed += dropped;
            self.state.samples_dropped += dropped;
        }
        if self.state.resource == Resource::Playback {
            self.advance_playback();
        }
    }

    /// An independent copy of the recorded notes.
    pub fn sequence(&self) -> Sequence {
        self.state.sequence.clone()
    }

    /// Plays a sequence back through the synthesizer, starting now.
    ///
    /// Only allowed while idle; does not change the mode. Progress is made
    /// by subsequent calls to [`Session::tick`].
    pub fn playback(&mut self, sequence: &Sequence) -> Result<()> {
        if self.state.mode != SessionMode::Idle {
            return Err(EngineError::CaptureActive);
        }
        if sequence.is_empty() {
            return Err(EngineError::EmptySequence);
        }
        if self.state.resource == Resource::Playback {
            self.stop_playback();
        }

        let origin = self.clock.now();
        self.state.playback = sequence.schedule(origin).into();
        self.state.playback_origin = origin;
        self.state.resource = Resource::Playback;
        info!(
            "playing back {} notes ({:.2}s)",
            sequence.len(),
            sequence.total_duration()
        );
        self.advance_playback();
        Ok(())
    }

    /// Cancels a running playback and silences the synthesizer.
    pub fn stop_playback(&mut self) {
        if self.state.resource != Resource::Playback {
            return;
        }
        self.state.playback.clear();
        self.synth.silence();
        if self.state.playback_sounding {
            self.state.playback_sounding = false;
            let at = self.clock.now() - self.state.playback_origin;
            self.notify(None, at);
        }
        self.state.resource = Resource::None;
        info!("playback stopped");
    }

    /// Encodes the recorded sequence as a Standard MIDI File.
    ///
    /// # Arguments
    /// * `instrument_id` - An id from [`instrument::INSTRUMENTS`]
    pub fn export_midi(&self, instrument_id: &str) -> Result<Vec<u8>> {
        let program = instrument::program_for(instrument_id).ok_or_else(|| {
            EngineError::InvalidConfig(format!("unknown instrument '{instrument_id}'"))
        })?;
        if self.state.sequence.is_empty() {
            return Err(EngineError::EmptySequence);
        }
        export::sequence_to_midi(&self.state.sequence, program)
    }

    fn process_frame(&mut self, frame: &[f32], sample_rate: u32) {
        let start = self.state.samples_elapsed as f64 / sample_rate as f64;
        let estimate = pitch::estimate_pitch(frame, sample_rate);
        let observation = Observation::from_frame(frame, estimate, start, sample_rate);
        self.state.samples_elapsed += frame.len() as u64;

        let recorder = (self.state.mode == SessionMode::Recording)
            .then_some(&mut self.state.sequence);
        let step = self.stabilizer.tick(&observation, &self.config, recorder);
        self.route(step, observation.start);
    }

    /// Force-closes the open note under the current mode.
    fn finish_open_note(&mut self) {
        let recorder = (self.state.mode == SessionMode::Recording)
            .then_some(&mut self.state.sequence);
        if let Some(closed) = self.stabilizer.flush(&self.config, recorder) {
            self.notify(None, closed.note.end_time());
        }
    }

    fn route(&mut self, step: Step, at: f64) {
        let live = self.state.mode == SessionMode::Live;
        if let Some(closed) = step.closed {
            if live && step.opened.is_none() {
                self.synth.silence();
            }
            self.notify(None, closed.note.end_time());
        }
        if let Some(note) = step.opened {
            if live {
                self.synth.trigger(note);
            }
            self.notify(Some(note), at);
        }
    }

    fn advance_playback(&mut self) {
        let now = self.clock.now();
        while let Some(event) = self.state.playback.front().copied() {
            if event.at > now {
                break;
            }
            self.state.playback.pop_front();
            let at = event.at - self.state.playback_origin;
            match event.action {
                PlaybackAction::Trigger(note) => {
                    self.synth.trigger(note);
                    self.state.playback_sounding = true;
                    self.notify(Some(note), at);
                }
                PlaybackAction::Silence => {
                    self.synth.silence();
                    self.state.playback_sounding = false;
                    self.notify(None, at);
                }
            }
        }
        if self.state.playback.is_empty() {
            self.state.resource = Resource::None;
            info!("playback finished");
        }
    }

    fn notify(&mut self, note: Option<NoteNumber>, at: f64) {
        let change = NoteChange { note, at };
        debug!("note change {:?}", change);
        // Observers whose receiver was dropped are pruned.
        self.observers.retain(|tx| tx.send(change).is_ok());
    }
}
