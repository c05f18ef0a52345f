//! # Sequence Export Module
//!
//! Serializes a recorded [`Sequence`] to a Standard MIDI File and reads one
//! back. Export writes a single track (format 0) at 480 ticks per quarter
//! note and 120 BPM, so every time is quantized to 1/960 s.
//!
//! Import accepts any metrical or timecode file, honours tempo changes, and
//! reduces overlapping notes to a monophonic line by trimming each note at
//! the next onset.

use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::sequence::{RecordedNote, Sequence};
use crate::tuning::NoteNumber;

/// Ticks per quarter note of exported files.
pub const PPQ: u16 = 480;

/// Microseconds per quarter note of exported files (120 BPM).
pub const TEMPO_US_PER_QUARTER: u32 = 500_000;

/// Velocity of exported note-ons.
pub const NOTE_VELOCITY: u8 = 100;

const TRACK_NAME: &[u8] = b"Hummer";

/// Seconds represented by one exported tick.
pub fn tick_duration() -> f64 {
    TEMPO_US_PER_QUARTER as f64 / 1_000_000.0 / PPQ as f64
}

fn seconds_to_ticks(seconds: f64) -> u64 {
    (seconds * 1_000_000.0 * PPQ as f64 / TEMPO_US_PER_QUARTER as f64)
        .round()
        .max(0.0) as u64
}

/// Encodes a sequence as Standard MIDI File bytes.
///
/// # Arguments
/// * `sequence` - Ordered, non-overlapping notes
/// * `program` - General MIDI program for channel 0
pub fn sequence_to_midi(sequence: &Sequence, program: u8) -> Result<Vec<u8>> {
    if program > 127 {
        return Err(EngineError::Export(format!("program {program} is out of range")));
    }

    let mut events: Vec<(u64, TrackEventKind<'static>)> = vec![
        (0, TrackEventKind::Meta(MetaMessage::TrackName(TRACK_NAME))),
        (0, TrackEventKind::Meta(MetaMessage::Tempo(TEMPO_US_PER_QUARTER.into()))),
        (
            0,
            TrackEventKind::Midi {
                channel: 0u8.into(),
                message: MidiMessage::ProgramChange { program: program.into() },
            },
        ),
    ];

    let mut notes = sequence.iter().peekable();
    while let Some(note) = notes.next() {
        let key = note.note.as_u8().into();
        let on_tick = seconds_to_ticks(note.start_time);
        // Boundaries within rounding of each other must not cross once quantized.
        let next_on_tick = notes
            .peek()
            .map_or(u64::MAX, |next| seconds_to_ticks(next.start_time));
        let off_tick = seconds_to_ticks(note.end_time()).min(next_on_tick).max(on_tick);
        events.push((
            on_tick,
            TrackEventKind::Midi {
                channel: 0u8.into(),
                message: MidiMessage::NoteOn { key, vel: NOTE_VELOCITY.into() },
            },
        ));
        events.push((
            off_tick,
            TrackEventKind::Midi {
                channel: 0u8.into(),
                message: MidiMessage::NoteOff { key, vel: 0u8.into() },
            },
        ));
    }

    let mut track: Vec<TrackEvent<'static>> = Vec::with_capacity(events.len() + 1);
    let mut last_tick = 0u64;
    for (tick, kind) in events {
        let delta = tick
            .checked_sub(last_tick)
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| EngineError::Export("note timing exceeds the file format".to_string()))?;
        track.push(TrackEvent { delta: delta.into(), kind });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: 0u32.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(PPQ.into())),
        tracks: vec![track],
    };

    let mut buffer = Vec::new();
    smf.write(&mut buffer)
        .map_err(|e| EngineError::Export(format!("failed to write MIDI: {e}")))?;
    debug!("exported {} notes as {} bytes", sequence.len(), buffer.len());
    Ok(buffer)
}

/// Decodes Standard MIDI File bytes into a sequence.
pub fn midi_to_sequence(bytes: &[u8]) -> Result<Sequence> {
    let smf = Smf::parse(bytes)
        .map_err(|e| EngineError::Export(format!("failed to parse MIDI: {e}")))?;

    // Merge all tracks onto one absolute-tick timeline.
    let mut timeline: Vec<(u64, usize, TrackEventKind)> = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            timeline.push((tick, timeline.len(), event.kind));
        }
    }
    timeline.sort_by_key(|&(tick, order, _)| (tick, order));

    let mut clock = TickClock::new(smf.header.timing);
    let mut open: Vec<(u8, f64)> = Vec::new();
    let mut notes: Vec<RecordedNote> = Vec::new();

    for (tick, _, kind) in timeline {
        let seconds = clock.seconds_at(tick);
        match kind {
            TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                clock.set_tempo(tick, tempo.as_int());
            }
            TrackEventKind::Midi { message: MidiMessage::NoteOn { key, vel }, .. }
                if vel.as_int() > 0 =>
            {
                open.push((key.as_int(), seconds));
            }
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. },
                ..
            } => {
                if let Some(index) = open.iter().position(|&(k, _)| k == key.as_int()) {
                    let (k, start_time) = open.remove(index);
                    if let Some(note) = NoteNumber::new(k) {
                        notes.push(RecordedNote {
                            note,
                            start_time,
                            duration: seconds - start_time,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    notes.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    // Monophonic reduction: a note ends no later than the next one starts.
    for i in 1..notes.len() {
        let next_start = notes[i].start_time;
        let previous = &mut notes[i - 1];
        if previous.end_time() > next_start {
            previous.duration = (next_start - previous.start_time).max(0.0);
        }
    }

    Sequence::from_notes(notes)
}

/// Converts absolute ticks to seconds across tempo changes.
struct TickClock {
    timing: Timing,
    /// Tick and time of the last tempo change.
    anchor_tick: u64,
    anchor_seconds: f64,
    us_per_quarter: u32,
}

impl TickClock {
    fn new(timing: Timing) -> Self {
        Self {
            timing,
            anchor_tick: 0,
            anchor_seconds: 0.0,
            us_per_quarter: TEMPO_US_PER_QUARTER,
        }
    }

    fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        match self.timing {
            Timing::Metrical(ppq) => {
                ticks as f64 * self.us_per_quarter as f64
                    / (1_000_000.0 * ppq.as_int().max(1) as f64)
            }
            Timing::Timecode(fps, subframes) => {
                ticks as f64 / (fps.as_f32() as f64 * subframes.max(1) as f64)
            }
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        self.anchor_seconds + self.ticks_to_seconds(tick - self.anchor_tick)
    }

    fn set_tempo(&mut self, tick: u64, us_per_quarter: u32) {
        self.anchor_seconds = self.seconds_at(tick);
        self.anchor_tick = tick;
        self.us_per_quarter = us_per_quarter.max(1);
    }
}
