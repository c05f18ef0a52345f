//! # Hummer - Hum to MIDI
//!
//! Terminal front end for the hummer engine. Hum or whistle into the
//! microphone and hear it echoed by a sine voice, record it to a Standard
//! MIDI File, transcribe a WAV file offline, or play a recording back.
//!
//! ## Architecture
//! - **Main Thread**: cooperative session loop, one `tick()` every ~16 ms
//! - **Audio Threads**: cpal input and output callbacks owned by the core
//! - **Stdin Thread**: waits for Enter and signals the loop to stop
//! - **Communication**: crossbeam channels for stop signals and note changes

mod voice;
mod wav;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use hummer_core::audio::CpalCapture;
use hummer_core::instrument::{self, DEFAULT_INSTRUMENT, INSTRUMENTS};
use hummer_core::synth::SineSynth;
use hummer_core::{
    export, AudioCapture, CaptureMode, Clock, EngineConfig, MonotonicClock, NoteChange,
    Sequence, Session, Synthesizer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voice::Voice;
use wav::WavCapture;

/// Interval between session ticks.
const TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Hummer - hum a melody, get MIDI
#[derive(Parser)]
#[command(name = "hummer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    tuning: TuningArgs,

    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Engine configuration overrides, applied on top of `--config`.
#[derive(Args)]
struct TuningArgs {
    /// Path to an engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Octave transposition, -2 to +2
    #[arg(long, global = true, allow_hyphen_values = true)]
    octave: Option<i8>,

    /// Minimum RMS volume treated as voiced
    #[arg(long, global = true)]
    sensitivity: Option<f32>,

    /// Shortest note kept, in seconds
    #[arg(long, global = true)]
    min_duration: Option<f64>,

    /// Silent ticks tolerated before a note is closed
    #[arg(long, global = true)]
    hold: Option<u32>,

    /// Number of pitch estimates in the median window
    #[arg(long, global = true)]
    smoothing: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Echo the microphone through a sine voice until Enter is pressed
    Live,

    /// Record from the microphone until Enter is pressed, then export
    Record {
        /// Output MIDI file
        #[arg(short, long)]
        out: PathBuf,

        /// Also save the recorded notes as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Instrument id used for the MIDI program (see `instruments`)
        #[arg(short, long, default_value = DEFAULT_INSTRUMENT)]
        instrument: String,
    },

    /// Transcribe a WAV file to MIDI
    Transcribe {
        /// Input WAV file
        input: PathBuf,

        /// Output MIDI file
        #[arg(short, long)]
        out: PathBuf,

        /// Also save the recorded notes as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Instrument id used for the MIDI program (see `instruments`)
        #[arg(short, long, default_value = DEFAULT_INSTRUMENT)]
        instrument: String,
    },

    /// Play back a recording (.json or .mid) through the sine voice
    Play {
        /// Recorded notes, as saved by `record --json` or any MIDI file
        input: PathBuf,
    },

    /// List the available export instruments
    Instruments {
        /// Output machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Instruments { json } => list_instruments(json),
        Commands::Live => {
            let config = cli.tuning.resolve()?;
            let voice = Voice::Sine(SineSynth::open()?);
            let mut session = Session::new(CpalCapture::new(), voice, MonotonicClock::new());
            session.set_config(config)?;
            capture_until_enter(&mut session, CaptureMode::Live)
        }
        Commands::Record { out, json, instrument } => {
            check_instrument(&instrument)?;
            let config = cli.tuning.resolve()?;
            let mut session = Session::new(CpalCapture::new(), Voice::Mute, MonotonicClock::new());
            session.set_config(config)?;
            capture_until_enter(&mut session, CaptureMode::Recording)?;
            save_recording(&session, &out, json.as_deref(), &instrument)
        }
        Commands::Transcribe { input, out, json, instrument } => {
            check_instrument(&instrument)?;
            let config = cli.tuning.resolve()?;
            let mut session =
                Session::new(WavCapture::new(&input), Voice::Mute, MonotonicClock::new());
            session.set_config(config)?;
            transcribe(&mut session)?;
            save_recording(&session, &out, json.as_deref(), &instrument)
        }
        Commands::Play { input } => {
            let sequence = load_sequence(&input)?;
            let voice = Voice::Sine(SineSynth::open()?);
            let mut session = Session::new(CpalCapture::new(), voice, MonotonicClock::new());
            play(&mut session, &sequence)
        }
    }
}

impl TuningArgs {
    /// Loads the configuration file, if any, and applies the flag overrides.
    fn resolve(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(octave) = self.octave {
            config.octave_shift = octave;
        }
        if let Some(sensitivity) = self.sensitivity {
            config.sensitivity = sensitivity;
        }
        if let Some(min_duration) = self.min_duration {
            config.min_note_duration_secs = min_duration;
        }
        if let Some(hold) = self.hold {
            config.silence_hold_frames = hold;
        }
        if let Some(smoothing) = self.smoothing {
            config.smoothing_window = smoothing;
        }
        config.validate()?;
        Ok(config)
    }
}

fn check_instrument(id: &str) -> Result<()> {
    if instrument::find(id).is_none() {
        bail!("unknown instrument '{id}' (run `hummer instruments` for the list)");
    }
    Ok(())
}

fn list_instruments(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&INSTRUMENTS[..])?);
        return Ok(());
    }
    for instrument in &INSTRUMENTS {
        println!(
            "{:<24} {:<16} {:<11} program {}",
            instrument.id, instrument.name, instrument.category, instrument.midi_program
        );
    }
    Ok(())
}

/// Spawns a thread that signals once Enter is pressed.
///
/// When stdin is closed or unreadable the channel disconnects without a
/// signal.
fn enter_pressed() -> Receiver<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => {}
            Ok(_) => {
                let _ = tx.send(());
            }
            Err(e) => warn!("failed to read stdin: {}", e),
        }
    });
    rx
}

fn capture_until_enter<C, S, K>(session: &mut Session<C, S, K>, mode: CaptureMode) -> Result<()>
where
    C: AudioCapture,
    S: Synthesizer,
    K: Clock,
{
    let changes = session.subscribe();
    session.start(mode)?;
    eprintln!("{mode:?}: press Enter to stop");

    let stop = enter_pressed();
    loop {
        session.tick();
        print_changes(&changes);
        match stop.recv_timeout(TICK_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    session.stop();
    print_changes(&changes);
    Ok(())
}

fn transcribe<S, K>(session: &mut Session<WavCapture, S, K>) -> Result<()>
where
    S: Synthesizer,
    K: Clock,
{
    let changes = session.subscribe();
    session.start(CaptureMode::Recording)?;
    while session.capture().remaining() > 0 {
        session.tick();
        print_changes(&changes);
    }
    info!("transcribed {:.2}s of audio", session.elapsed());
    session.stop();
    print_changes(&changes);
    Ok(())
}

fn play<C, S, K>(session: &mut Session<C, S, K>, sequence: &Sequence) -> Result<()>
where
    C: AudioCapture,
    S: Synthesizer,
    K: Clock,
{
    let changes = session.subscribe();
    session.playback(sequence)?;
    eprintln!("playing {} notes: press Enter to stop", sequence.len());

    let stop = enter_pressed();
    while session.is_playing() {
        print_changes(&changes);
        match stop.recv_timeout(TICK_INTERVAL) {
            Ok(()) => session.stop_playback(),
            Err(RecvTimeoutError::Disconnected) | Err(RecvTimeoutError::Timeout) => {}
        }
        session.tick();
    }
    print_changes(&changes);
    Ok(())
}

fn print_changes(changes: &Receiver<NoteChange>) {
    for change in changes.try_iter() {
        match change.note {
            Some(note) => println!("{:>9.3}s  {}", change.at, note),
            None => println!("{:>9.3}s  -", change.at),
        }
    }
}

fn save_recording<C, S, K>(
    session: &Session<C, S, K>,
    out: &Path,
    json: Option<&Path>,
    instrument: &str,
) -> Result<()>
where
    C: AudioCapture,
    S: Synthesizer,
    K: Clock,
{
    let sequence = session.sequence();
    if sequence.is_empty() {
        bail!("no notes were recorded");
    }

    let bytes = session.export_midi(instrument)?;
    std::fs::write(out, bytes).with_context(|| format!("failed to write {}", out.display()))?;
    info!("wrote {} notes to {}", sequence.len(), out.display());

    if let Some(path) = json {
        sequence
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("saved notes to {}", path.display());
    }
    Ok(())
}

/// Loads a sequence from JSON, or from MIDI when the extension says so.
fn load_sequence(path: &Path) -> Result<Sequence> {
    let is_midi = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"));

    let sequence = if is_midi {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        export::midi_to_sequence(&bytes)?
    } else {
        Sequence::load(path).with_context(|| format!("failed to load {}", path.display()))?
    };

    if sequence.is_empty() {
        return Err(anyhow!("{} contains no notes", path.display()));
    }
    Ok(sequence)
}
