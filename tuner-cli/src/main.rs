//! uketuner - command-line front end for the tuner core
//!
//! Subcommands:
//! - `uketuner listen` - tune from the default microphone
//! - `uketuner analyze <wav>` - run a recording through the pipeline
//! - `uketuner tunings` - list the built-in tunings

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

use tuner_core::audio::FRAME_QUEUE_CAPACITY;
use tuner_core::tuning::{preset, presets};
use tuner_core::{
    frame_channel, Framer, ListeningSession, Microphone, PipelineConstants, TunerConfig,
    TunerPipeline,
};

mod display;

#[derive(Parser)]
#[command(name = "uketuner")]
#[command(about = "Ukulele tuner and chord detector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct TuningArgs {
    /// Tuning id (see `uketuner tunings`)
    #[arg(short, long)]
    tuning: Option<String>,

    /// Reference frequency of A4 in Hz
    #[arg(long)]
    a4: Option<f32>,

    /// Use the narrow 2 cent in-tune window
    #[arg(long)]
    precision: bool,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tune from the default input device
    Listen {
        #[command(flatten)]
        tuning: TuningArgs,

        /// Target one string (0-based) instead of the nearest one
        #[arg(short, long)]
        string: Option<usize>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Run a WAV file through the pipeline and print what it heard
    Analyze {
        /// Path to a WAV file
        path: PathBuf,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// List the built-in tunings
    Tunings,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Listen {
            tuning,
            string,
            seconds,
        } => {
            let mut config = build_config(&tuning)?;
            if string.is_some() {
                config.selected_string = string;
                config.validate()?;
            }
            listen(config, seconds.map(Duration::from_secs))
        }
        Commands::Analyze { path, tuning } => analyze(&path, build_config(&tuning)?),
        Commands::Tunings => {
            for tuning in presets() {
                println!("{}", display::tuning_line(tuning, 440.0));
            }
            Ok(())
        }
    }
}

/// Settings file first, then command-line overrides.
fn build_config(args: &TuningArgs) -> Result<TunerConfig> {
    let mut config = match &args.config {
        Some(path) => TunerConfig::load_from_file(path),
        None => TunerConfig::default(),
    };
    if let Some(id) = &args.tuning {
        config.tuning = match preset(id) {
            Some(tuning) => tuning,
            None => {
                let known: Vec<&str> = presets().iter().map(|t| t.id.as_str()).collect();
                bail!("unknown tuning '{id}', expected one of: {}", known.join(", "));
            }
        };
        config.selected_string = None;
    }
    if let Some(a4) = args.a4 {
        config.a4_reference = a4;
    }
    if args.precision {
        config.precision_mode = true;
    }
    config.validate()?;
    Ok(config)
}

fn listen(config: TunerConfig, limit: Option<Duration>) -> Result<()> {
    let microphone = Microphone::new();
    let (sender, receiver) = frame_channel(FRAME_QUEUE_CAPACITY);
    let capture = microphone.start(sender).context("starting microphone")?;

    let constants = PipelineConstants {
        sample_rate: capture.sample_rate(),
        ..PipelineConstants::default()
    };
    let tuning = config.tuning.clone();
    let pipeline = TunerPipeline::with_constants(config, constants)?;
    let session = ListeningSession::spawn(pipeline, receiver)?;
    info!(device = capture.device_name(), tuning = %tuning.id, "listening, Ctrl+C to quit");

    let started = Instant::now();
    let mut line = display::StatusLine::default();
    loop {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        match session.updates().recv_timeout(Duration::from_millis(250)) {
            Ok(frame) => line.render(&frame, &tuning)?,
            Err(RecvTimeoutError::Timeout) if session.is_listening() => {}
            Err(_) => break,
        }
    }
    line.finish()?;

    session.stop();
    capture.stop();
    Ok(())
}

fn analyze(path: &Path, config: TunerConfig) -> Result<()> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("reading float samples")?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .context("reading integer samples")?
        }
    };
    let mono: Vec<f32> = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    let constants = PipelineConstants {
        sample_rate: spec.sample_rate,
        ..PipelineConstants::default()
    };
    let mut framer = Framer::new(constants.buffer_size, constants.hop_size);
    let tuning = config.tuning.clone();
    let mut pipeline = TunerPipeline::with_constants(config, constants)?;
    info!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels,
        seconds = mono.len() as f32 / spec.sample_rate as f32,
        "analyzing recording"
    );

    let mut log = display::EventLog::default();
    for buffer in framer.push(&mono) {
        if let Some(frame) = pipeline.process(&buffer) {
            log.record(&frame);
        }
    }

    match pipeline.last_frame() {
        Some(last) => println!("{}", display::tuned_summary(&last.tuned_strings, &tuning)),
        None => println!("recording shorter than one analysis buffer"),
    }
    Ok(())
}
