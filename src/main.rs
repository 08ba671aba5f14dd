use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};

use audio_reactive::audio::{build_source, FftTask};
use audio_reactive::config::SourceKind;
use audio_reactive::sync::SyncLink;
use audio_reactive::{AudioConfig, ControlLoop, Controls, FeatureStore, SyncMode};

#[derive(Parser)]
#[command(name = "audio-reactive")]
#[command(about = "Extract audio-reactive features in real time and share them over UDP")]
struct Args {
    /// JSON config file; command line flags override its values
    #[arg(short, long)]
    config: Option<String>,

    /// Audio source: cpal, tone or wav
    #[arg(long)]
    source: Option<String>,

    /// Frequency of the tone source in Hz
    #[arg(long)]
    tone_freq: Option<f32>,

    /// WAV file for the wav source
    #[arg(long)]
    wav: Option<String>,

    /// Sync mode: off, transmit or receive
    #[arg(long)]
    sync_mode: Option<String>,

    /// UDP port for audio sync
    #[arg(long)]
    port: Option<u16>,

    /// AGC preset: 0 = off, 1 = normal, 2 = vivid, 3 = lazy
    #[arg(long)]
    preset: Option<u8>,

    /// Noise gate level
    #[arg(long)]
    squelch: Option<u8>,

    /// Control tick period in milliseconds
    #[arg(long, default_value = "10")]
    tick_ms: u64,

    /// Write the resolved config to this file and exit
    #[arg(long)]
    save_config: Option<String>,
}

fn resolve_config(args: &Args) -> Result<AudioConfig> {
    let mut config = match &args.config {
        Some(path) => AudioConfig::load(path).with_context(|| format!("Failed to load config {}", path))?,
        None => AudioConfig::default(),
    };

    if let Some(source) = &args.source {
        config.source.kind = match source.to_lowercase().as_str() {
            "cpal" => SourceKind::Cpal,
            "tone" => SourceKind::Tone,
            "wav" => SourceKind::Wav,
            other => anyhow::bail!("Unknown source '{}', expected cpal, tone or wav", other),
        };
    }
    if let Some(freq) = args.tone_freq {
        config.source.tone_frequency = freq;
    }
    if let Some(wav) = &args.wav {
        config.source.wav_path = Some(wav.clone());
        if args.source.is_none() {
            config.source.kind = SourceKind::Wav;
        }
    }
    if let Some(mode) = &args.sync_mode {
        config.sync_mode = match mode.to_lowercase().as_str() {
            "off" => SyncMode::Off,
            "transmit" | "tx" => SyncMode::Transmit,
            "receive" | "rx" => SyncMode::Receive,
            other => anyhow::bail!("Unknown sync mode '{}', expected off, transmit or receive", other),
        };
    }
    if let Some(port) = args.port {
        config.sync_port = port;
    }
    if let Some(preset) = args.preset {
        config.agc_preset = preset;
    }
    if let Some(squelch) = args.squelch {
        config.squelch = squelch;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = resolve_config(&args)?;

    if let Some(path) = &args.save_config {
        config.save(path)?;
        info!("Saved config to {}", path);
        return Ok(());
    }

    info!("Starting audio-reactive");
    info!(
        "Source: {:?}, AGC preset: {}, squelch: {}, sync: {:?}",
        config.source.kind, config.agc_preset, config.squelch, config.sync_mode
    );

    let store = Arc::new(FeatureStore::new());
    let controls = Arc::new(Controls::from_config(&config));

    let source = build_source(&config.source, true)?;
    let mut fft_task = FftTask::spawn(source, store.clone(), controls.clone())?;

    let link = SyncLink::from_config(&config)?;
    let mut control = ControlLoop::new(&config, store.clone(), controls.clone(), link);

    let start = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(args.tick_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_report = Instant::now();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                control.tick(start.elapsed().as_millis() as u64);

                if last_report.elapsed() >= Duration::from_secs(5) {
                    last_report = Instant::now();
                    let snap = store.snapshot(controls.max_volume());
                    info!(
                        "envelope {:3} | agc {:6.1} | mult {:.3} | {:7.1} Hz | bands {:?}",
                        snap.envelope(),
                        snap.agc_sample(),
                        snap.sample.multiplier,
                        snap.spectrum.dominant_frequency,
                        snap.bands()
                    );
                    if let Some(link) = control.link() {
                        info!("sync {:?}", link.stats());
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    fft_task.stop();
    Ok(())
}
