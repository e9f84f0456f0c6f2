//! Command implementations for the `duplex` binary.
//!
//! Every command that touches audio builds a `DuplexEngine` from the loaded
//! settings, starts it on the blocking pool and stops it on Ctrl-C or when
//! its work is done.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use duplex_core::{
    audio::device::{list_input_devices, list_output_devices, DeviceInfo, StreamDirection},
    DuplexEngine, DuplexError, EngineConfig,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::settings::AppSettings;
use crate::wav;

/// Chunks kept in flight while streaming a file (about one second).
const PLAYBACK_HIGH_WATER: usize = 50;

/// Consecutive idle polls before playback counts as finished.
const IDLE_POLLS_TO_FINISH: u32 = 3;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time allowed for the forwarding loop to drain after `stop()`.
const DRAIN_GRACE: Duration = Duration::from_millis(150);

pub fn devices(json: bool) -> Result<()> {
    let mut all: Vec<DeviceInfo> = list_input_devices();
    all.extend(list_output_devices());

    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    if all.is_empty() {
        println!("no audio devices found");
        return Ok(());
    }
    for d in &all {
        let mut tags = Vec::new();
        if d.is_default {
            tags.push("default");
        }
        if d.is_loopback_like {
            tags.push("loopback");
        }
        let direction = match d.direction {
            StreamDirection::Input => "in ",
            StreamDirection::Output => "out",
        };
        if tags.is_empty() {
            println!("{direction}  {}", d.name);
        } else {
            println!("{direction}  {} [{}]", d.name, tags.join(", "));
        }
    }
    Ok(())
}

/// Play the microphone straight back through the speakers.
pub async fn echo(settings: &AppSettings, seconds: Option<u64>) -> Result<()> {
    let mut config = settings.engine_config();
    config.playback_source_rate = config.target_sample_rate;
    let engine = start_engine(config, settings).await?;
    let mut capture_rx = engine.subscribe_capture();

    let deadline = deadline_sleep(seconds);
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("echo running; press Ctrl-C to stop");
    let mut dropped = 0usize;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            event = capture_rx.recv() => match event {
                Ok(event) => match engine.enqueue_playback(&event.samples) {
                    Ok(()) => {}
                    Err(DuplexError::PlaybackQueueFull) => dropped += 1,
                    Err(e) => return Err(e.into()),
                },
                Err(RecvError::Lagged(n)) => warn!("capture receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    shutdown(&engine)?;
    if dropped > 0 {
        warn!(dropped, "echo dropped blocks while the output was stalled");
    }
    Ok(())
}

/// Stream a WAV file to the output device.
///
/// With barge-in enabled the microphone is opened as well and speech over
/// the playback stops it.
pub async fn play(settings: &AppSettings, path: &Path) -> Result<()> {
    let audio = wav::read_mono(path)?;
    info!(
        path = %path.display(),
        sample_rate = audio.sample_rate,
        samples = audio.samples.len(),
        "loaded WAV file"
    );

    let mut config = settings.engine_config();
    config.playback_source_rate = audio.sample_rate;
    config.capture_enabled = settings.barge_in;
    let engine = start_engine(config, settings).await?;
    let mut activity_rx = engine.subscribe_activity();

    // 20 ms pieces, the framing a streaming service would use.
    let piece = (audio.sample_rate as usize / 50).max(1);
    let mut pieces = audio.samples.chunks(piece);
    let mut flushed = false;
    let mut idle_polls = 0u32;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                engine.clear_playback()?;
                break;
            }
            event = activity_rx.recv() => {
                if let Ok(event) = event {
                    if event.barge_in {
                        info!(rms = event.rms, "speech over playback, stopping");
                        break;
                    }
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        while !flushed && engine.playback_backlog() < PLAYBACK_HIGH_WATER {
            match pieces.next() {
                Some(samples) => engine.enqueue_playback(samples)?,
                None => {
                    engine.flush_playback()?;
                    flushed = true;
                }
            }
        }

        if flushed && engine.is_playback_idle() {
            idle_polls += 1;
            if idle_polls >= IDLE_POLLS_TO_FINISH {
                break;
            }
        } else {
            idle_polls = 0;
        }
    }

    shutdown(&engine)
}

/// Record the microphone, at the target rate, to a 16-bit mono WAV file.
pub async fn record(settings: &AppSettings, path: &Path, seconds: Option<u64>) -> Result<()> {
    let mut config = settings.engine_config();
    config.playback_enabled = false;
    config.barge_in = false;
    let sample_rate = config.target_sample_rate;

    let mut writer = wav::MonoWriter::create(path, sample_rate)?;
    let engine = start_engine(config, settings).await?;
    let mut capture_rx = engine.subscribe_capture();

    let deadline = deadline_sleep(seconds);
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(path = %path.display(), sample_rate, "recording; press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = &mut deadline => break,
            event = capture_rx.recv() => match event {
                Ok(event) => writer.write(&event.samples)?,
                Err(RecvError::Lagged(n)) => warn!("recording lost {n} capture events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    shutdown(&engine)?;

    // The forwarding loop drains the ring and resampler tail after stop.
    let grace = tokio::time::sleep(DRAIN_GRACE);
    tokio::pin!(grace);
    loop {
        tokio::select! {
            _ = &mut grace => break,
            event = capture_rx.recv() => match event {
                Ok(event) => writer.write(&event.samples)?,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }

    let written = writer.samples_written();
    writer.finalize()?;
    info!(
        samples = written,
        seconds = written as f64 / sample_rate as f64,
        "recording saved"
    );
    Ok(())
}

async fn start_engine(config: EngineConfig, settings: &AppSettings) -> Result<Arc<DuplexEngine>> {
    let engine = Arc::new(DuplexEngine::new(config));
    let input = settings.preferred_input_device.clone();
    let output = settings.preferred_output_device.clone();

    // `start` blocks until the device threads report back.
    let starter = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || starter.start_with_devices(input, output))
        .await
        .context("engine start task panicked")??;

    let rates = engine.stream_rates();
    info!(
        capture_rate = ?rates.capture,
        playback_rate = ?rates.playback,
        "audio streams open"
    );
    Ok(engine)
}

fn shutdown(engine: &DuplexEngine) -> Result<()> {
    if engine.is_running() {
        engine.stop()?;
    }
    let diag = engine.diagnostics_snapshot();
    info!(
        blocks_captured = diag.blocks_captured,
        blocks_dropped = diag.blocks_dropped,
        chunks_completed = diag.chunks_completed,
        silence_samples = diag.silence_samples,
        clears = diag.clears,
        barge_ins = diag.barge_ins,
        "audio diagnostics snapshot on stop"
    );
    Ok(())
}

/// Sleep for `seconds`, or forever when no limit was given.
async fn deadline_sleep(seconds: Option<u64>) {
    match seconds {
        Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
        None => std::future::pending::<()>().await,
    }
}
