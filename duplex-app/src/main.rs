//! `duplex` — command-line host for the duplex-core engine.
//!
//! ## Runtime note
//!
//! The engine opens its cpal streams on Tokio's blocking pool, so every
//! audio command runs inside the multi-threaded runtime started here.

mod commands;
mod settings;
mod wav;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "duplex", version, about = "Full-duplex audio capture and playback")]
struct Cli {
    /// Settings file (defaults to the per-user data directory).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Input device name; falls back to the system default.
    #[arg(long, global = true)]
    input: Option<String>,

    /// Output device name; falls back to the system default.
    #[arg(long, global = true)]
    output: Option<String>,

    /// Rate captured audio is delivered at (Hz).
    #[arg(long, global = true)]
    rate: Option<u32>,

    /// Stop playback when speech is detected over it.
    #[arg(long, global = true)]
    barge_in: bool,

    /// Write the effective settings back to the settings file.
    #[arg(long, global = true)]
    save: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List input and output devices.
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Play the microphone back through the speakers.
    Echo {
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Stream a WAV file to the output device.
    Play { path: PathBuf },
    /// Record the microphone to a WAV file.
    Record {
        path: PathBuf,
        #[arg(long)]
        seconds: Option<u64>,
    },
}

impl Cli {
    fn apply_overrides(&self, settings: &mut AppSettings) {
        if let Some(input) = &self.input {
            settings.preferred_input_device = Some(input.clone());
        }
        if let Some(output) = &self.output {
            settings.preferred_output_device = Some(output.clone());
        }
        if let Some(rate) = self.rate {
            settings.target_sample_rate = rate;
        }
        if self.barge_in {
            settings.barge_in = true;
        }
        settings.normalize();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("duplex=info")),
        )
        .init();

    let cli = Cli::parse();

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    cli.apply_overrides(&mut app_settings);
    info!(
        settings = %settings_path.display(),
        target_rate = app_settings.target_sample_rate,
        barge_in = app_settings.barge_in,
        "settings loaded"
    );

    if cli.save {
        save_settings(&settings_path, &app_settings)?;
        info!("settings saved");
    }

    match &cli.command {
        Command::Devices { json } => commands::devices(*json),
        Command::Echo { seconds } => commands::echo(&app_settings, *seconds).await,
        Command::Play { path } => commands::play(&app_settings, path).await,
        Command::Record { path, seconds } => {
            commands::record(&app_settings, path, *seconds).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_loaded_settings() {
        let cli = Cli::parse_from([
            "duplex",
            "--input",
            " USB Mic ",
            "--rate",
            "24000",
            "--barge-in",
            "record",
            "out.wav",
            "--seconds",
            "3",
        ]);
        let mut settings = AppSettings::default();
        cli.apply_overrides(&mut settings);

        assert_eq!(settings.preferred_input_device.as_deref(), Some("USB Mic"));
        assert_eq!(settings.target_sample_rate, 24_000);
        assert!(settings.barge_in);
        assert!(matches!(
            cli.command,
            Command::Record { seconds: Some(3), .. }
        ));
    }
}
