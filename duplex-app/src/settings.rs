//! Persistent application settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use duplex_core::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

const MIN_RATE: u32 = 8_000;
const MAX_RATE: u32 = 192_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    /// Rate captured audio is delivered at.
    pub target_sample_rate: u32,
    /// Rate of the response audio handed to playback.
    pub playback_source_rate: u32,
    pub barge_in: bool,
    pub vad_threshold: f32,
    pub vad_onset_frames: u32,
    pub vad_hangover_frames: u32,
    pub playback_queue_capacity: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            target_sample_rate: engine.target_sample_rate,
            playback_source_rate: engine.playback_source_rate,
            barge_in: engine.barge_in,
            vad_threshold: engine.vad_threshold,
            vad_onset_frames: engine.vad_onset_frames,
            vad_hangover_frames: engine.vad_hangover_frames,
            playback_queue_capacity: engine.playback_queue_capacity,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = normalize_device_name(self.preferred_input_device.take());
        self.preferred_output_device = normalize_device_name(self.preferred_output_device.take());
        self.target_sample_rate = self.target_sample_rate.clamp(MIN_RATE, MAX_RATE);
        self.playback_source_rate = self.playback_source_rate.clamp(MIN_RATE, MAX_RATE);
        self.vad_threshold = if self.vad_threshold.is_finite() {
            self.vad_threshold.clamp(0.001, 1.0)
        } else {
            AppSettings::default().vad_threshold
        };
        self.vad_onset_frames = self.vad_onset_frames.clamp(1, 50);
        self.vad_hangover_frames = self.vad_hangover_frames.min(100);
        self.playback_queue_capacity = self.playback_queue_capacity.clamp(16, 8192);
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            target_sample_rate: self.target_sample_rate,
            playback_source_rate: self.playback_source_rate,
            playback_queue_capacity: self.playback_queue_capacity,
            barge_in: self.barge_in,
            vad_threshold: self.vad_threshold,
            vad_onset_frames: self.vad_onset_frames,
            vad_hangover_frames: self.vad_hangover_frames,
            ..EngineConfig::default()
        }
    }
}

fn normalize_device_name(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Duplex")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("duplex")
            .join("settings.json")
    }
}

/// A missing file yields defaults silently; an unreadable or malformed one
/// yields defaults with a warning.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<AppSettings>(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), "settings file is invalid, using defaults: {e}");
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            warn!(path = %path.display(), "failed to read settings, using defaults: {e}");
            AppSettings::default()
        }
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
