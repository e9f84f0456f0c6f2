//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

#[cfg(feature = "audio-cpal")]
use crate::error::{DuplexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: StreamDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
    /// Input devices that most likely capture system output. Capturing from
    /// one of these while playing back feeds the response into the mic path.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "wave out",
    "virtual output",
];

/// Best-effort name heuristic for loopback/monitor capture devices.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Order devices for display: default first, loopback inputs last, then by name.
pub fn sort_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| {
        (
            !d.is_default,
            d.is_loopback_like,
            d.name.to_ascii_lowercase(),
        )
    });
}

#[cfg(feature = "audio-cpal")]
fn devices_for(host: &cpal::Host, direction: StreamDirection) -> Result<Vec<cpal::Device>> {
    use cpal::traits::HostTrait;

    match direction {
        StreamDirection::Input => host.input_devices().map(|d| d.collect()),
        StreamDirection::Output => host.output_devices().map(|d| d.collect()),
    }
    .map_err(|e| DuplexError::AudioDevice(e.to_string()))
}

#[cfg(feature = "audio-cpal")]
fn default_for(host: &cpal::Host, direction: StreamDirection) -> Option<cpal::Device> {
    use cpal::traits::HostTrait;

    match direction {
        StreamDirection::Input => host.default_input_device(),
        StreamDirection::Output => host.default_output_device(),
    }
}

/// Resolve the device to open: the preferred name if present, else the
/// system default, else the first device listed.
///
/// # Errors
/// `NoDefaultInputDevice` / `NoDefaultOutputDevice` when nothing is available.
#[cfg(feature = "audio-cpal")]
pub fn select_device(direction: StreamDirection, preferred: Option<&str>) -> Result<cpal::Device> {
    use cpal::traits::DeviceTrait;
    use tracing::warn;

    let host = cpal::default_host();

    if let Some(preferred_name) = preferred {
        match devices_for(&host, direction) {
            Ok(devices) => {
                if let Some(found) = devices
                    .into_iter()
                    .find(|d| d.name().map(|n| n == preferred_name).unwrap_or(false))
                {
                    return Ok(found);
                }
                warn!(?direction, preferred_name, "preferred device not found, falling back");
            }
            Err(e) => warn!(?direction, "failed to list devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = default_for(&host, direction) {
        return Ok(default);
    }

    let missing = match direction {
        StreamDirection::Input => DuplexError::NoDefaultInputDevice,
        StreamDirection::Output => DuplexError::NoDefaultOutputDevice,
    };
    let fallback = devices_for(&host, direction)?
        .into_iter()
        .next()
        .ok_or(missing)?;
    warn!(?direction, "no default device, falling back to first available");
    Ok(fallback)
}

/// List devices for one direction. Empty when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_devices(direction: StreamDirection) -> Vec<DeviceInfo> {
    use cpal::traits::DeviceTrait;

    let host = cpal::default_host();
    let default_name = default_for(&host, direction).and_then(|d| d.name().ok());

    let devices = match devices_for(&host, direction) {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(?direction, "failed to enumerate devices: {e}");
            return Vec::new();
        }
    };

    let mut list: Vec<DeviceInfo> = devices
        .iter()
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: direction == StreamDirection::Input
                    && is_loopback_like_name(&name),
                direction,
                name,
            }
        })
        .collect();
    sort_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices(_direction: StreamDirection) -> Vec<DeviceInfo> {
    vec![]
}

pub fn list_input_devices() -> Vec<DeviceInfo> {
    list_devices(StreamDirection::Input)
}

pub fn list_output_devices() -> Vec<DeviceInfo> {
    list_devices(StreamDirection::Output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction: StreamDirection::Input,
            is_default,
            is_loopback_like: is_loopback_like_name(name),
        }
    }

    #[test]
    fn detects_monitor_and_loopback_names() {
        assert!(is_loopback_like_name("Monitor of Built-in Audio Analog Stereo"));
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(!is_loopback_like_name("USB PnP Microphone"));
    }

    #[test]
    fn default_first_loopback_last() {
        let mut devices = vec![
            info("Stereo Mix (Realtek Audio)", false),
            info("b-mic", false),
            info("a-mic", false),
            info("Headset Microphone", true),
        ];
        sort_devices(&mut devices);
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Headset Microphone", "a-mic", "b-mic", "Stereo Mix (Realtek Audio)"]
        );
    }
}
