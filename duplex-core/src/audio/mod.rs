//! cpal streams hosting the capture and playback processors.
//!
//! # Design constraints
//!
//! cpal data callbacks run on an OS audio thread at elevated priority. They
//! **must not**:
//! - Block on a mutex or condvar
//! - Perform I/O (including logging)
//! - Allocate beyond the first callback's scratch sizing
//!
//! The closures here only down-mix/fan-out channels through a reused scratch
//! buffer and call into [`CaptureProcessor::process`] or
//! [`PlaybackProcessor::render`], both of which are wait-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` and `AudioPlayback` must be created and dropped on
//! the same thread; the engine does both inside `spawn_blocking`.

pub mod device;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info};

use crate::capture::CaptureProcessor;
use crate::error::{DuplexError, Result};
use crate::playback::PlaybackProcessor;

/// Frames reserved for the per-callback scratch buffer.
#[cfg(feature = "audio-cpal")]
const SCRATCH_FRAMES: usize = 8192;

/// Handle to an active input stream feeding a [`CaptureProcessor`].
///
/// **Not `Send`** — create and drop on the same OS thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set to `false` to make the callback ignore further ticks.
    running: Arc<AtomicBool>,
    /// Device sample rate (Hz); captured blocks arrive at this rate.
    pub sample_rate: u32,
    pub channels: u16,
}

/// Handle to an active output stream driven by a [`PlaybackProcessor`].
///
/// **Not `Send`** — create and drop on the same OS thread.
pub struct AudioPlayback {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// While `false` the callback renders silence without touching the queue.
    running: Arc<AtomicBool>,
    /// Device sample rate (Hz); chunks must already be at this rate.
    pub sample_rate: u32,
    pub channels: u16,
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open an input device by preferred name, otherwise the default input
    /// device, otherwise the first one available.
    pub fn open_with_preference(
        processor: CaptureProcessor,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let device = device::select_device(device::StreamDirection::Input, preferred_device_name)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| DuplexError::AudioDevice(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        info!(sample_rate, channels, ?sample_format, "input config selected");

        let stream = match sample_format {
            SampleFormat::F32 => build_input::<f32>(&device, &config, processor, &running),
            SampleFormat::I16 => build_input::<i16>(&device, &config, processor, &running),
            SampleFormat::I32 => build_input::<i32>(&device, &config, processor, &running),
            SampleFormat::U16 => build_input::<u16>(&device, &config, processor, &running),
            SampleFormat::U8 => build_input::<u8>(&device, &config, processor, &running),
            fmt => {
                return Err(DuplexError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| DuplexError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
            channels,
        })
    }

    /// Open the system default microphone.
    pub fn open_default(processor: CaptureProcessor, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(processor, running, None)
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioPlayback {
    /// Open an output device by preferred name, otherwise the default output
    /// device, otherwise the first one available.
    pub fn open_with_preference(
        processor: PlaybackProcessor,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let device =
            device::select_device(device::StreamDirection::Output, preferred_device_name)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let supported = device
            .default_output_config()
            .map_err(|e| DuplexError::AudioDevice(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        info!(sample_rate, channels, ?sample_format, "output config selected");

        let stream = match sample_format {
            SampleFormat::F32 => build_output::<f32>(&device, &config, processor, &running),
            SampleFormat::I16 => build_output::<i16>(&device, &config, processor, &running),
            SampleFormat::I32 => build_output::<i32>(&device, &config, processor, &running),
            SampleFormat::U16 => build_output::<u16>(&device, &config, processor, &running),
            SampleFormat::U8 => build_output::<u8>(&device, &config, processor, &running),
            fmt => {
                return Err(DuplexError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| DuplexError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
            channels,
        })
    }

    /// Open the system default output device.
    pub fn open_default(processor: PlaybackProcessor, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(processor, running, None)
    }
}

/// Down-mix each hardware block to mono and relay it.
#[cfg(feature = "audio-cpal")]
fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut processor: CaptureProcessor,
    running: &Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    let running = Arc::clone(running);
    let mut mono: Vec<f32> = Vec::with_capacity(SCRATCH_FRAMES);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                mono.clear();
                mono.extend(data.chunks_exact(ch).map(|frame| {
                    frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / ch as f32
                }));
                processor.process(Some(mono.as_slice()));
            },
            |err| error!("audio input stream error: {err}"),
            None,
        )
        .map_err(|e| DuplexError::AudioStream(e.to_string()))
}

/// Render mono and copy each sample to every output channel.
#[cfg(feature = "audio-cpal")]
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut processor: PlaybackProcessor,
    running: &Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let ch = config.channels.max(1) as usize;
    let running = Arc::clone(running);
    let mut mono: Vec<f32> = Vec::with_capacity(SCRATCH_FRAMES);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / ch, 0.0);
                if running.load(Ordering::Relaxed) {
                    processor.render(&mut mono);
                } else {
                    mono.fill(0.0);
                }
                for (frame, &value) in data.chunks_exact_mut(ch).zip(mono.iter()) {
                    frame.fill(T::from_sample(value));
                }
            },
            |err| error!("audio output stream error: {err}"),
            None,
        )
        .map_err(|e| DuplexError::AudioStream(e.to_string()))
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _processor: CaptureProcessor,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(DuplexError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(processor: CaptureProcessor, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(processor, running, None)
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioPlayback {
    pub fn open_with_preference(
        _processor: PlaybackProcessor,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(DuplexError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(processor: PlaybackProcessor, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(processor, running, None)
    }
}

impl AudioCapture {
    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl AudioPlayback {
    /// Switch the callback to silence on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
