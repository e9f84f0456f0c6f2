//! WAV file I/O for the `play` and `record` commands.

use std::path::Path;

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Mono samples and their rate.
pub struct WavAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Read a WAV file and down-mix it to mono f32.
pub fn read_mono(path: &Path) -> Result<WavAudio> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("decoding float samples")?,
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                bail!("unsupported bit depth: {}", spec.bits_per_sample);
            }
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .context("decoding integer samples")?
        }
    };

    Ok(WavAudio {
        sample_rate: spec.sample_rate,
        samples: downmix(&interleaved, channels),
    })
}

/// Average interleaved frames to mono. A trailing partial frame is dropped.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Incremental 16-bit mono writer for captured audio.
pub struct MonoWriter {
    inner: WavWriter<std::io::BufWriter<std::fs::File>>,
    written: usize,
}

impl MonoWriter {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let inner =
            WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
        Ok(Self { inner, written: 0 })
    }

    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            self.inner.write_sample(v)?;
        }
        self.written += samples.len();
        Ok(())
    }

    pub fn samples_written(&self) -> usize {
        self.written
    }

    pub fn finalize(self) -> Result<()> {
        self.inner.finalize().context("finalizing WAV file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5, 0.2], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn recorded_file_reads_back_as_mono() {
        let path = std::env::temp_dir().join(format!("duplex-wav-{}.wav", std::process::id()));
        let mut writer = MonoWriter::create(&path, 16_000).unwrap();
        writer.write(&[0.0, 0.5, -0.5, 2.0]).unwrap();
        assert_eq!(writer.samples_written(), 4);
        writer.finalize().unwrap();

        let audio = read_mono(&path).unwrap();
        assert_eq!(audio.sample_rate, 16_000);
        assert_eq!(audio.samples.len(), 4);
        assert!((audio.samples[1] - 0.5).abs() < 1e-3);
        assert!((audio.samples[3] - 1.0).abs() < 1e-3);

        let _ = std::fs::remove_file(&path);
    }
}
