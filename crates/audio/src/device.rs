//! Audio device abstraction
//!
//! The single seam between the audio channel and physical capture/playback
//! primitives. File-backed devices make offline runs and tests possible
//! without hardware.

use std::path::Path;

use thiserror::Error;

use parley_core::{AudioFrame, Channels, SampleRate};

#[derive(Debug, Error)]
pub enum AudioDeviceError {
    #[error("failed to open audio file: {0}")]
    Open(String),

    #[error("unsupported audio format: {0}")]
    Format(String),

    #[error("write failed: {0}")]
    Write(String),
}

/// Produces captured audio frames
///
/// `next_frame` returns `None` when the source is exhausted; a live
/// microphone source never is.
pub trait CaptureSource: Send {
    fn next_frame(&mut self) -> Option<AudioFrame>;

    fn sample_rate(&self) -> SampleRate;
}

/// Consumes playback audio frames
pub trait PlaybackSink: Send {
    fn play(&mut self, frame: &AudioFrame) -> Result<(), AudioDeviceError>;
}

/// Infinite silence, 20ms frames. Stands in for a muted microphone.
pub struct SilenceSource {
    sample_rate: SampleRate,
    sequence: u64,
}

impl SilenceSource {
    pub fn new(sample_rate: SampleRate) -> Self {
        Self {
            sample_rate,
            sequence: 0,
        }
    }
}

impl CaptureSource for SilenceSource {
    fn next_frame(&mut self) -> Option<AudioFrame> {
        let samples = vec![0.0f32; self.sample_rate.frame_size_20ms()];
        let frame = AudioFrame::new(samples, self.sample_rate, Channels::Mono, self.sequence);
        self.sequence += 1;
        Some(frame)
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

/// Reads 20ms frames from a WAV file, mono 16-bit PCM
pub struct WavFileSource {
    samples: Vec<f32>,
    offset: usize,
    sample_rate: SampleRate,
    sequence: u64,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AudioDeviceError> {
        let reader = hound::WavReader::open(path.as_ref())
            .map_err(|e| AudioDeviceError::Open(e.to_string()))?;
        let spec = reader.spec();

        if spec.channels != 1 {
            return Err(AudioDeviceError::Format(format!(
                "expected mono input, got {} channels",
                spec.channels
            )));
        }
        let sample_rate = SampleRate::from_u32(spec.sample_rate).ok_or_else(|| {
            AudioDeviceError::Format(format!("unsupported sample rate {}", spec.sample_rate))
        })?;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => reader
                .into_samples::<i16>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / 32768.0)
                .collect(),
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .filter_map(|s| s.ok())
                .collect(),
        };

        Ok(Self {
            samples,
            offset: 0,
            sample_rate,
            sequence: 0,
        })
    }
}

impl CaptureSource for WavFileSource {
    fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.offset >= self.samples.len() {
            return None;
        }
        let frame_len = self.sample_rate.frame_size_20ms();
        let end = (self.offset + frame_len).min(self.samples.len());
        let chunk = self.samples[self.offset..end].to_vec();
        self.offset = end;

        let frame = AudioFrame::new(chunk, self.sample_rate, Channels::Mono, self.sequence);
        self.sequence += 1;
        Some(frame)
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

/// Writes played frames to a WAV file, mono 16-bit PCM
pub struct WavFileSink {
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
}

impl WavFileSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: SampleRate) -> Result<Self, AudioDeviceError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: sample_rate.as_u32(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path.as_ref(), spec)
            .map_err(|e| AudioDeviceError::Open(e.to_string()))?;
        Ok(Self { writer })
    }

    pub fn finalize(self) -> Result<(), AudioDeviceError> {
        self.writer
            .finalize()
            .map_err(|e| AudioDeviceError::Write(e.to_string()))
    }
}

impl PlaybackSink for WavFileSink {
    fn play(&mut self, frame: &AudioFrame) -> Result<(), AudioDeviceError> {
        for &sample in frame.samples.iter() {
            let pcm16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            self.writer
                .write_sample(pcm16)
                .map_err(|e| AudioDeviceError::Write(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_source_is_infinite() {
        let mut source = SilenceSource::new(SampleRate::Hz16000);
        for i in 0..5 {
            let frame = source.next_frame().unwrap();
            assert_eq!(frame.sequence, i);
            assert_eq!(frame.samples.len(), 320);
            assert!(frame.is_likely_silence(-45.0));
        }
    }

    #[test]
    fn test_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = WavFileSink::create(&path, SampleRate::Hz16000).unwrap();
        let frame = AudioFrame::new(vec![0.5; 480], SampleRate::Hz16000, Channels::Mono, 0);
        sink.play(&frame).unwrap();
        sink.finalize().unwrap();

        let mut source = WavFileSource::open(&path).unwrap();
        let first = source.next_frame().unwrap();
        assert_eq!(first.samples.len(), 320); // one 20ms frame
        let second = source.next_frame().unwrap();
        assert_eq!(second.samples.len(), 160); // remainder
        assert!(source.next_frame().is_none());
    }
}
