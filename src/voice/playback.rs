//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Extra time allowed past the nominal clip length before giving up on the device
const COMPLETION_GRACE: Duration = Duration::from_millis(500);

/// Local audio output capability
///
/// Implementations block until playback has finished.
pub trait AudioSink: Send + Sync {
    /// Play MP3-encoded audio to completion
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if decoding or the output device fails
    fn play_mp3(&self, mp3_data: &[u8]) -> Result<()>;
}

/// Decoded mono PCM
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Clip length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Plays audio to the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioPlayback;

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self)
    }

    /// Play mono f32 samples, blocking until done
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be opened
    pub fn play_samples(&self, audio: &DecodedAudio) -> Result<()> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device".to_string()))?;

        let config = output_config(&device, audio.sample_rate)?;
        let channels = usize::from(config.channels);

        let samples: Arc<[f32]> = if config.sample_rate.0 == audio.sample_rate {
            Arc::from(audio.samples.as_slice())
        } else {
            tracing::debug!(
                from = audio.sample_rate,
                to = config.sample_rate.0,
                "resampling for output device"
            );
            Arc::from(resample(&audio.samples, audio.sample_rate, config.sample_rate.0)?)
        };
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Release);
                                0.0
                            });
                            frame.fill(sample);
                            pos = (pos + 1).min(samples.len());
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Playback(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        // Poll for completion with timeout
        let start = Instant::now();
        let timeout = audio.duration() + COMPLETION_GRACE;
        while !finished.load(Ordering::Acquire) {
            if start.elapsed() > timeout {
                tracing::warn!("playback did not report completion, stopping stream");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        drop(stream);
        tracing::debug!(samples = samples.len(), "playback complete");

        Ok(())
    }
}

impl AudioSink for AudioPlayback {
    fn play_mp3(&self, mp3_data: &[u8]) -> Result<()> {
        let audio = decode_mp3(mp3_data)?;
        tracing::debug!(
            sample_rate = audio.sample_rate,
            seconds = audio.duration().as_secs_f64(),
            "decoded reply audio"
        );
        self.play_samples(&audio)
    }
}

/// Pick a mono (or stereo) output config, at `sample_rate` when the device supports it
///
/// Otherwise the nearest rate the first mono or stereo config offers; the
/// caller resamples to it.
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .collect();

    if let Some(exact) = configs
        .iter()
        .find(|c| supports(*c, 1))
        .or_else(|| configs.iter().find(|c| supports(*c, 2)))
    {
        return Ok(exact.clone().with_sample_rate(rate).config());
    }

    configs
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| configs.iter().find(|c| c.channels() == 2))
        .map(|c| {
            let nearest =
                SampleRate(sample_rate.clamp(c.min_sample_rate().0, c.max_sample_rate().0));
            c.clone().with_sample_rate(nearest).config()
        })
        .ok_or_else(|| Error::Playback("no mono or stereo output config".to_string()))
}

/// Resample mono audio using rubato
///
/// The final partial chunk is zero-padded and the output trimmed to the
/// converted length, so short clips keep their tail.
///
/// # Errors
///
/// Returns `Error::Playback` if the resampler cannot be built or fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, 1024, 2, 1)
        .map_err(|e| Error::Playback(format!("resampler init failed: {e}")))?;
    // The resampler may round the requested chunk up to its FFT size
    let chunk_size = resampler.input_frames_next();

    let mut output = Vec::new();
    for chunk in samples.chunks(chunk_size) {
        let mut input: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        input.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[input], None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    output.truncate(expected);
    Ok(output)
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns `Error::Playback` if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Playback("no audio frames in response".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_mp3(b"definitely not an mp3").unwrap_err();
        assert!(matches!(err, Error::Playback(_)));
    }

    #[test]
    fn test_resample_keeps_clip_length() {
        let clip = vec![0.25_f32; 22_050];

        let up = resample(&clip, 22_050, 44_100).unwrap();
        assert_eq!(up.len(), 44_100);

        let down = resample(&clip, 22_050, 16_000).unwrap();
        assert_eq!(down.len(), 16_000);
    }

    #[test]
    fn test_resample_same_rate_is_passthrough() {
        let clip = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&clip, 24_000, 24_000).unwrap(), clip);
    }

    #[test]
    fn test_decoded_duration() {
        let audio = DecodedAudio {
            samples: vec![0.0; 22_050],
            sample_rate: 44_100,
        };
        assert_eq!(audio.duration(), Duration::from_millis(500));

        let empty = DecodedAudio {
            samples: Vec::new(),
            sample_rate: 0,
        };
        assert_eq!(empty.duration(), Duration::ZERO);
    }
}
