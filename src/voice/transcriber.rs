//! Transcript sources
//!
//! A transcript source turns a continuous audio stream into finalized
//! utterance strings. The microphone-backed implementation glues capture,
//! segmentation and remote STT together.

use std::time::Duration;

use async_trait::async_trait;

use crate::timing::SttTiming;
use crate::voice::capture::{AudioCapture, SAMPLE_RATE, rms, samples_to_wav};
use crate::voice::segmenter::UtteranceSegmenter;
use crate::voice::stt::SpeechToText;
use crate::{Error, Result};

/// How often captured audio is drained into the segmenter
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Speech-to-text capability driven by the listening loop
#[async_trait]
pub trait TranscriptSource: Send {
    /// Apply speech timing; takes effect on the next `start`
    fn configure(&mut self, timing: SttTiming);

    /// Begin consuming audio
    ///
    /// # Errors
    ///
    /// Returns error if the audio input cannot be opened
    async fn start(&mut self) -> Result<()>;

    /// Stop consuming audio; calling it while stopped is a no-op
    ///
    /// # Errors
    ///
    /// Returns error if the underlying engine fails to shut down cleanly
    async fn stop(&mut self) -> Result<()>;

    /// Wait for the next finalized utterance
    ///
    /// Returns `None` when an utterance finalized but produced no text. This
    /// future may be dropped at any await point; doing so loses at most the
    /// utterance currently being transcribed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transcript` on recognition failures
    async fn next_utterance(&mut self) -> Result<Option<String>>;

    /// Record for a fixed duration and transcribe everything heard
    ///
    /// # Errors
    ///
    /// Returns `Error::Transcript` if the source is not started or recognition fails
    async fn record_for(&mut self, duration: Duration) -> Result<String>;
}

/// Microphone capture, energy segmentation and remote STT
pub struct MicTranscriber {
    capture: AudioCapture,
    segmenter: UtteranceSegmenter,
    stt: SpeechToText,
    timing: SttTiming,
    energy_threshold: f32,
}

impl MicTranscriber {
    /// Create an idle transcriber
    #[must_use]
    pub fn new(stt: SpeechToText, energy_threshold: f32) -> Self {
        let timing = SttTiming::default();
        Self {
            capture: AudioCapture::new(),
            segmenter: UtteranceSegmenter::new(SAMPLE_RATE, energy_threshold, &timing),
            stt,
            timing,
            energy_threshold,
        }
    }

    fn ensure_capturing(&self) -> Result<()> {
        if self.capture.is_capturing() {
            Ok(())
        } else {
            Err(Error::Transcript("transcriber is not started".to_string()))
        }
    }

    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        self.stt.transcribe(wav).await
    }
}

#[async_trait]
impl TranscriptSource for MicTranscriber {
    fn configure(&mut self, timing: SttTiming) {
        self.timing = timing;
    }

    async fn start(&mut self) -> Result<()> {
        self.segmenter.configure(&self.timing);
        self.segmenter.reset();
        self.capture.clear_buffer();
        self.capture.start()?;
        tracing::info!(
            energy_threshold = self.energy_threshold,
            silence_timeout = self.timing.silence_timeout.as_secs_f64(),
            "transcriber started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.capture.stop();
        self.segmenter.reset();
        tracing::info!("transcriber stopped");
        Ok(())
    }

    async fn next_utterance(&mut self) -> Result<Option<String>> {
        loop {
            self.ensure_capturing()?;
            tokio::time::sleep(POLL_INTERVAL).await;

            let chunk = self.capture.take_buffer();
            if chunk.is_empty() {
                continue;
            }

            if let Some(samples) = self.segmenter.process(&chunk) {
                tracing::debug!(samples = samples.len(), "transcribing utterance");
                let text = self.transcribe(&samples).await?;
                return Ok((!text.is_empty()).then_some(text));
            }
        }
    }

    async fn record_for(&mut self, duration: Duration) -> Result<String> {
        self.ensure_capturing()?;
        self.capture.clear_buffer();
        tokio::time::sleep(duration).await;

        let samples = self.capture.take_buffer();
        let energy = rms(&samples);
        tracing::debug!(samples = samples.len(), energy, "test recording finished");

        if samples.is_empty() || energy <= self.energy_threshold {
            return Ok(String::new());
        }
        self.transcribe(&samples).await
    }
}
