//! Utterance segmentation
//!
//! Splits the microphone stream into utterances using RMS energy. The three
//! speech-timing knobs map directly onto the state machine: silence timeout ends
//! a recording, minimum recording length discards blips, and the minimum gap
//! keeps a new recording from starting right after the previous one.

use crate::timing::SttTiming;
use crate::voice::capture::rms;

/// Default energy above which a chunk counts as speech
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.02;

/// Hard cap on a single recording, in seconds
const MAX_RECORDING_SECS: usize = 30;

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Waiting for speech
    Idle,
    /// Accumulating an utterance
    Recording,
}

/// Energy-based utterance segmenter
#[derive(Debug)]
pub struct UtteranceSegmenter {
    sample_rate: u32,
    energy_threshold: f32,
    silence_samples: usize,
    min_recording_samples: usize,
    min_gap_samples: usize,
    state: SegmentState,
    buffer: Vec<f32>,
    silence_counter: usize,
    since_last_segment: usize,
}

impl UtteranceSegmenter {
    /// Create a segmenter for audio at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, energy_threshold: f32, timing: &SttTiming) -> Self {
        let mut segmenter = Self {
            sample_rate,
            energy_threshold,
            silence_samples: 0,
            min_recording_samples: 0,
            min_gap_samples: 0,
            state: SegmentState::Idle,
            buffer: Vec::new(),
            silence_counter: 0,
            since_last_segment: usize::MAX,
        };
        segmenter.configure(timing);
        segmenter
    }

    /// Apply new speech timing; takes effect from the next chunk
    pub fn configure(&mut self, timing: &SttTiming) {
        self.silence_samples = self.samples_for(timing.silence_timeout.as_secs_f64());
        self.min_recording_samples = self.samples_for(timing.min_recording_length.as_secs_f64());
        self.min_gap_samples = self.samples_for(timing.min_gap_between_recordings.as_secs_f64());
        tracing::debug!(
            silence_samples = self.silence_samples,
            min_recording_samples = self.min_recording_samples,
            min_gap_samples = self.min_gap_samples,
            "segmenter configured"
        );
    }

    /// Feed a chunk of samples
    ///
    /// Returns the finished utterance when this chunk completes one.
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let is_speech = rms(samples) > self.energy_threshold;

        match self.state {
            SegmentState::Idle => {
                self.since_last_segment = self.since_last_segment.saturating_add(samples.len());
                if is_speech && self.since_last_segment >= self.min_gap_samples {
                    self.state = SegmentState::Recording;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!("speech onset");
                }
                None
            }
            SegmentState::Recording => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                let max_samples = self.sample_rate as usize * MAX_RECORDING_SECS;
                if self.silence_counter < self.silence_samples && self.buffer.len() < max_samples {
                    return None;
                }

                let spoken = self.buffer.len().saturating_sub(self.silence_counter);
                if spoken >= self.min_recording_samples {
                    tracing::debug!(samples = self.buffer.len(), "utterance complete");
                    self.state = SegmentState::Idle;
                    self.silence_counter = 0;
                    self.since_last_segment = 0;
                    Some(std::mem::take(&mut self.buffer))
                } else {
                    tracing::trace!(samples = spoken, "recording too short, discarded");
                    self.reset();
                    None
                }
            }
        }
    }

    /// Drop any partial recording
    pub fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.buffer.clear();
        self.silence_counter = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmentState {
        self.state
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn samples_for(&self, seconds: f64) -> usize {
        (seconds * f64::from(self.sample_rate)).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::voice::SAMPLE_RATE;

    /// 100ms chunks, like the transcriber's poll interval
    const CHUNK_SECS: f32 = 0.1;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn sine(duration_secs: f32) -> Vec<f32> {
        let n = (SAMPLE_RATE as f32 * duration_secs) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn silence(duration_secs: f32) -> Vec<f32> {
        vec![0.0; (SAMPLE_RATE as f32 * duration_secs) as usize]
    }

    /// Feed audio in chunks, collecting completed utterances
    fn feed(segmenter: &mut UtteranceSegmenter, audio: &[f32]) -> Vec<Vec<f32>> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let chunk = (SAMPLE_RATE as f32 * CHUNK_SECS) as usize;
        audio
            .chunks(chunk)
            .filter_map(|c| segmenter.process(c))
            .collect()
    }

    fn segmenter() -> UtteranceSegmenter {
        UtteranceSegmenter::new(SAMPLE_RATE, DEFAULT_ENERGY_THRESHOLD, &SttTiming::default())
    }

    #[test]
    fn test_silence_never_records() {
        let mut seg = segmenter();
        assert!(feed(&mut seg, &silence(3.0)).is_empty());
        assert_eq!(seg.state(), SegmentState::Idle);
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut seg = segmenter();

        assert!(feed(&mut seg, &sine(0.8)).is_empty());
        assert_eq!(seg.state(), SegmentState::Recording);

        // 1.0s of silence is short of the 1.5s default timeout
        assert!(feed(&mut seg, &silence(1.0)).is_empty());

        let done = feed(&mut seg, &silence(0.6));
        assert_eq!(done.len(), 1);
        assert!(done[0].len() >= sine(0.8).len());
        assert_eq!(seg.state(), SegmentState::Idle);
    }

    #[test]
    fn test_blip_discarded() {
        let mut seg = segmenter();
        let mut audio = sine(0.1);
        audio.extend(silence(2.0));

        assert!(feed(&mut seg, &audio).is_empty());
        assert_eq!(seg.state(), SegmentState::Idle);
    }

    #[test]
    fn test_gap_between_recordings() {
        let mut seg = segmenter();
        let mut first = sine(0.5);
        first.extend(silence(1.5));
        assert_eq!(feed(&mut seg, &first).len(), 1);

        // Speech right after the previous recording falls inside the 0.2s gap
        feed(&mut seg, &sine(0.1));
        assert_eq!(seg.state(), SegmentState::Idle);

        feed(&mut seg, &sine(0.1));
        assert_eq!(seg.state(), SegmentState::Recording);
    }

    #[test]
    fn test_configure_changes_silence_timeout() {
        let mut seg = segmenter();
        seg.configure(&SttTiming {
            silence_timeout: Duration::from_millis(500),
            ..SttTiming::default()
        });

        let mut audio = sine(0.5);
        audio.extend(silence(0.6));
        assert_eq!(feed(&mut seg, &audio).len(), 1);
    }
}
