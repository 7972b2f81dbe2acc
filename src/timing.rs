//! Timing configuration shared between the presentation layer and the worker loops
//!
//! Every field is stored as the bit pattern of an `f64` inside an `AtomicU64`, so
//! sliders can be moved from any thread while the listening loop and the speech
//! coordinator read fresh values without taking a lock.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Timing knobs for listening and speaking, all in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Silence after speech that ends an utterance
    pub silence_timeout: f64,
    /// Shortest recording that counts as an utterance
    pub min_recording_length: f64,
    /// Minimum gap between the end of one recording and the start of the next
    pub min_gap_between_recordings: f64,
    /// Suppression window measured from the last speaking-state timestamp
    pub post_speech_buffer: f64,
    /// Extra wait after playback reports completion
    pub audio_finish_delay: f64,
    /// Wait before signalling that listening may resume
    pub safety_delay: f64,
    /// Expected upper bound on playback duration (monitoring only)
    pub speaking_timeout: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            silence_timeout: 1.5,
            min_recording_length: 0.3,
            min_gap_between_recordings: 0.2,
            post_speech_buffer: 1.0,
            audio_finish_delay: 0.3,
            safety_delay: 0.5,
            speaking_timeout: 10.0,
        }
    }
}

impl TimingConfig {
    /// Read a field by name
    #[must_use]
    pub const fn get(&self, field: TimingField) -> f64 {
        match field {
            TimingField::SilenceTimeout => self.silence_timeout,
            TimingField::MinRecordingLength => self.min_recording_length,
            TimingField::MinGapBetweenRecordings => self.min_gap_between_recordings,
            TimingField::PostSpeechBuffer => self.post_speech_buffer,
            TimingField::AudioFinishDelay => self.audio_finish_delay,
            TimingField::SafetyDelay => self.safety_delay,
            TimingField::SpeakingTimeout => self.speaking_timeout,
        }
    }

    /// Read a field as a `Duration`
    #[must_use]
    pub fn duration(&self, field: TimingField) -> Duration {
        Duration::from_secs_f64(self.get(field))
    }

    /// The subset forwarded to the transcript source
    #[must_use]
    pub fn stt(&self) -> SttTiming {
        SttTiming {
            silence_timeout: self.duration(TimingField::SilenceTimeout),
            min_recording_length: self.duration(TimingField::MinRecordingLength),
            min_gap_between_recordings: self.duration(TimingField::MinGapBetweenRecordings),
        }
    }

    /// Check that every field is a positive, finite number of seconds
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        for field in TimingField::ALL {
            check_seconds(field, self.get(field))?;
        }
        Ok(())
    }
}

/// Timing values the transcript source consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SttTiming {
    pub silence_timeout: Duration,
    pub min_recording_length: Duration,
    pub min_gap_between_recordings: Duration,
}

impl Default for SttTiming {
    fn default() -> Self {
        TimingConfig::default().stt()
    }
}

/// Names a single timing field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingField {
    SilenceTimeout,
    MinRecordingLength,
    MinGapBetweenRecordings,
    PostSpeechBuffer,
    AudioFinishDelay,
    SafetyDelay,
    SpeakingTimeout,
}

impl TimingField {
    /// Every field, in storage order
    pub const ALL: [Self; 7] = [
        Self::SilenceTimeout,
        Self::MinRecordingLength,
        Self::MinGapBetweenRecordings,
        Self::PostSpeechBuffer,
        Self::AudioFinishDelay,
        Self::SafetyDelay,
        Self::SpeakingTimeout,
    ];

    /// Snake-case name used in config files and console commands
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SilenceTimeout => "silence_timeout",
            Self::MinRecordingLength => "min_recording_length",
            Self::MinGapBetweenRecordings => "min_gap_between_recordings",
            Self::PostSpeechBuffer => "post_speech_buffer",
            Self::AudioFinishDelay => "audio_finish_delay",
            Self::SafetyDelay => "safety_delay",
            Self::SpeakingTimeout => "speaking_timeout",
        }
    }

    /// Whether the transcript source must be restarted to pick up a change
    #[must_use]
    pub const fn requires_restart(self) -> bool {
        matches!(
            self,
            Self::SilenceTimeout | Self::MinRecordingLength | Self::MinGapBetweenRecordings
        )
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TimingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimingField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|field| field.name() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown timing field: {s}")))
    }
}

/// Lock-free, shareable `TimingConfig`
///
/// Pass an `Arc<SharedTiming>` to every component at construction.
#[derive(Debug)]
pub struct SharedTiming {
    fields: [AtomicU64; 7],
}

impl SharedTiming {
    /// Create shared timing from an initial configuration
    #[must_use]
    pub fn new(initial: TimingConfig) -> Self {
        Self {
            fields: TimingField::ALL.map(|field| AtomicU64::new(initial.get(field).to_bits())),
        }
    }

    /// Current value of a field in seconds
    #[must_use]
    pub fn get(&self, field: TimingField) -> f64 {
        f64::from_bits(self.fields[field.index()].load(Ordering::Acquire))
    }

    /// Current value of a field as a `Duration`
    #[must_use]
    pub fn duration(&self, field: TimingField) -> Duration {
        Duration::from_secs_f64(self.get(field))
    }

    /// Update a single field
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `seconds` is not a positive, finite number
    pub fn set(&self, field: TimingField, seconds: f64) -> Result<()> {
        check_seconds(field, seconds)?;
        self.fields[field.index()].store(seconds.to_bits(), Ordering::Release);
        tracing::debug!(field = field.name(), seconds, "timing updated");
        Ok(())
    }

    /// Copy of every field
    ///
    /// Fields are read one by one, so a snapshot taken during a concurrent
    /// update may mix old and new values of different fields.
    #[must_use]
    pub fn snapshot(&self) -> TimingConfig {
        TimingConfig {
            silence_timeout: self.get(TimingField::SilenceTimeout),
            min_recording_length: self.get(TimingField::MinRecordingLength),
            min_gap_between_recordings: self.get(TimingField::MinGapBetweenRecordings),
            post_speech_buffer: self.get(TimingField::PostSpeechBuffer),
            audio_finish_delay: self.get(TimingField::AudioFinishDelay),
            safety_delay: self.get(TimingField::SafetyDelay),
            speaking_timeout: self.get(TimingField::SpeakingTimeout),
        }
    }

    /// Values forwarded to the transcript source
    #[must_use]
    pub fn stt(&self) -> SttTiming {
        self.snapshot().stt()
    }
}

impl Default for SharedTiming {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}

fn check_seconds(field: TimingField, seconds: f64) -> Result<()> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{field} must be a positive number of seconds, got {seconds}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TimingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_set_and_snapshot() {
        let timing = SharedTiming::default();
        timing.set(TimingField::PostSpeechBuffer, 2.25).unwrap();

        assert!((timing.get(TimingField::PostSpeechBuffer) - 2.25).abs() < f64::EPSILON);
        assert!((timing.snapshot().post_speech_buffer - 2.25).abs() < f64::EPSILON);
        assert_eq!(
            timing.duration(TimingField::PostSpeechBuffer),
            Duration::from_millis(2250)
        );
    }

    #[test]
    fn test_rejects_non_positive() {
        let timing = SharedTiming::default();

        assert!(timing.set(TimingField::SafetyDelay, 0.0).is_err());
        assert!(timing.set(TimingField::SafetyDelay, -1.0).is_err());
        assert!(timing.set(TimingField::SafetyDelay, f64::NAN).is_err());
        assert!((timing.get(TimingField::SafetyDelay) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_field_names_round_trip() {
        for field in TimingField::ALL {
            assert_eq!(field.name().parse::<TimingField>().unwrap(), field);
        }
        assert_eq!(
            "Post-Speech-Buffer".parse::<TimingField>().unwrap(),
            TimingField::PostSpeechBuffer
        );
        assert!("volume".parse::<TimingField>().is_err());
    }

    #[test]
    fn test_only_stt_fields_require_restart() {
        let restart: Vec<_> = TimingField::ALL
            .into_iter()
            .filter(|f| f.requires_restart())
            .collect();

        assert_eq!(
            restart,
            vec![
                TimingField::SilenceTimeout,
                TimingField::MinRecordingLength,
                TimingField::MinGapBetweenRecordings,
            ]
        );
    }
}
