//! Speech synthesizer coordinator
//!
//! Owns the speaking flag. One reply is spoken at a time; the flag is raised
//! before synthesis starts and always lowered afterwards, whatever failed.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::events::{Event, EventSender, Indicator};
use crate::timing::{SharedTiming, TimingField};
use crate::voice::playback::AudioSink;
use crate::voice::speaking::SpeakingState;
use crate::voice::tts::SpeechSynthesizer;
use crate::{Error, Result};

/// Synthesizes replies and plays them while holding the speaking flag
pub struct SpeechCoordinator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    speaking: Arc<SpeakingState>,
    timing: Arc<SharedTiming>,
    events: EventSender,
    in_flight: Mutex<()>,
}

impl SpeechCoordinator {
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
        speaking: Arc<SpeakingState>,
        timing: Arc<SharedTiming>,
        events: EventSender,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            speaking,
            timing,
            events,
            in_flight: Mutex::new(()),
        }
    }

    /// Shared speaking state written by this coordinator
    #[must_use]
    pub fn speaking(&self) -> &Arc<SpeakingState> {
        &self.speaking
    }

    /// Speak `text`, returning once listening may resume
    ///
    /// Concurrent calls queue. On return the speaking flag is down and its
    /// timestamp marks the start of the post-speech window, then `safety_delay`
    /// has elapsed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` or `Error::Playback`; the flag is cleared either way
    pub async fn speak(&self, text: &str) -> Result<()> {
        self.speak_with(text, || {}).await
    }

    /// Like [`SpeechCoordinator::speak`], calling `on_start` once this reply
    /// holds the speaker and before the flag is raised
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` or `Error::Playback`; the flag is cleared either way
    pub async fn speak_with(&self, text: &str, on_start: impl FnOnce() + Send) -> Result<()> {
        let _turn = self.in_flight.lock().await;
        on_start();

        self.speaking.begin();
        self.events.status("Speaking...");
        self.events.indicator(Indicator::Speaking);
        tracing::info!(chars = text.len(), "speaking reply");

        let result = self.synthesize_and_play(text).await;
        if result.is_ok() {
            tokio::time::sleep(self.timing.duration(TimingField::AudioFinishDelay)).await;
        }

        self.speaking.end();
        tracing::debug!(ok = result.is_ok(), "speaking flag cleared");

        tokio::time::sleep(self.timing.duration(TimingField::SafetyDelay)).await;
        result
    }

    async fn synthesize_and_play(&self, text: &str) -> Result<()> {
        let audio = self.synthesizer.synthesize(text).await?;

        let sink = Arc::clone(&self.sink);
        let mut playback = tokio::task::spawn_blocking(move || sink.play_mp3(&audio));

        let limit = self.timing.duration(TimingField::SpeakingTimeout);
        let started = Instant::now();
        let joined = tokio::select! {
            joined = &mut playback => joined,
            () = tokio::time::sleep(limit) => {
                let elapsed_secs = started.elapsed().as_secs_f64();
                tracing::warn!(elapsed_secs, "playback running past speaking timeout");
                self.events.publish(Event::SpeakingOverrun { elapsed_secs });
                playback.await
            }
        };

        joined.map_err(|e| Error::Playback(format!("playback task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::events;
    use crate::timing::TimingConfig;

    struct Synth {
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for Synth {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            if self.fail {
                Err(Error::Synthesis("401 unauthorized".to_string()))
            } else {
                Ok(vec![0xFF, 0xFB])
            }
        }
    }

    #[derive(Default)]
    struct Sink {
        fail: bool,
        plays: AtomicUsize,
    }

    impl AudioSink for Sink {
        fn play_mp3(&self, _mp3_data: &[u8]) -> Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Playback("device unplugged".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn fast_timing() -> Arc<SharedTiming> {
        Arc::new(SharedTiming::new(TimingConfig {
            audio_finish_delay: 0.01,
            safety_delay: 0.01,
            ..TimingConfig::default()
        }))
    }

    fn coordinator(synth_fails: bool, sink: Arc<Sink>) -> SpeechCoordinator {
        let (events, _rx) = events::channel();
        SpeechCoordinator::new(
            Arc::new(Synth { fail: synth_fails }),
            sink,
            Arc::new(SpeakingState::new()),
            fast_timing(),
            events,
        )
    }

    #[tokio::test]
    async fn test_speak_success_clears_flag() {
        let sink = Arc::new(Sink::default());
        let speech = coordinator(false, Arc::clone(&sink));

        speech.speak("hello").await.unwrap();

        assert!(!speech.speaking().is_speaking());
        assert!(speech.speaking().started_at().is_some());
        assert_eq!(sink.plays.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_synthesis_failure_clears_flag() {
        let sink = Arc::new(Sink::default());
        let speech = coordinator(true, Arc::clone(&sink));
        let before = Instant::now();

        let err = speech.speak("hello").await.unwrap_err();

        assert!(matches!(err, Error::Synthesis(_)));
        assert!(!speech.speaking().is_speaking());
        assert!(speech.speaking().started_at().unwrap() >= before);
        assert_eq!(sink.plays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_playback_failure_clears_flag() {
        let sink = Arc::new(Sink {
            fail: true,
            ..Sink::default()
        });
        let speech = coordinator(false, sink);

        let err = speech.speak("hello").await.unwrap_err();

        assert!(matches!(err, Error::Playback(_)));
        assert!(!speech.speaking().is_speaking());
    }

    #[tokio::test]
    async fn test_queued_reply_starts_after_previous_finishes() {
        let sink = Arc::new(Sink::default());
        let speech = coordinator(false, Arc::clone(&sink));
        let flag_at_start = std::sync::Mutex::new(Vec::new());

        let record = || {
            flag_at_start
                .lock()
                .unwrap()
                .push(speech.speaking().is_speaking());
        };
        let (first, second) = tokio::join!(
            speech.speak_with("first", record),
            speech.speak_with("second", record)
        );

        first.unwrap();
        second.unwrap();
        // Neither reply began while the other held the speaker
        assert_eq!(*flag_at_start.lock().unwrap(), [false, false]);
        assert_eq!(sink.plays.load(Ordering::SeqCst), 2);
    }
}
