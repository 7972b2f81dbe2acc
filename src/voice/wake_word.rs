//! Wake word gate
//!
//! Decides what a finalized transcript means: self-feedback to drop, chatter
//! without a wake phrase, a wake phrase on its own, or a command to forward.

use tokio::time::Instant;

use crate::timing::{TimingConfig, TimingField};
use crate::voice::SpeakingState;
use crate::{Error, Result};

/// Transcripts shorter than this (after trimming) are ignored
const MIN_UTTERANCE_CHARS: usize = 3;

/// A command must be longer than this to be forwarded
const MIN_COMMAND_CHARS: usize = 2;

/// One finalized transcript and when it arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub received_at: Instant,
}

impl Utterance {
    /// Wrap a transcript that arrived just now
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self::at(text, Instant::now())
    }

    /// Wrap a transcript with an explicit arrival time
    #[must_use]
    pub fn at(text: impl Into<String>, received_at: Instant) -> Self {
        Self {
            text: text.into(),
            received_at,
        }
    }
}

/// Outcome of evaluating one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Arrived during or just after the assistant's own speech
    Suppressed,
    /// Too short, or no wake phrase present
    NoMatch,
    /// Wake phrase heard with no meaningful command after it
    AwaitingCommand { wake_word: String },
    /// Wake phrase followed by a command
    Command { wake_word: String, text: String },
}

/// Matches transcripts against an ordered list of wake phrases
#[derive(Debug, Clone)]
pub struct WakeWordGate {
    wake_words: Vec<String>,
}

impl WakeWordGate {
    /// Create a gate
    ///
    /// # Arguments
    ///
    /// * `wake_words` - Trigger phrases in priority order (e.g., "hey ada", "ada")
    ///
    /// # Errors
    ///
    /// Returns error if no non-blank wake phrase is given
    pub fn new(wake_words: Vec<String>) -> Result<Self> {
        let normalized: Vec<String> = wake_words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        if normalized.is_empty() {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }

        tracing::debug!(wake_words = ?normalized, "wake word gate initialized");

        Ok(Self {
            wake_words: normalized,
        })
    }

    /// Evaluate an utterance against the speaking state and timing
    ///
    /// Suppression is checked first, so nothing heard while the assistant is
    /// speaking (or inside the post-speech buffer) can ever match.
    #[must_use]
    pub fn evaluate(
        &self,
        utterance: &Utterance,
        speaking: &SpeakingState,
        timing: &TimingConfig,
    ) -> GateDecision {
        let text = utterance.text.trim();

        if speaking.suppresses(
            utterance.received_at,
            timing.duration(TimingField::PostSpeechBuffer),
        ) {
            tracing::debug!(transcript = text, "ignoring possible feedback");
            return GateDecision::Suppressed;
        }

        if text.chars().count() < MIN_UTTERANCE_CHARS {
            return GateDecision::NoMatch;
        }

        match self.match_wake_word(text) {
            Some((wake_word, command)) if command.chars().count() > MIN_COMMAND_CHARS => {
                tracing::info!(wake_word, command = command.as_str(), "wake word detected");
                GateDecision::Command {
                    wake_word: wake_word.to_string(),
                    text: command,
                }
            }
            Some((wake_word, _)) => {
                tracing::info!(wake_word, "wake word detected without command");
                GateDecision::AwaitingCommand {
                    wake_word: wake_word.to_string(),
                }
            }
            None => {
                tracing::debug!(transcript = text, "no wake word");
                GateDecision::NoMatch
            }
        }
    }

    /// Find the first configured wake phrase contained in `transcript`
    ///
    /// Returns the phrase and the trimmed text after its first occurrence.
    /// Matching and extraction are case-insensitive; the command is lowercased.
    #[must_use]
    pub fn match_wake_word(&self, transcript: &str) -> Option<(&str, String)> {
        let lower = transcript.to_lowercase();

        self.wake_words.iter().find_map(|wake_word| {
            lower.find(wake_word.as_str()).map(|pos| {
                let command = extract_command(&lower[pos + wake_word.len()..]);
                (wake_word.as_str(), command)
            })
        })
    }

    /// Get the configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }
}

/// Trim the text following a wake phrase down to the command
fn extract_command(rest: &str) -> String {
    rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?'))
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn gate() -> WakeWordGate {
        WakeWordGate::new(vec![
            "hey ada".to_string(),
            "ada".to_string(),
            "hello ada".to_string(),
        ])
        .unwrap()
    }

    fn evaluate(text: &str) -> GateDecision {
        gate().evaluate(
            &Utterance::new(text),
            &SpeakingState::new(),
            &TimingConfig::default(),
        )
    }

    #[test]
    fn test_command_after_wake_word() {
        assert_eq!(
            evaluate("hey ada what is the weather"),
            GateDecision::Command {
                wake_word: "hey ada".to_string(),
                text: "what is the weather".to_string(),
            }
        );
    }

    #[test]
    fn test_wake_word_alone_asks_for_command() {
        assert_eq!(
            evaluate("ada"),
            GateDecision::AwaitingCommand {
                wake_word: "ada".to_string()
            }
        );
        assert_eq!(
            evaluate("Hey Ada, ok"),
            GateDecision::AwaitingCommand {
                wake_word: "hey ada".to_string()
            }
        );
    }

    #[test]
    fn test_no_wake_word() {
        assert_eq!(evaluate("what's the weather"), GateDecision::NoMatch);
    }

    #[test]
    fn test_short_utterance_ignored() {
        assert_eq!(evaluate("  hi  "), GateDecision::NoMatch);
        assert_eq!(evaluate(""), GateDecision::NoMatch);
    }

    #[test]
    fn test_first_listed_phrase_wins() {
        // "ada" appears earlier in the text, but "hey ada" is listed first
        assert_eq!(
            evaluate("ada said hey ada turn on the lights"),
            GateDecision::Command {
                wake_word: "hey ada".to_string(),
                text: "turn on the lights".to_string(),
            }
        );
    }

    #[test]
    fn test_case_and_punctuation() {
        assert_eq!(
            evaluate("HEY ADA, Tell Me A Joke."),
            GateDecision::Command {
                wake_word: "hey ada".to_string(),
                text: "tell me a joke.".to_string(),
            }
        );
    }

    #[test]
    fn test_suppressed_while_speaking() {
        let speaking = SpeakingState::new();
        speaking.begin();

        for text in ["hey ada what is the weather", "what's the weather", "hi"] {
            assert_eq!(
                gate().evaluate(&Utterance::new(text), &speaking, &TimingConfig::default()),
                GateDecision::Suppressed
            );
        }
    }

    #[test]
    fn test_suppressed_inside_post_speech_buffer() {
        let speaking = SpeakingState::new();
        let t0 = Instant::now();
        speaking.begin_at(t0);
        speaking.end_at(t0 + Duration::from_secs(4));
        let timing = TimingConfig {
            post_speech_buffer: 1.0,
            ..TimingConfig::default()
        };

        let inside = Utterance::at("hey ada hello there", t0 + Duration::from_millis(4_900));
        assert_eq!(gate().evaluate(&inside, &speaking, &timing), GateDecision::Suppressed);

        let after = Utterance::at("hey ada hello there", t0 + Duration::from_millis(5_100));
        assert!(matches!(
            gate().evaluate(&after, &speaking, &timing),
            GateDecision::Command { .. }
        ));
    }

    #[test]
    fn test_blank_wake_words_rejected() {
        assert!(WakeWordGate::new(vec!["  ".to_string()]).is_err());
        assert!(WakeWordGate::new(Vec::new()).is_err());
    }
}
