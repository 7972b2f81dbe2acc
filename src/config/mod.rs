//! Configuration management for the Ada voice assistant
//!
//! Resolution order: built-in defaults, then the TOML file, then environment.

pub mod file;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use secrecy::SecretString;

use crate::conversation::ChatSettings;
use crate::timing::TimingConfig;
use crate::voice::{DEFAULT_ENERGY_THRESHOLD, VoiceSettings};
use crate::{Error, Result};

use file::AdaConfigFile;

/// Default persona prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Ada, a warm and curious AI companion. \
Keep responses conversational and relatively brief since this is a voice conversation.";

/// Default ElevenLabs voice
const DEFAULT_ELEVENLABS_VOICE: &str = "ThT5KcBeYPX3keUQqHPh";

/// Ada voice assistant configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub assistant: AssistantConfig,
    pub chat: ChatConfig,
    pub speech: SpeechConfig,
    pub transcription: TranscriptionConfig,
    pub timing: TimingConfig,
    pub api_keys: ApiKeys,
}

/// Assistant identity
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Name shown on reply lines
    pub name: String,

    /// Wake phrases in priority order
    pub wake_words: Vec<String>,

    /// Persona message kept at the head of every conversation
    pub system_prompt: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "Ada".to_string(),
            wake_words: vec![
                "hey ada".to_string(),
                "ada".to_string(),
                "hello ada".to_string(),
            ],
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Chat completion configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Exchanges kept besides the system message
    pub max_history_pairs: usize,
    pub base_url: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            max_history_pairs: 15,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Text-to-speech backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeechProvider {
    #[default]
    ElevenLabs,
    OpenAI,
}

impl FromStr for SpeechProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAI),
            other => Err(Error::Config(format!("unknown speech provider: {other}"))),
        }
    }
}

impl fmt::Display for SpeechProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElevenLabs => f.write_str("elevenlabs"),
            Self::OpenAI => f.write_str("openai"),
        }
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub provider: SpeechProvider,

    /// ElevenLabs voice ID or `OpenAI` voice name
    pub voice_id: String,

    /// TTS model (e.g. "`eleven_monolingual_v1`", "tts-1")
    pub model: String,

    /// ElevenLabs voice tuning
    pub voice_settings: VoiceSettings,

    /// Speed multiplier (`OpenAI` only)
    pub speed: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: SpeechProvider::ElevenLabs,
            voice_id: DEFAULT_ELEVENLABS_VOICE.to_string(),
            model: "eleven_monolingual_v1".to_string(),
            voice_settings: VoiceSettings::default(),
            speed: 1.0,
        }
    }
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptionProvider {
    #[default]
    Whisper,
    Deepgram,
}

impl FromStr for TranscriptionProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!(
                "unknown transcription provider: {other}"
            ))),
        }
    }
}

impl fmt::Display for TranscriptionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whisper => f.write_str("whisper"),
            Self::Deepgram => f.write_str("deepgram"),
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub provider: TranscriptionProvider,
    pub model: String,
    pub language: String,
    pub energy_threshold: f32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: TranscriptionProvider::Whisper,
            model: "whisper-1".to_string(),
            language: "en".to_string(),
            energy_threshold: DEFAULT_ENERGY_THRESHOLD,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
    pub deepgram: Option<SecretString>,
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unusable or the result fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        let config = Self::resolve(fc, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay a parsed config file and environment lookups onto the defaults
    ///
    /// Environment wins over the file, the file wins over defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized
    pub fn resolve(fc: AdaConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secret = |var: &str, file_value: Option<String>| {
            env(var)
                .or(file_value)
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from)
        };

        let api_keys = ApiKeys {
            openai: secret("OPENAI_API_KEY", fc.api_keys.openai),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
        };

        let defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            name: fc.assistant.name.unwrap_or(defaults.name),
            wake_words: env("ADA_WAKE_WORDS")
                .map(|v| v.split(',').map(|w| w.trim().to_string()).collect())
                .or(fc.assistant.wake_words)
                .unwrap_or(defaults.wake_words),
            system_prompt: fc.assistant.system_prompt.unwrap_or(defaults.system_prompt),
        };

        let defaults = ChatConfig::default();
        let chat = ChatConfig {
            model: env("ADA_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or(defaults.model),
            max_tokens: fc.chat.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: fc.chat.temperature.unwrap_or(defaults.temperature),
            max_history_pairs: fc
                .chat
                .max_history_pairs
                .unwrap_or(defaults.max_history_pairs),
            base_url: fc.chat.base_url.unwrap_or(defaults.base_url),
        };

        let provider = env("ADA_TTS_PROVIDER")
            .or(fc.speech.provider)
            .map(|p| p.parse::<SpeechProvider>())
            .transpose()?
            .unwrap_or_default();
        let (default_voice, default_model) = match provider {
            SpeechProvider::ElevenLabs => (DEFAULT_ELEVENLABS_VOICE, "eleven_monolingual_v1"),
            SpeechProvider::OpenAI => ("alloy", "tts-1"),
        };
        let voice_defaults = VoiceSettings::default();
        let speech = SpeechConfig {
            provider,
            voice_id: fc.speech.voice_id.unwrap_or_else(|| default_voice.to_string()),
            model: fc.speech.model.unwrap_or_else(|| default_model.to_string()),
            voice_settings: VoiceSettings {
                stability: fc.speech.stability.unwrap_or(voice_defaults.stability),
                similarity_boost: fc
                    .speech
                    .similarity_boost
                    .unwrap_or(voice_defaults.similarity_boost),
                style: fc.speech.style.unwrap_or(voice_defaults.style),
                use_speaker_boost: fc
                    .speech
                    .use_speaker_boost
                    .unwrap_or(voice_defaults.use_speaker_boost),
            },
            speed: fc.speech.speed.unwrap_or(1.0),
        };

        let provider = env("ADA_STT_PROVIDER")
            .or(fc.transcription.provider)
            .map(|p| p.parse::<TranscriptionProvider>())
            .transpose()?
            .unwrap_or_default();
        let default_model = match provider {
            TranscriptionProvider::Whisper => "whisper-1",
            TranscriptionProvider::Deepgram => "nova-2",
        };
        let transcription = TranscriptionConfig {
            provider,
            model: fc
                .transcription
                .model
                .unwrap_or_else(|| default_model.to_string()),
            language: fc.transcription.language.unwrap_or_else(|| "en".to_string()),
            energy_threshold: fc
                .transcription
                .energy_threshold
                .unwrap_or(DEFAULT_ENERGY_THRESHOLD),
        };

        let defaults = TimingConfig::default();
        let t = fc.timing;
        let timing = TimingConfig {
            silence_timeout: t.silence_timeout.unwrap_or(defaults.silence_timeout),
            min_recording_length: t
                .min_recording_length
                .unwrap_or(defaults.min_recording_length),
            min_gap_between_recordings: t
                .min_gap_between_recordings
                .unwrap_or(defaults.min_gap_between_recordings),
            post_speech_buffer: t.post_speech_buffer.unwrap_or(defaults.post_speech_buffer),
            audio_finish_delay: t.audio_finish_delay.unwrap_or(defaults.audio_finish_delay),
            safety_delay: t.safety_delay.unwrap_or(defaults.safety_delay),
            speaking_timeout: t.speaking_timeout.unwrap_or(defaults.speaking_timeout),
        };

        Ok(Self {
            assistant,
            chat,
            speech,
            transcription,
            timing,
            api_keys,
        })
    }

    /// Check invariants that would otherwise fail at session start
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.assistant.wake_words.iter().all(|w| w.trim().is_empty()) {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }
        if self.chat.max_history_pairs == 0 {
            return Err(Error::Config(
                "chat.max_history_pairs must be at least 1".to_string(),
            ));
        }
        self.timing.validate()
    }

    /// Settings for the chat completion client
    #[must_use]
    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            base_url: self.chat.base_url.clone(),
            model: self.chat.model.clone(),
            max_tokens: self.chat.max_tokens,
            temperature: self.chat.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn resolve(toml_src: &str, env: &[(&str, &str)]) -> Result<Config> {
        let fc: AdaConfigFile = toml::from_str(toml_src).unwrap();
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::resolve(fc, |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve("", &[]).unwrap();

        assert_eq!(config.assistant.name, "Ada");
        assert_eq!(config.assistant.wake_words, ["hey ada", "ada", "hello ada"]);
        assert_eq!(config.chat.model, "gpt-3.5-turbo");
        assert_eq!(config.chat.max_history_pairs, 15);
        assert_eq!(config.speech.provider, SpeechProvider::ElevenLabs);
        assert_eq!(config.speech.voice_id, DEFAULT_ELEVENLABS_VOICE);
        assert_eq!(config.transcription.model, "whisper-1");
        assert_eq!(config.timing, TimingConfig::default());
        assert!(config.api_keys.openai.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let config = resolve(
            r#"
            [chat]
            model = "from-file"

            [api_keys]
            openai = "sk-file"
            "#,
            &[
                ("ADA_CHAT_MODEL", "from-env"),
                ("OPENAI_API_KEY", "sk-env"),
                ("ADA_WAKE_WORDS", "computer, hey computer"),
            ],
        )
        .unwrap();

        assert_eq!(config.chat.model, "from-env");
        assert_eq!(
            config.api_keys.openai.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-env".to_string())
        );
        assert_eq!(config.assistant.wake_words, ["computer", "hey computer"]);
    }

    #[test]
    fn test_openai_speech_defaults() {
        let config = resolve("[speech]\nprovider = \"openai\"", &[]).unwrap();
        assert_eq!(config.speech.provider, SpeechProvider::OpenAI);
        assert_eq!(config.speech.voice_id, "alloy");
        assert_eq!(config.speech.model, "tts-1");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(resolve("", &[("ADA_STT_PROVIDER", "carrier-pigeon")]).is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = resolve("[chat]\nmax_history_pairs = 0", &[]).unwrap();
        assert!(config.validate().is_err());

        config.chat.max_history_pairs = 1;
        config.timing.safety_delay = 0.0;
        assert!(config.validate().is_err());

        config.timing.safety_delay = 0.5;
        config.assistant.wake_words = vec![" ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keys_redacted_in_debug() {
        let config = resolve("", &[("OPENAI_API_KEY", "sk-very-secret")]).unwrap();
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }
}
