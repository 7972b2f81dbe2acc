//! TOML configuration file loading
//!
//! Supports `~/.config/ada/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AdaConfigFile {
    /// Assistant identity and wake words
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Chat completion settings
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Text-to-speech settings
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Speech-to-text settings
    #[serde(default)]
    pub transcription: TranscriptionFileConfig,

    /// Listening and speaking timing, in seconds
    #[serde(default)]
    pub timing: TimingFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// Display name used for replies (e.g. "Ada")
    pub name: Option<String>,

    /// Wake phrases in priority order
    pub wake_words: Option<Vec<String>>,

    /// Persona prompt sent as the first message
    pub system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Model identifier (e.g. "gpt-3.5-turbo")
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Exchanges kept in history besides the system message
    pub max_history_pairs: Option<usize>,
    /// OpenAI-compatible API root
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// "elevenlabs" or "openai"
    pub provider: Option<String>,
    pub voice_id: Option<String>,
    pub model: Option<String>,
    pub stability: Option<f32>,
    pub similarity_boost: Option<f32>,
    pub style: Option<f32>,
    pub use_speaker_boost: Option<bool>,
    /// Speed multiplier (`OpenAI` only)
    pub speed: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TranscriptionFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    /// RMS energy above which audio counts as speech
    pub energy_threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimingFileConfig {
    pub silence_timeout: Option<f64>,
    pub min_recording_length: Option<f64>,
    pub min_gap_between_recordings: Option<f64>,
    pub post_speech_buffer: Option<f64>,
    pub audio_finish_delay: Option<f64>,
    pub safety_delay: Option<f64>,
    pub speaking_timeout: Option<f64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file
///
/// With `explicit` set, the caller named the path, so a missing or broken file
/// is an error. Otherwise the standard path is used and any problem falls back
/// to `AdaConfigFile::default()`.
///
/// # Errors
///
/// Returns error only for an explicit path that cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<AdaConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(AdaConfigFile::default());
    };

    if !path.exists() {
        return Ok(AdaConfigFile::default());
    }

    let config = match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                AdaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            AdaConfigFile::default()
        }
    };

    Ok(config)
}

/// Return the config file path: `~/.config/ada/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("ada").join("config.toml"))
}
