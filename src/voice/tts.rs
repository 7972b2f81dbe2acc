//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::{Error, Result};

/// Remote speech synthesis capability
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`, returning encoded audio (MP3)
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` on any non-2xx response or transport failure
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// ElevenLabs voice tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.5,
            style: 0.0,
            use_speaker_boost: true,
        }
    }
}

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum TtsProvider {
    OpenAI { speed: f32 },
    ElevenLabs { settings: VoiceSettings },
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(
        api_key: SecretString,
        voice: String,
        model: String,
        speed: f32,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            model,
            provider: TtsProvider::OpenAI { speed },
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(
        api_key: SecretString,
        voice_id: String,
        model: String,
        settings: VoiceSettings,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            model,
            provider: TtsProvider::ElevenLabs { settings },
        })
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str, speed: f32) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        read_audio(response, "OpenAI").await
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str, settings: VoiceSettings) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: settings,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        read_audio(response, "ElevenLabs").await
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), voice = %self.voice, "synthesizing speech");
        match self.provider {
            TtsProvider::OpenAI { speed } => self.synthesize_openai(text, speed).await,
            TtsProvider::ElevenLabs { settings } => {
                self.synthesize_elevenlabs(text, settings).await
            }
        }
    }
}

/// Turn a TTS response into audio bytes, mapping non-2xx into `Error::Synthesis`
async fn read_audio(response: reqwest::Response, provider: &str) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, provider, "TTS API error");
        return Err(Error::Synthesis(format!("{provider} TTS error {status}: {body}")));
    }

    let audio = response
        .bytes()
        .await
        .map_err(|e| Error::Synthesis(e.to_string()))?;
    tracing::debug!(bytes = audio.len(), provider, "received synthesized audio");
    Ok(audio.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_settings_wire_format() {
        let json = serde_json::to_value(VoiceSettings::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "stability": 0.5,
                "similarity_boost": 0.5,
                "style": 0.0,
                "use_speaker_boost": true,
            })
        );
    }

    #[test]
    fn test_missing_key_rejected() {
        let empty = || SecretString::from(String::new());

        assert!(
            TextToSpeech::new_elevenlabs(
                empty(),
                "voice".to_string(),
                "eleven_monolingual_v1".to_string(),
                VoiceSettings::default(),
            )
            .is_err()
        );
        assert!(
            TextToSpeech::new_openai(empty(), "alloy".to_string(), "tts-1".to_string(), 1.0)
                .is_err()
        );
    }
}
