//! Text-to-speech (TTS) processing

use std::time::Duration;

use crate::config::{Config, TtsProvider};
use crate::{Error, LanguageTag, Result};

/// Bound on one synthesis request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Slowest speed `ElevenLabs` accepts
const ELEVENLABS_MIN_SPEED: f32 = 0.7;

/// Fastest speed `ElevenLabs` accepts
const ELEVENLABS_MAX_SPEED: f32 = 1.2;

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a TTS client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the selected provider has no API key
    pub fn from_config(config: &Config) -> Result<Self> {
        let voice = config.voice.tts_voice.clone();
        let model = config.voice.tts_model.clone();
        match config.voice.tts_provider {
            TtsProvider::OpenAI => {
                Self::new_openai(config.api_keys.openai.clone().unwrap_or_default(), voice, model)
            }
            TtsProvider::ElevenLabs => Self::new_elevenlabs(
                config.api_keys.elevenlabs.clone().unwrap_or_default(),
                voice,
                model,
            ),
        }
    }

    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: http_client()?,
            api_key,
            voice,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using `ElevenLabs`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: http_client()?,
            api_key,
            voice: voice_id,
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Synthesize text to speech
    ///
    /// Returns MP3 audio bytes.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, language: LanguageTag, speed: f32) -> Result<Vec<u8>> {
        tracing::debug!(
            chars = text.len(),
            language = %language,
            speed,
            "synthesizing speech"
        );

        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text, speed).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, language, speed).await,
        }
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str, speed: f32) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SpeechBody<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let body = SpeechBody {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Synthesize using `ElevenLabs` TTS
    async fn synthesize_elevenlabs(
        &self,
        text: &str,
        language: LanguageTag,
        speed: f32,
    ) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct VoiceSettings {
            speed: f32,
        }

        #[derive(serde::Serialize)]
        struct SpeechBody<'a> {
            text: &'a str,
            model_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            language_code: Option<&'static str>,
            voice_settings: VoiceSettings,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let body = SpeechBody {
            text,
            model_id: &self.model,
            language_code: accepts_language_code(&self.model).then_some(language.code()),
            voice_settings: VoiceSettings {
                speed: speed.clamp(ELEVENLABS_MIN_SPEED, ELEVENLABS_MAX_SPEED),
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Only the v2.5 `ElevenLabs` models take an explicit language
fn accepts_language_code(model: &str) -> bool {
    model.contains("v2_5")
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(REQUEST_TIMEOUT)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_code_only_for_v2_5_models() {
        assert!(accepts_language_code("eleven_turbo_v2_5"));
        assert!(accepts_language_code("eleven_flash_v2_5"));
        assert!(!accepts_language_code("eleven_multilingual_v2"));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let result = TextToSpeech::new_openai(String::new(), "alloy".into(), "tts-1".into());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_provider_gives_up_before_the_session() {
        assert!(REQUEST_TIMEOUT < crate::session::DEFAULT_SPEECH_TIMEOUT);
    }
}
