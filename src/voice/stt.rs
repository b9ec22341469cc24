//! Speech-to-text (STT) processing

use std::time::Duration;

use reqwest::StatusCode;

use crate::config::{Config, SttProvider};
use crate::{Error, LanguageTag, Result};

/// Bound on one transcription request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Text recognized from a block of audio
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// Recognized text
    pub text: String,
    /// Provider confidence, 0 when the provider reports none
    pub confidence: f32,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create an STT client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the selected provider has no API key
    pub fn from_config(config: &Config) -> Result<Self> {
        let model = config.voice.stt_model.clone();
        match config.voice.stt_provider {
            SttProvider::Whisper => {
                Self::new_whisper(config.api_keys.openai.clone().unwrap_or_default(), model)
            }
            SttProvider::Deepgram => {
                Self::new_deepgram(config.api_keys.deepgram.clone().unwrap_or_default(), model)
            }
        }
    }

    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Transcribe WAV audio
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    /// * `language` - Expected spoken language
    /// * `alternatives` - Alternatives to request, where the provider supports it
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if credentials are rejected, otherwise an STT
    /// or HTTP error
    pub async fn transcribe(
        &self,
        audio: &[u8],
        language: LanguageTag,
        alternatives: u8,
    ) -> Result<Transcript> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio, language).await,
            SttProvider::Deepgram => {
                self.transcribe_deepgram(audio, language, alternatives)
                    .await
            }
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8], language: LanguageTag) -> Result<Transcript> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", language.code());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("Whisper", status, &body));
        }

        let result: WhisperResponse = response.json().await?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(Transcript {
            text: result.text.trim().to_string(),
            confidence: 0.0,
        })
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(
        &self,
        audio: &[u8],
        language: LanguageTag,
        alternatives: u8,
    ) -> Result<Transcript> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true&language={}&alternatives={}",
            self.model,
            deepgram_language(language),
            alternatives.max(1)
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("Deepgram", status, &body));
        }

        let result: DeepgramResponse = response.json().await?;

        let transcript = result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map_or_else(
                || Transcript {
                    text: String::new(),
                    confidence: 0.0,
                },
                |a| Transcript {
                    text: a.transcript.trim().to_string(),
                    confidence: a.confidence.clamp(0.0, 1.0),
                },
            );

        tracing::debug!(transcript = %transcript.text, confidence = transcript.confidence, "transcription complete");
        Ok(transcript)
    }
}

/// Deepgram language parameter
const fn deepgram_language(language: LanguageTag) -> &'static str {
    match language {
        LanguageTag::English => "en-US",
        LanguageTag::Swahili => "sw",
    }
}

/// Map a failed provider response to an error
fn status_error(provider: &str, status: StatusCode, body: &str) -> Error {
    tracing::error!(provider, status = %status, body, "STT API error");

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::Auth(format!("{provider} rejected credentials ({status})"))
    } else {
        Error::Stt(format!("{provider} API error {status}: {body}"))
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(REQUEST_TIMEOUT)
        .build()?)
}
