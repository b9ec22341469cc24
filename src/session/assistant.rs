//! Remote health assistant client
//!
//! One request/response exchange per utterance. No retries happen here; a
//! failure is returned to the orchestrator, which decides what to say.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::Utterance;
use crate::{Error, LanguageTag, Result};

/// Path of the voice processing endpoint, relative to the base URL
pub const PROCESS_PATH: &str = "/voice/process";

/// Reply from the assistant backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantReply {
    /// A message to read back to the user
    Message {
        /// Reply text
        message: String,
        /// Language the backend detected, if it is one we support
        detected_language: Option<LanguageTag>,
    },
    /// The backend answered but had nothing usable to say
    NotUnderstood,
}

/// Something that answers utterances
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Send an utterance and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestFailed`] on transport failure or a
    /// non-success response status
    async fn send(&self, utterance: &Utterance) -> Result<AssistantReply>;
}

/// Request body for `POST /voice/process`
#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    text: &'a str,
    language: LanguageTag,
    confidence: f32,
}

/// Response body from `POST /voice/process`
#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detected_language: Option<String>,
}

/// Assistant reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpAssistant {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAssistant {
    /// Create a client for the backend at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Config("assistant base URL is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{base_url}{PROCESS_PATH}"),
        })
    }

    /// Full URL requests are posted to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn send(&self, utterance: &Utterance) -> Result<AssistantReply> {
        let request = ProcessRequest {
            text: &utterance.text,
            language: utterance.language,
            confidence: utterance.confidence,
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            language = %utterance.language,
            confidence = utterance.confidence,
            "sending utterance"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "assistant request failed");
                Error::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "assistant returned error status");
            return Err(Error::RequestFailed(format!("status {status}")));
        }

        let body: ProcessResponse = response
            .json()
            .await
            .map_err(|e| Error::RequestFailed(format!("invalid response body: {e}")))?;

        Ok(interpret(body))
    }
}

/// Turn a decoded response into a reply
fn interpret(body: ProcessResponse) -> AssistantReply {
    match body.message {
        Some(message) if !message.trim().is_empty() => AssistantReply::Message {
            message,
            detected_language: LanguageTag::from_detected(body.detected_language.as_deref()),
        },
        _ => AssistantReply::NotUnderstood,
    }
}
