//! Configuration management
//!
//! Values resolve in order: environment variable, config file, built-in default.

pub mod file;

use std::time::Duration;

use crate::session::{
    DEFAULT_PITCH, DEFAULT_QUIET_WINDOW, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RESTART_GRACE,
    DEFAULT_SPEECH_RATE, DEFAULT_SPEECH_TIMEOUT,
};
use crate::{Error, LanguageTag, Result};

use file::AfyaConfigFile;

/// Default assistant backend
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Voice front-end configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Assistant backend configuration
    pub assistant: AssistantConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Assistant backend configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Base URL; requests go to `{base_url}/voice/process`
    pub base_url: String,

    /// Bound on a single request
    pub request_timeout: Duration,
}

/// Speech-to-text provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    /// `OpenAI` Whisper
    #[default]
    Whisper,
    /// Deepgram
    Deepgram,
}

/// Text-to-speech provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    /// `OpenAI` TTS
    #[default]
    OpenAI,
    /// `ElevenLabs`
    ElevenLabs,
}

impl std::str::FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Initial language
    pub language: LanguageTag,

    /// Quiet time before a transcript becomes an utterance
    pub quiet_window: Duration,

    /// Delay before recognition restarts after a language switch
    pub restart_grace: Duration,

    /// Bound on synthesizing a reply before playback starts
    pub speech_timeout: Duration,

    /// Speech rate multiplier (0.25 to 4.0)
    pub speech_rate: f32,

    /// Speech pitch multiplier
    pub pitch: f32,

    /// STT provider
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// TTS provider
    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1", "eleven_multilingual_v2")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,
}

/// API keys for speech providers
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn resolve(fc: AfyaConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let base_url = env("AFYA_BACKEND_URL")
            .or(fc.assistant.base_url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        if base_url.trim().is_empty() {
            return Err(Error::Config("assistant base URL is empty".to_string()));
        }

        let request_timeout = millis(
            "AFYA_REQUEST_TIMEOUT_MS",
            env("AFYA_REQUEST_TIMEOUT_MS"),
            fc.assistant.request_timeout_ms,
        )?
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let assistant = AssistantConfig {
            base_url,
            request_timeout,
        };

        let language = env("AFYA_LANGUAGE")
            .or(fc.voice.language)
            .map(|s| s.parse::<LanguageTag>())
            .transpose()?
            .unwrap_or_default();

        let quiet_window = millis(
            "AFYA_QUIET_WINDOW_MS",
            env("AFYA_QUIET_WINDOW_MS"),
            fc.voice.quiet_window_ms,
        )?
        .unwrap_or(DEFAULT_QUIET_WINDOW);

        let restart_grace = fc
            .voice
            .restart_grace_ms
            .map_or(DEFAULT_RESTART_GRACE, Duration::from_millis);

        let speech_timeout = millis(
            "AFYA_SPEECH_TIMEOUT_MS",
            env("AFYA_SPEECH_TIMEOUT_MS"),
            fc.voice.speech_timeout_ms,
        )?
        .unwrap_or(DEFAULT_SPEECH_TIMEOUT);

        let speech_rate = fc.voice.speech_rate.unwrap_or(DEFAULT_SPEECH_RATE);
        if !(speech_rate > 0.25 && speech_rate <= 4.0) {
            return Err(Error::Config(format!(
                "speech rate must be in (0.25, 4.0], got {speech_rate}"
            )));
        }

        let stt_provider = env("AFYA_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map(|s| s.parse::<SttProvider>())
            .transpose()?
            .unwrap_or_default();

        let stt_model = env("AFYA_STT_MODEL").or(fc.voice.stt_model).unwrap_or_else(|| {
            match stt_provider {
                SttProvider::Whisper => "whisper-1",
                SttProvider::Deepgram => "nova-2",
            }
            .to_string()
        });

        let tts_provider = env("AFYA_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map(|s| s.parse::<TtsProvider>())
            .transpose()?
            .unwrap_or_default();

        let tts_model = env("AFYA_TTS_MODEL").or(fc.voice.tts_model).unwrap_or_else(|| {
            match tts_provider {
                TtsProvider::OpenAI => "tts-1",
                TtsProvider::ElevenLabs => "eleven_multilingual_v2",
            }
            .to_string()
        });

        let tts_voice = env("AFYA_TTS_VOICE")
            .or(fc.voice.tts_voice)
            .unwrap_or_else(|| "alloy".to_string());

        let voice = VoiceConfig {
            language,
            quiet_window,
            restart_grace,
            speech_timeout,
            speech_rate,
            pitch: fc.voice.pitch.unwrap_or(DEFAULT_PITCH),
            stt_provider,
            stt_model,
            tts_provider,
            tts_model,
            tts_voice,
        };

        Ok(Self {
            assistant,
            voice,
            api_keys,
        })
    }
}

/// Parse a millisecond duration from env (preferred) or file, rejecting zero
fn millis(name: &str, env: Option<String>, file: Option<u64>) -> Result<Option<Duration>> {
    let value = match env {
        Some(raw) => Some(
            raw.trim()
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("{name}: {e}")))?,
        ),
        None => file,
    };

    match value {
        Some(0) => Err(Error::Config(format!("{name} must be greater than zero"))),
        other => Ok(other.map(Duration::from_millis)),
    }
}
