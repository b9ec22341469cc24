//! TOML configuration file loading
//!
//! Supports `~/.config/afya/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AfyaConfigFile {
    /// Assistant backend configuration
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for speech providers
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Assistant backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// Base URL of the assistant service (e.g. `http://localhost:8000`)
    pub base_url: Option<String>,

    /// Request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Initial language (`en`, `sw`, `en-US`, `sw-KE`)
    pub language: Option<String>,

    /// Quiet window before a transcript is finalized, in milliseconds
    pub quiet_window_ms: Option<u64>,

    /// Delay before recognition restarts after a language switch, in milliseconds
    pub restart_grace_ms: Option<u64>,

    /// Bound on reply synthesis before playback starts, in milliseconds
    pub speech_timeout_ms: Option<u64>,

    /// Speech rate multiplier
    pub speech_rate: Option<f32>,

    /// Speech pitch multiplier
    pub pitch: Option<f32>,

    /// STT provider (`whisper` or `deepgram`)
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: Option<String>,

    /// TTS provider (`openai` or `elevenlabs`)
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `AfyaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> AfyaConfigFile {
    config_file_path().map_or_else(AfyaConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> AfyaConfigFile {
    if !path.exists() {
        return AfyaConfigFile::default();
    }

    match std::fs::read_to_string(path) {
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
                AfyaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            AfyaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/afya/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("afya").join("config.toml"))
}
