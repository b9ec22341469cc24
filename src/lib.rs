//! Afya Voice - Voice front-end for a bilingual health assistant
//!
//! This library provides the core functionality for hands-free health
//! questions in English and Swahili:
//! - Continuous speech recognition with a quiet-window finalizer
//! - Assistant backend client (`POST /voice/process`)
//! - Spoken replies at a slightly slower rate, one at a time
//! - Session orchestration and language switching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                       │
//! │        Console (afya)   │   Embedding apps          │
//! └────────────────────┬────────────────────────────────┘
//!                      │ SessionHandle (commands, snapshots)
//! ┌────────────────────▼────────────────────────────────┐
//! │                  VoiceSession                       │
//! │ Recognition │ Finalizer │ Assistant │ Playback      │
//! └───────┬──────────────────────┬────────────┬─────────┘
//!         │                      │            │
//! ┌───────▼──────────┐   ┌───────▼─────┐ ┌────▼─────────┐
//! │ Mic + cloud STT  │   │ Assistant   │ │ Cloud TTS +  │
//! │ (CaptureEngine)  │   │ backend     │ │ speaker      │
//! └──────────────────┘   └─────────────┘ └──────────────┘
//! ```

pub mod config;
pub mod error;
pub mod language;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use language::LanguageTag;
pub use session::{
    Assistant, AssistantReply, HttpAssistant, PlaybackController, PlaybackHandle,
    RecognitionEngine, RecognitionErrorKind, RecognitionEvent, RecognitionSession, SessionCommand,
    SessionHandle, SessionSettings, SessionSnapshot, SessionState, SpeechRequest, Synthesizer,
    Utterance, UtteranceFinalizer, VoiceSession,
};
