//! Voice processing module
//!
//! Handles microphone capture, speech segmentation, cloud STT/TTS and speaker
//! playback. [`CaptureEngine`] and [`CloudSynthesizer`] plug these into the
//! session as its recognition engine and speech output.

mod activity;
mod capture;
mod engine;
mod playback;
mod speaker;
mod stt;
mod tts;

pub use activity::{ActivityState, ActivityUpdate, SpeechActivity};
pub use capture::{AudioCapture, SAMPLE_RATE, input_available, levels, samples_to_wav};
pub use engine::CaptureEngine;
pub use playback::{
    AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_for_playback, decode_mp3, duration_of, resample,
    spawn_playback, tone,
};
pub use speaker::{CloudSynthesizer, Player, SpeechSource};
pub use stt::{SpeechToText, Transcript};
pub use tts::TextToSpeech;
