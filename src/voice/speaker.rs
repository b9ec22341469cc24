//! Cloud TTS output
//!
//! [`CloudSynthesizer`] synthesizes with the configured provider and plays the
//! result on the default speaker. A request that is overtaken by a newer
//! `speak` or by `cancel_all` while it is still synthesizing never reaches
//! the speaker.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use super::playback::{decode_for_playback, spawn_playback};
use super::tts::TextToSpeech;
use crate::session::{PlaybackDone, PlaybackHandle, SpeechRequest, Synthesizer};
use crate::{Error, Result};

/// Produces reply audio at the playback rate
#[async_trait]
pub trait SpeechSource: Send + Sync {
    /// Render `request` to mono samples
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or decoding fails
    async fn render(&self, request: &SpeechRequest) -> Result<Vec<f32>>;
}

#[async_trait]
impl SpeechSource for TextToSpeech {
    async fn render(&self, request: &SpeechRequest) -> Result<Vec<f32>> {
        let audio = self
            .synthesize(&request.text, request.language, request.rate)
            .await?;
        decode_for_playback(&audio)
    }
}

/// Starts audible playback; raising the flag stops it early
pub type Player = Box<dyn Fn(Vec<f32>, Arc<AtomicBool>, PlaybackDone) + Send + Sync>;

/// Synthesizer backed by a cloud TTS provider and the local speaker
pub struct CloudSynthesizer<S = TextToSpeech> {
    source: S,
    player: Player,
    generation: AtomicU64,
    active: Mutex<Option<Arc<AtomicBool>>>,
}

impl CloudSynthesizer {
    /// Speak through `tts` on the default output device
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self::with_player(tts, Box::new(spawn_playback))
    }
}

impl<S: SpeechSource> CloudSynthesizer<S> {
    /// Speak audio from `source` through `player`
    #[must_use]
    pub fn with_player(source: S, player: Player) -> Self {
        Self {
            source,
            player,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    fn halt_active(&self) {
        let active = self.active.lock().ok().and_then(|mut active| active.take());
        if let Some(stop) = active {
            stop.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl<S: SpeechSource> Synthesizer for CloudSynthesizer<S> {
    async fn speak(&self, request: SpeechRequest) -> Result<PlaybackHandle> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if (request.pitch - 1.0).abs() > f32::EPSILON {
            tracing::debug!(pitch = request.pitch, "pitch is not adjustable with cloud TTS");
        }

        let samples = self.source.render(&request).await?;

        let mut active = self
            .active
            .lock()
            .map_err(|_| Error::Audio("playback state poisoned".to_string()))?;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("speech superseded before playback");
            return Ok(PlaybackHandle::finished());
        }

        if let Some(previous) = active.take() {
            previous.store(true, Ordering::SeqCst);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (handle, done) = PlaybackHandle::channel();
        (self.player)(samples, Arc::clone(&stop), done);
        *active = Some(stop);
        drop(active);

        Ok(handle)
    }

    fn cancel_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.halt_active();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::{Notify, mpsc};

    use super::*;
    use crate::LanguageTag;

    /// Renders one marker sample per request; "slow" waits for the gate
    struct Gated {
        gate: Arc<Notify>,
        rendering: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl SpeechSource for Gated {
        async fn render(&self, request: &SpeechRequest) -> Result<Vec<f32>> {
            let _ = self.rendering.send(request.text.clone());
            if request.text == "slow" {
                self.gate.notified().await;
            }
            Ok(vec![marker(&request.text)])
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn marker(text: &str) -> f32 {
        text.len() as f32
    }

    type Played = Arc<Mutex<Vec<(Vec<f32>, Arc<AtomicBool>)>>>;

    struct Rig {
        synth: Arc<CloudSynthesizer<Gated>>,
        gate: Arc<Notify>,
        rendering: mpsc::UnboundedReceiver<String>,
        played: Played,
    }

    fn rig() -> Rig {
        let gate = Arc::new(Notify::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let played: Played = Arc::default();

        let log = Arc::clone(&played);
        let player: Player = Box::new(move |samples, stop, done| {
            log.lock().unwrap().push((samples, stop));
            done.finish();
        });

        let source = Gated {
            gate: Arc::clone(&gate),
            rendering: tx,
        };

        Rig {
            synth: Arc::new(CloudSynthesizer::with_player(source, player)),
            gate,
            rendering: rx,
            played,
        }
    }

    fn request(text: &str) -> SpeechRequest {
        SpeechRequest {
            text: text.to_string(),
            language: LanguageTag::English,
            rate: 0.9,
            pitch: 1.0,
        }
    }

    #[tokio::test]
    async fn test_speak_plays_rendered_audio() {
        let rig = rig();

        let handle = rig.synth.speak(request("rest")).await.unwrap();

        assert!(handle.wait(Duration::from_secs(1)).await);
        let played = rig.played.lock().unwrap();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].0, [marker("rest")]);
    }

    #[tokio::test]
    async fn test_newer_speak_wins_over_slow_synthesis() {
        let mut rig = rig();

        let synth = Arc::clone(&rig.synth);
        let slow = tokio::spawn(async move { synth.speak(request("slow")).await });
        assert_eq!(rig.rendering.recv().await.as_deref(), Some("slow"));

        rig.synth.speak(request("newer reply")).await.unwrap();
        rig.gate.notify_one();

        // The overtaken request resolves without reaching the speaker
        let stale = slow.await.unwrap().unwrap();
        assert!(stale.wait(Duration::from_secs(1)).await);

        let played = rig.played.lock().unwrap();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].0, [marker("newer reply")]);
        assert!(!played[0].1.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_all_drops_synthesis_in_progress() {
        let mut rig = rig();

        let synth = Arc::clone(&rig.synth);
        let slow = tokio::spawn(async move { synth.speak(request("slow")).await });
        assert_eq!(rig.rendering.recv().await.as_deref(), Some("slow"));

        rig.synth.cancel_all();
        rig.gate.notify_one();

        slow.await.unwrap().unwrap();
        assert!(rig.played.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_speak_stops_previous_playback() {
        let rig = rig();

        rig.synth.speak(request("first")).await.unwrap();
        rig.synth.speak(request("second")).await.unwrap();

        let played = rig.played.lock().unwrap();
        assert_eq!(played.len(), 2);
        assert!(played[0].1.load(Ordering::SeqCst));
        assert!(!played[1].1.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_all_stops_active_playback() {
        let rig = rig();

        rig.synth.speak(request("first")).await.unwrap();
        rig.synth.cancel_all();

        assert!(rig.played.lock().unwrap()[0].1.load(Ordering::SeqCst));
    }
}
