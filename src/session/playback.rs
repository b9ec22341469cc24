//! Playback of assistant replies
//!
//! The [`PlaybackController`] guarantees at most one synthesized utterance is
//! audible: every `speak` first cancels whatever the output is playing or
//! still preparing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{Error, LanguageTag, Result};

/// Speech rate used for health guidance (slightly slower than normal)
pub const DEFAULT_SPEECH_RATE: f32 = 0.9;

/// Neutral pitch
pub const DEFAULT_PITCH: f32 = 1.0;

/// A request to synthesize and play text
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    /// Text to speak
    pub text: String,
    /// Voice language
    pub language: LanguageTag,
    /// Rate multiplier (1.0 = normal)
    pub rate: f32,
    /// Pitch multiplier (1.0 = neutral)
    pub pitch: f32,
}

/// Completion signal for one playback
///
/// Resolves when audio finishes. Resolves as not completed if the playback
/// was cancelled or the output dropped its end.
#[derive(Debug)]
pub struct PlaybackHandle {
    done: oneshot::Receiver<()>,
}

/// Output side of a [`PlaybackHandle`]
#[derive(Debug)]
pub struct PlaybackDone(oneshot::Sender<()>);

impl PlaybackDone {
    /// Signal that playback finished
    pub fn finish(self) {
        let _ = self.0.send(());
    }
}

impl PlaybackHandle {
    /// Create a linked handle and completion signal
    #[must_use]
    pub fn channel() -> (Self, PlaybackDone) {
        let (tx, rx) = oneshot::channel();
        (Self { done: rx }, PlaybackDone(tx))
    }

    /// A handle that is already complete
    #[must_use]
    pub fn finished() -> Self {
        let (handle, done) = Self::channel();
        done.finish();
        handle
    }

    /// Wait for playback to end, giving up after `timeout`
    ///
    /// Returns `true` only if playback ran to completion in time.
    pub async fn wait(self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, self.done).await, Ok(Ok(())))
    }
}

/// A speech output device
///
/// Implementations own the output stream exclusively.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize and start playing `request`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback cannot start
    async fn speak(&self, request: SpeechRequest) -> Result<PlaybackHandle>;

    /// Stop everything playing or queued
    fn cancel_all(&self);
}

/// Plays replies one at a time, newest wins
pub struct PlaybackController {
    output: Arc<dyn Synthesizer>,
    rate: f32,
    pitch: f32,
    starting: Option<JoinHandle<Result<PlaybackHandle>>>,
    current: Option<PlaybackHandle>,
}

impl PlaybackController {
    /// Create a controller with the default rate and pitch
    #[must_use]
    pub fn new(output: Arc<dyn Synthesizer>) -> Self {
        Self::with_voice(output, DEFAULT_SPEECH_RATE, DEFAULT_PITCH)
    }

    /// Create a controller with an explicit rate and pitch
    #[must_use]
    pub fn with_voice(output: Arc<dyn Synthesizer>, rate: f32, pitch: f32) -> Self {
        Self {
            output,
            rate,
            pitch,
            starting: None,
            current: None,
        }
    }

    /// Speak `message`, pre-empting anything already playing
    ///
    /// Returns once playback has started; it does not wait for the audio to
    /// finish.
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot synthesize or play the message
    pub async fn speak(&mut self, message: &str, language: LanguageTag) -> Result<()> {
        self.cancel();

        let Some(request) = self.request(message, language) else {
            return Ok(());
        };

        let handle = self.output.speak(request).await?;
        self.current = Some(handle);
        Ok(())
    }

    /// Start speaking `message` in the background, pre-empting anything
    /// already playing
    ///
    /// Synthesis runs on its own task and is abandoned after `timeout`.
    /// Resolve it with [`started`](Self::started) while
    /// [`is_starting`](Self::is_starting) holds.
    pub fn begin(&mut self, message: &str, language: LanguageTag, timeout: Duration) {
        self.cancel();

        let Some(request) = self.request(message, language) else {
            return;
        };

        let output = Arc::clone(&self.output);
        self.starting = Some(tokio::spawn(async move {
            tokio::time::timeout(timeout, output.speak(request))
                .await
                .unwrap_or_else(|_| {
                    output.cancel_all();
                    Err(Error::Tts(format!(
                        "playback did not start within {}ms",
                        timeout.as_millis()
                    )))
                })
        }));
    }

    /// Whether a [`begin`](Self::begin) is still synthesizing
    #[must_use]
    pub const fn is_starting(&self) -> bool {
        self.starting.is_some()
    }

    /// Wait for the background start to resolve
    ///
    /// Cancel-safe; pends forever when nothing is starting.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis failed, timed out or its task died
    pub async fn started(&mut self) -> Result<()> {
        let Some(task) = self.starting.as_mut() else {
            return std::future::pending().await;
        };

        let joined = task.await;
        self.starting = None;

        let handle = joined
            .unwrap_or_else(|e| Err(Error::Tts(format!("playback task failed: {e}"))))?;
        self.current = Some(handle);
        Ok(())
    }

    /// Cancel current playback and any synthesis still running
    pub fn cancel(&mut self) {
        if let Some(task) = self.starting.take() {
            task.abort();
        }
        self.output.cancel_all();
        self.current = None;
    }

    /// Wait for the current playback to finish, bounded by `timeout`
    ///
    /// Returns `true` if there was playback and it completed in time.
    pub async fn wait_finished(&mut self, timeout: Duration) -> bool {
        match self.current.take() {
            Some(handle) => handle.wait(timeout).await,
            None => false,
        }
    }

    fn request(&self, message: &str, language: LanguageTag) -> Option<SpeechRequest> {
        if message.trim().is_empty() {
            tracing::debug!("nothing to speak");
            return None;
        }

        tracing::debug!(language = %language, chars = message.len(), "speaking");
        Some(SpeechRequest {
            text: message.to_string(),
            language,
            rate: self.rate,
            pitch: self.pitch,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Synthesizer for Log {
        async fn speak(&self, request: SpeechRequest) -> Result<PlaybackHandle> {
            self.events.lock().unwrap().push(format!("speak:{}", request.text));
            Ok(PlaybackHandle::finished())
        }

        fn cancel_all(&self) {
            self.events.lock().unwrap().push("cancel".to_string());
        }
    }

    #[tokio::test]
    async fn test_speak_cancels_before_each_utterance() {
        let log = Arc::new(Log::default());
        let mut controller = PlaybackController::new(log.clone());

        controller.speak("first", LanguageTag::English).await.unwrap();
        controller.speak("second", LanguageTag::English).await.unwrap();

        assert_eq!(
            *log.events.lock().unwrap(),
            ["cancel", "speak:first", "cancel", "speak:second"]
        );
        assert!(controller.wait_finished(Duration::from_millis(10)).await);
    }

    /// Output whose synthesis never finishes
    #[derive(Default)]
    struct Stalled {
        cancels: AtomicUsize,
    }

    #[async_trait]
    impl Synthesizer for Stalled {
        async fn speak(&self, _request: SpeechRequest) -> Result<PlaybackHandle> {
            std::future::pending().await
        }

        fn cancel_all(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_begin_resolves_in_background() {
        let log = Arc::new(Log::default());
        let mut controller = PlaybackController::new(log.clone());

        controller.begin("rest well", LanguageTag::English, Duration::from_secs(5));
        assert!(controller.is_starting());

        controller.started().await.unwrap();
        assert!(!controller.is_starting());
        assert_eq!(*log.events.lock().unwrap(), ["cancel", "speak:rest well"]);
        assert!(controller.wait_finished(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_begin_with_blank_message_starts_nothing() {
        let log = Arc::new(Log::default());
        let mut controller = PlaybackController::new(log.clone());

        controller.begin("  ", LanguageTag::Swahili, Duration::from_secs(5));
        assert!(!controller.is_starting());
        assert_eq!(*log.events.lock().unwrap(), ["cancel"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_synthesis_times_out() {
        let output = Arc::new(Stalled::default());
        let mut controller = PlaybackController::new(output.clone());

        controller.begin("rest well", LanguageTag::English, Duration::from_secs(5));
        let result = controller.started().await;

        assert!(matches!(result, Err(Error::Tts(_))));
        assert!(!controller.is_starting());
        // Once before starting and once when giving up
        assert_eq!(output.cancels.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_stalled_synthesis() {
        let output = Arc::new(Stalled::default());
        let mut controller = PlaybackController::new(output.clone());

        controller.begin("rest well", LanguageTag::English, Duration::from_secs(60));
        controller.cancel();

        assert!(!controller.is_starting());
        assert!(!controller.wait_finished(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_on_missing_completion() {
        let (handle, done) = PlaybackHandle::channel();
        let waited = handle.wait(Duration::from_secs(5)).await;
        assert!(!waited);
        drop(done);
    }

    #[tokio::test]
    async fn test_dropped_completion_reads_as_cancelled() {
        let (handle, done) = PlaybackHandle::channel();
        drop(done);
        assert!(!handle.wait(Duration::from_secs(5)).await);
    }
}
