//! Continuous speech recognition session
//!
//! Wraps a [`RecognitionEngine`] and exposes its output as a typed event
//! stream. The session owns the microphone while listening and never decides
//! when an utterance is done; that belongs to the finalizer.

use std::fmt;

use tokio::sync::mpsc;

use crate::{Error, LanguageTag, Result};

/// Maximum recognition alternatives requested from the engine
pub const MAX_ALTERNATIVES: u8 = 3;

/// Event produced while a recognition session is active
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Engine acquired the microphone and is listening
    Started,
    /// Interim transcript of the current utterance so far
    PartialResult { text: String, confidence: f32 },
    /// Final transcript of the current utterance
    FinalResult { text: String, confidence: f32 },
    /// Engine failed; the session is stopped
    Error { kind: RecognitionErrorKind },
    /// Engine stopped on its own
    Ended,
}

/// Engine-reported failure kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Nothing resembling speech was heard
    NoSpeechDetected,
    /// Microphone could not be opened or failed mid-stream
    AudioCaptureFailed,
    /// Microphone or recognition service access was denied
    NotAllowed,
    /// Recognition service could not be reached
    NetworkUnavailable,
    /// Anything else
    Other(String),
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpeechDetected => f.write_str("no speech detected"),
            Self::AudioCaptureFailed => f.write_str("audio capture failed"),
            Self::NotAllowed => f.write_str("microphone or recognition access not allowed"),
            Self::NetworkUnavailable => f.write_str("recognition network unavailable"),
            Self::Other(detail) => write!(f, "{detail}"),
        }
    }
}

/// Settings handed to the engine on every start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionConfig {
    /// Language to recognize
    pub language: LanguageTag,
    /// Keep listening across pauses instead of ending after one result
    pub continuous: bool,
    /// Emit interim results while the speaker is still talking
    pub interim_results: bool,
    /// Number of alternatives to request
    pub max_alternatives: u8,
}

impl RecognitionConfig {
    /// Continuous, interim-result configuration for a language
    #[must_use]
    pub const fn continuous(language: LanguageTag) -> Self {
        Self {
            language,
            continuous: true,
            interim_results: true,
            max_alternatives: MAX_ALTERNATIVES,
        }
    }
}

/// A speech-to-text capability
///
/// Each `start` yields a fresh event stream; the previous stream, if any, is
/// abandoned. `stop` must be idempotent.
pub trait RecognitionEngine: Send {
    /// Begin continuous capture
    ///
    /// # Errors
    ///
    /// Returns error if capture cannot begin
    fn start(
        &mut self,
        config: RecognitionConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>>;

    /// Release the microphone
    fn stop(&mut self);
}

/// Recognition session driven by the orchestrator
pub struct RecognitionSession {
    engine: Option<Box<dyn RecognitionEngine>>,
    language: LanguageTag,
    events: Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
}

impl RecognitionSession {
    /// Create a session around an engine
    ///
    /// Pass `None` when the runtime has no recognition capability; `start`
    /// then fails with [`Error::RecognitionUnavailable`].
    #[must_use]
    pub fn new(engine: Option<Box<dyn RecognitionEngine>>, language: LanguageTag) -> Self {
        Self {
            engine,
            language,
            events: None,
        }
    }

    /// Begin listening in `language`
    ///
    /// No-op if already listening.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecognitionUnavailable`] without an engine, or the
    /// engine's own start error
    pub fn start(&mut self, language: LanguageTag) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(Error::RecognitionUnavailable)?;

        if self.events.is_some() {
            return Ok(());
        }

        self.language = language;
        let events = engine.start(RecognitionConfig::continuous(language))?;
        self.events = Some(events);

        tracing::debug!(language = %language, "recognition started");
        Ok(())
    }

    /// Stop listening and drop any undelivered events
    ///
    /// Safe to call when not listening.
    pub fn stop(&mut self) {
        if self.events.take().is_none() {
            return;
        }

        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
        tracing::debug!("recognition stopped");
    }

    /// Set the language used by the next `start`
    pub const fn set_language(&mut self, language: LanguageTag) {
        self.language = language;
    }

    /// Language of the current or next capture
    #[must_use]
    pub const fn language(&self) -> LanguageTag {
        self.language
    }

    /// Whether the session currently holds the microphone
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.events.is_some()
    }

    /// Whether a recognition capability exists at all
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    /// Wait for the next event
    ///
    /// Pending forever while not listening. An `Error` or `Ended` event (or
    /// the engine dropping its sender) leaves the session stopped.
    pub async fn next_event(&mut self) -> RecognitionEvent {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };

        let event = events.recv().await.unwrap_or(RecognitionEvent::Ended);

        if matches!(
            event,
            RecognitionEvent::Error { .. } | RecognitionEvent::Ended
        ) {
            self.stop();
        }

        event
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Probe {
        starts: Vec<RecognitionConfig>,
        stops: usize,
        sender: Option<mpsc::UnboundedSender<RecognitionEvent>>,
    }

    struct ProbeEngine(Arc<Mutex<Probe>>);

    impl RecognitionEngine for ProbeEngine {
        fn start(
            &mut self,
            config: RecognitionConfig,
        ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut probe = self.0.lock().unwrap();
            probe.starts.push(config);
            probe.sender = Some(tx);
            Ok(rx)
        }

        fn stop(&mut self) {
            self.0.lock().unwrap().stops += 1;
        }
    }

    #[test]
    fn test_start_without_engine_is_unavailable() {
        let mut session = RecognitionSession::new(None, LanguageTag::English);
        assert!(matches!(
            session.start(LanguageTag::English),
            Err(Error::RecognitionUnavailable)
        ));
        assert!(!session.is_active());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let probe = Arc::new(Mutex::new(Probe::default()));
        let mut session =
            RecognitionSession::new(Some(Box::new(ProbeEngine(probe.clone()))), LanguageTag::English);

        session.stop();
        session.start(LanguageTag::English).unwrap();
        session.stop();
        session.stop();

        assert_eq!(probe.lock().unwrap().stops, 1);
    }

    #[test]
    fn test_set_language_applies_on_next_start() {
        let probe = Arc::new(Mutex::new(Probe::default()));
        let mut session =
            RecognitionSession::new(Some(Box::new(ProbeEngine(probe.clone()))), LanguageTag::English);

        session.start(LanguageTag::English).unwrap();
        session.set_language(LanguageTag::Swahili);
        assert_eq!(probe.lock().unwrap().starts.len(), 1);

        session.stop();
        session.start(session.language()).unwrap();

        let starts = &probe.lock().unwrap().starts;
        assert_eq!(starts[1], RecognitionConfig::continuous(LanguageTag::Swahili));
        assert!(starts[1].continuous && starts[1].interim_results);
        assert_eq!(starts[1].max_alternatives, 3);
    }

    #[tokio::test]
    async fn test_error_event_stops_session() {
        let probe = Arc::new(Mutex::new(Probe::default()));
        let mut session =
            RecognitionSession::new(Some(Box::new(ProbeEngine(probe.clone()))), LanguageTag::English);
        session.start(LanguageTag::English).unwrap();

        let sender = probe.lock().unwrap().sender.clone().unwrap();
        sender
            .send(RecognitionEvent::Error {
                kind: RecognitionErrorKind::NotAllowed,
            })
            .unwrap();

        let event = session.next_event().await;
        assert!(matches!(event, RecognitionEvent::Error { .. }));
        assert!(!session.is_active());
        assert_eq!(probe.lock().unwrap().stops, 1);
    }

    #[tokio::test]
    async fn test_closed_stream_reads_as_ended() {
        let probe = Arc::new(Mutex::new(Probe::default()));
        let mut session =
            RecognitionSession::new(Some(Box::new(ProbeEngine(probe.clone()))), LanguageTag::English);
        session.start(LanguageTag::English).unwrap();

        probe.lock().unwrap().sender = None;

        assert_eq!(session.next_event().await, RecognitionEvent::Ended);
        assert!(!session.is_active());
    }
}
