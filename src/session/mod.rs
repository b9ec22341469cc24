//! Voice interaction session
//!
//! The [`VoiceSession`] is the only owner of [`SessionState`]. It composes the
//! recognition session, the utterance finalizer, the assistant client and the
//! playback controller, and serialises every transition through a single
//! event loop:
//!
//! ```text
//!  commands ─┐
//!  mic ──▶ RecognitionSession ──▶ UtteranceFinalizer ──▶ Assistant ──▶ PlaybackController
//!            └──────────────── VoiceSession (select! loop) ────────────────┘
//! ```
//!
//! Listening stops as soon as an utterance is finalized, so a second utterance
//! can never be produced while one is in flight.

mod assistant;
mod finalizer;
mod playback;
mod recognition;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use assistant::{Assistant, AssistantReply, HttpAssistant, PROCESS_PATH};
pub use finalizer::{DEFAULT_QUIET_WINDOW, Utterance, UtteranceFinalizer};
pub use playback::{
    DEFAULT_PITCH, DEFAULT_SPEECH_RATE, PlaybackController, PlaybackDone, PlaybackHandle,
    SpeechRequest, Synthesizer,
};
pub use recognition::{
    MAX_ALTERNATIVES, RecognitionConfig, RecognitionEngine, RecognitionErrorKind,
    RecognitionEvent, RecognitionSession,
};

use crate::{Config, Error, LanguageTag, Result};

/// Pause between stopping and restarting recognition on a language switch
pub const DEFAULT_RESTART_GRACE: Duration = Duration::from_millis(100);

/// Upper bound on waiting for the assistant backend
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on synthesizing a reply before its playback starts
pub const DEFAULT_SPEECH_TIMEOUT: Duration = Duration::from_secs(20);

/// Queued commands before senders wait
const COMMAND_BUFFER: usize = 32;

/// Where the session is in its listen / ask / speak cycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not listening; ready to start
    #[default]
    Idle,
    /// Capturing speech
    Listening,
    /// An utterance was finalized and listening is being shut down
    Finalizing,
    /// Waiting for the assistant backend
    AwaitingReply,
    /// Reply playback is being started
    Speaking,
    /// Recognition failed; shown until the next command
    Error(String),
}

impl SessionState {
    /// Whether an utterance is between finalization and reply playback
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Finalizing | Self::AwaitingReply | Self::Speaking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Listening => f.write_str("listening"),
            Self::Finalizing => f.write_str("finalizing"),
            Self::AwaitingReply => f.write_str("awaiting reply"),
            Self::Speaking => f.write_str("speaking"),
            Self::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

/// What a UI needs to render the session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    /// Current state
    pub state: SessionState,
    /// Active language
    pub language: LanguageTag,
    /// Latest transcript, updated on every recognition result
    pub transcript: String,
    /// Last reply shown and spoken to the user
    pub last_reply: Option<String>,
    /// Last error shown to the user
    pub last_error: Option<String>,
}

/// Requests from the UI to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start listening
    Start,
    /// Stop listening
    Stop,
    /// Start if idle, stop if listening
    Toggle,
    /// Switch the active language
    SetLanguage(LanguageTag),
    /// End the session
    Shutdown,
}

/// Tunables for a voice session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Initial language
    pub language: LanguageTag,
    /// Quiet time before a transcript becomes an utterance
    pub quiet_window: Duration,
    /// Delay before recognition restarts after a language switch
    pub restart_grace: Duration,
    /// Bound on a single assistant call
    pub request_timeout: Duration,
    /// Bound on synthesizing a reply
    pub speech_timeout: Duration,
    /// Playback rate
    pub speech_rate: f32,
    /// Playback pitch
    pub pitch: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            language: LanguageTag::default(),
            quiet_window: DEFAULT_QUIET_WINDOW,
            restart_grace: DEFAULT_RESTART_GRACE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            speech_timeout: DEFAULT_SPEECH_TIMEOUT,
            speech_rate: DEFAULT_SPEECH_RATE,
            pitch: DEFAULT_PITCH,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            language: config.voice.language,
            quiet_window: config.voice.quiet_window,
            restart_grace: config.voice.restart_grace,
            request_timeout: config.assistant.request_timeout,
            speech_timeout: config.voice.speech_timeout,
            speech_rate: config.voice.speech_rate,
            pitch: config.voice.pitch,
        }
    }
}

/// Cloneable control handle for a running [`VoiceSession`]
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Send a command; returns `false` once the session has ended
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Toggle listening
    pub async fn toggle(&self) -> bool {
        self.send(SessionCommand::Toggle).await
    }

    /// Start listening
    pub async fn start(&self) -> bool {
        self.send(SessionCommand::Start).await
    }

    /// Stop listening
    pub async fn stop(&self) -> bool {
        self.send(SessionCommand::Stop).await
    }

    /// Switch language
    pub async fn set_language(&self, language: LanguageTag) -> bool {
        self.send(SessionCommand::SetLanguage(language)).await
    }

    /// End the session
    pub async fn shutdown(&self) -> bool {
        self.send(SessionCommand::Shutdown).await
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

/// The voice session state machine
pub struct VoiceSession {
    settings: SessionSettings,
    recognition: RecognitionSession,
    finalizer: UtteranceFinalizer,
    assistant: Arc<dyn Assistant>,
    playback: PlaybackController,
    state: SessionState,
    language: LanguageTag,
    in_flight: Option<JoinHandle<Result<AssistantReply>>>,
    restart_at: Option<Instant>,
    commands: mpsc::Receiver<SessionCommand>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl VoiceSession {
    /// Assemble a session
    ///
    /// Pass `None` for `engine` when no recognition capability exists; start
    /// requests then surface [`Error::RecognitionUnavailable`].
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        engine: Option<Box<dyn RecognitionEngine>>,
        assistant: Arc<dyn Assistant>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            language: settings.language,
            ..SessionSnapshot::default()
        });

        let session = Self {
            recognition: RecognitionSession::new(engine, settings.language),
            finalizer: UtteranceFinalizer::new(settings.quiet_window),
            assistant,
            playback: PlaybackController::with_voice(
                synthesizer,
                settings.speech_rate,
                settings.pitch,
            ),
            state: SessionState::Idle,
            language: settings.language,
            in_flight: None,
            restart_at: None,
            commands: command_rx,
            snapshot: snapshot_tx,
            settings,
        };

        let handle = SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };

        (session, handle)
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!(language = %self.language, "voice session ready");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                event = self.recognition.next_event(), if self.state == SessionState::Listening => {
                    self.handle_recognition(event);
                }
                reply = wait_reply(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.handle_reply(reply);
                }
                started = self.playback.started(), if self.playback.is_starting() => {
                    self.handle_playback_started(started);
                }
                () = tokio::time::sleep_until(self.restart_at.unwrap_or_else(Instant::now)),
                    if self.restart_at.is_some() =>
                {
                    self.restart_at = None;
                    self.resume_listening();
                }
                utterance = self.finalizer.ready(self.language), if self.state == SessionState::Listening => {
                    self.dispatch(utterance);
                }
            }
        }

        self.shutdown();
    }

    /// Apply a command; returns `false` on shutdown
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        tracing::debug!(?command, state = %self.state, "command");

        // An error stays on display until the user acts
        if matches!(self.state, SessionState::Error(_)) {
            self.set_state(SessionState::Idle);
        }

        match command {
            SessionCommand::Start => self.start_listening(),
            SessionCommand::Stop => self.stop_listening(),
            SessionCommand::Toggle => {
                if self.state == SessionState::Listening {
                    self.stop_listening();
                } else {
                    self.start_listening();
                }
            }
            SessionCommand::SetLanguage(language) => self.change_language(language),
            SessionCommand::Shutdown => return false,
        }

        true
    }

    fn start_listening(&mut self) {
        match self.state {
            SessionState::Idle => {}
            SessionState::Listening => return,
            _ => {
                tracing::debug!(state = %self.state, "start ignored while an utterance is in flight");
                return;
            }
        }

        self.finalizer.reset();
        self.snapshot.send_modify(|s| s.last_error = None);

        match self.recognition.start(self.language) {
            Ok(()) => self.set_state(SessionState::Listening),
            Err(e) => self.fail(&e),
        }
    }

    fn stop_listening(&mut self) {
        match self.state {
            SessionState::Listening => {
                self.recognition.stop();
                self.finalizer.reset();
                self.restart_at = None;
            }
            SessionState::Speaking => {
                tracing::debug!("reply interrupted");
                self.playback.cancel();
            }
            _ => return,
        }

        self.set_state(SessionState::Idle);
    }

    fn change_language(&mut self, language: LanguageTag) {
        if language == self.language {
            return;
        }

        tracing::info!(from = %self.language, to = %language, "language changed");
        self.language = language;
        self.recognition.set_language(language);
        self.snapshot.send_modify(|s| s.language = language);

        if self.state == SessionState::Listening {
            // Drop the old stream so nothing recognized in the old language is accepted
            self.recognition.stop();
            self.finalizer.reset();
            self.restart_at = Some(Instant::now() + self.settings.restart_grace);
        }
    }

    fn resume_listening(&mut self) {
        if self.state != SessionState::Listening {
            return;
        }

        if let Err(e) = self.recognition.start(self.language) {
            self.fail(&e);
        }
    }

    fn handle_recognition(&mut self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Started => tracing::debug!("recognizer listening"),
            RecognitionEvent::PartialResult { text, confidence }
            | RecognitionEvent::FinalResult { text, confidence } => {
                self.snapshot.send_modify(|s| s.transcript.clone_from(&text));
                self.finalizer.observe(&text, confidence);
            }
            RecognitionEvent::Error { kind } => {
                self.finalizer.reset();
                self.restart_at = None;
                self.fail(&Error::Recognition(kind));
            }
            RecognitionEvent::Ended => {
                if let Some(utterance) = self.finalizer.flush(self.language) {
                    tracing::debug!("recognizer ended with a pending transcript");
                    self.dispatch(utterance);
                } else {
                    tracing::debug!("recognizer ended");
                    self.set_state(SessionState::Idle);
                }
            }
        }
    }

    /// Stop listening and hand the utterance to the assistant
    fn dispatch(&mut self, utterance: Utterance) {
        // A timer armed before a stop must not produce anything afterwards
        if self.state != SessionState::Listening {
            tracing::trace!("stale utterance dropped");
            return;
        }

        self.set_state(SessionState::Finalizing);
        self.recognition.stop();
        self.finalizer.reset();
        self.restart_at = None;

        tracing::info!(
            text = %utterance.text,
            confidence = utterance.confidence,
            language = %utterance.language,
            "utterance ready"
        );

        let assistant = Arc::clone(&self.assistant);
        let timeout = self.settings.request_timeout;
        self.in_flight = Some(tokio::spawn(async move {
            tokio::time::timeout(timeout, assistant.send(&utterance))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::RequestFailed(format!(
                        "no reply within {}ms",
                        timeout.as_millis()
                    )))
                })
        }));

        self.set_state(SessionState::AwaitingReply);
    }

    fn handle_reply(&mut self, reply: Result<AssistantReply>) {
        let (message, language) = match reply {
            Ok(AssistantReply::Message {
                message,
                detected_language,
            }) => {
                let language = detected_language.unwrap_or(self.language);
                tracing::info!(language = %language, "assistant replied");
                (message, language)
            }
            Ok(AssistantReply::NotUnderstood) => {
                tracing::warn!(error = %Error::EmptyReply, "speaking fallback");
                (self.language.not_understood().to_string(), self.language)
            }
            Err(e) => {
                tracing::warn!(error = %e, "speaking apology");
                (self.language.apology().to_string(), self.language)
            }
        };

        self.set_state(SessionState::Speaking);
        self.snapshot
            .send_modify(|s| s.last_reply = Some(message.clone()));

        self.playback
            .begin(&message, language, self.settings.speech_timeout);
        if !self.playback.is_starting() {
            self.set_state(SessionState::Idle);
        }
    }

    fn handle_playback_started(&mut self, started: Result<()>) {
        if let Err(e) = started {
            tracing::error!(error = %e, "reply playback failed");
            self.snapshot
                .send_modify(|s| s.last_error = Some(format!("could not play reply: {e}")));
        }

        if self.state == SessionState::Speaking {
            self.set_state(SessionState::Idle);
        }
    }

    /// Surface a failure to the user; the session rests in `Error`
    fn fail(&mut self, error: &Error) {
        let reason = match error {
            Error::Recognition(kind) => kind.to_string(),
            other => other.to_string(),
        };

        tracing::warn!(reason, "voice cycle failed");
        self.snapshot
            .send_modify(|s| s.last_error = Some(reason.clone()));
        self.set_state(SessionState::Error(reason));
    }

    fn shutdown(&mut self) {
        self.recognition.stop();
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        self.playback.cancel();
        self.set_state(SessionState::Idle);
        tracing::info!("voice session ended");
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }

        tracing::debug!(from = %self.state, to = %state, "state transition");
        self.state = state.clone();
        self.snapshot.send_modify(|s| s.state = state);
    }
}

/// Resolve the in-flight assistant call, clearing the slot
async fn wait_reply(
    in_flight: &mut Option<JoinHandle<Result<AssistantReply>>>,
) -> Result<AssistantReply> {
    let Some(task) = in_flight.as_mut() else {
        return std::future::pending().await;
    };

    let joined = task.await;
    *in_flight = None;
    joined.unwrap_or_else(|e| Err(Error::RequestFailed(format!("assistant task failed: {e}"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_states() {
        assert!(!SessionState::Idle.is_busy());
        assert!(!SessionState::Listening.is_busy());
        assert!(SessionState::AwaitingReply.is_busy());
        assert!(SessionState::Speaking.is_busy());
        assert!(!SessionState::Error("x".to_string()).is_busy());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::AwaitingReply.to_string(), "awaiting reply");
        assert_eq!(
            SessionState::Error("no speech detected".to_string()).to_string(),
            "error (no speech detected)"
        );
    }
}
