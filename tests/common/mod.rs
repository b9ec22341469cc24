//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use afya_voice::{
    Assistant, AssistantReply, Error, LanguageTag, PlaybackHandle, RecognitionEngine,
    RecognitionEvent, Result, SessionHandle, SessionSettings, SessionSnapshot, SpeechRequest,
    Synthesizer, Utterance, VoiceSession,
};
use afya_voice::session::RecognitionConfig;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bound on waiting for a snapshot condition (virtual time under `start_paused`)
pub const WAIT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct EngineProbe {
    events: Option<mpsc::UnboundedSender<RecognitionEvent>>,
    starts: Vec<RecognitionConfig>,
    stops: usize,
}

/// Recognition engine whose events are pushed by the test
pub struct ScriptedEngine {
    probe: Arc<Mutex<EngineProbe>>,
}

/// Test-side control of a [`ScriptedEngine`]
#[derive(Clone)]
pub struct EngineControl {
    probe: Arc<Mutex<EngineProbe>>,
}

/// Create a scripted engine and its control
pub fn scripted_engine() -> (Box<dyn RecognitionEngine>, EngineControl) {
    let probe = Arc::new(Mutex::new(EngineProbe::default()));
    let engine = ScriptedEngine {
        probe: Arc::clone(&probe),
    };
    (Box::new(engine), EngineControl { probe })
}

impl RecognitionEngine for ScriptedEngine {
    fn start(&mut self, config: RecognitionConfig) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RecognitionEvent::Started);

        let mut probe = self.probe.lock().unwrap();
        probe.starts.push(config);
        probe.events = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut probe = self.probe.lock().unwrap();
        probe.stops += 1;
        probe.events = None;
    }
}

impl EngineControl {
    /// Push an event into the current stream; `false` if nobody is listening
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        let probe = self.probe.lock().unwrap();
        probe
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn partial(&self, text: &str, confidence: f32) -> bool {
        self.emit(RecognitionEvent::PartialResult {
            text: text.to_string(),
            confidence,
        })
    }

    pub fn final_result(&self, text: &str, confidence: f32) -> bool {
        self.emit(RecognitionEvent::FinalResult {
            text: text.to_string(),
            confidence,
        })
    }

    /// Languages the engine was started with, in order
    pub fn started_languages(&self) -> Vec<LanguageTag> {
        self.probe
            .lock()
            .unwrap()
            .starts
            .iter()
            .map(|c| c.language)
            .collect()
    }

    pub fn last_config(&self) -> Option<RecognitionConfig> {
        self.probe.lock().unwrap().starts.last().cloned()
    }

    pub fn stops(&self) -> usize {
        self.probe.lock().unwrap().stops
    }

    pub fn is_streaming(&self) -> bool {
        self.probe
            .lock()
            .unwrap()
            .events
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

/// What the mock backend does with each utterance
#[derive(Clone)]
pub enum Behavior {
    Reply {
        message: String,
        detected: Option<LanguageTag>,
    },
    NotUnderstood,
    Fail,
    Hang,
}

/// Assistant double recording every call
pub struct MockAssistant {
    behavior: Behavior,
    delay: Duration,
    calls: Mutex<Vec<Utterance>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockAssistant {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn replying(message: &str) -> Arc<Self> {
        Self::new(Behavior::Reply {
            message: message.to_string(),
            detected: None,
        })
    }

    pub fn with_delay(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delay,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<Utterance> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Assistant for MockAssistant {
    async fn send(&self, utterance: &Utterance) -> Result<AssistantReply> {
        self.calls.lock().unwrap().push(utterance.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = match &self.behavior {
            Behavior::Reply { message, detected } => Ok(AssistantReply::Message {
                message: message.clone(),
                detected_language: *detected,
            }),
            Behavior::NotUnderstood => Ok(AssistantReply::NotUnderstood),
            Behavior::Fail => Err(Error::RequestFailed("status 500 Internal Server Error".into())),
            Behavior::Hang => std::future::pending().await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

/// One call observed by [`RecordingSynthesizer`]
#[derive(Debug, Clone, PartialEq)]
pub enum Spoken {
    Cancel,
    Speak(SpeechRequest),
}

/// Synthesizer double that records instead of playing
#[derive(Default)]
pub struct RecordingSynthesizer {
    log: Mutex<Vec<Spoken>>,
    fail: AtomicBool,
    stall: AtomicBool,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let synth = Self::default();
        synth.fail.store(true, Ordering::SeqCst);
        Arc::new(synth)
    }

    /// Synthesis is recorded but never finishes
    pub fn stalled() -> Arc<Self> {
        let synth = Self::default();
        synth.stall.store(true, Ordering::SeqCst);
        Arc::new(synth)
    }

    pub fn log(&self) -> Vec<Spoken> {
        self.log.lock().unwrap().clone()
    }

    /// Requests that reached the speaker, in order
    pub fn spoken(&self) -> Vec<SpeechRequest> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Spoken::Speak(request) => Some(request),
                Spoken::Cancel => None,
            })
            .collect()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn speak(&self, request: SpeechRequest) -> Result<PlaybackHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Tts("no voice available".into()));
        }
        self.log.lock().unwrap().push(Spoken::Speak(request));
        if self.stall.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        Ok(PlaybackHandle::finished())
    }

    fn cancel_all(&self) {
        self.log.lock().unwrap().push(Spoken::Cancel);
    }
}

/// A running session wired to test doubles
pub struct Harness {
    pub handle: SessionHandle,
    pub engine: EngineControl,
    pub assistant: Arc<MockAssistant>,
    pub speaker: Arc<RecordingSynthesizer>,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn spawn(assistant: Arc<MockAssistant>) -> Self {
        Self::spawn_with(SessionSettings::default(), assistant, RecordingSynthesizer::new())
    }

    pub fn spawn_with(
        settings: SessionSettings,
        assistant: Arc<MockAssistant>,
        speaker: Arc<RecordingSynthesizer>,
    ) -> Self {
        let (engine, control) = scripted_engine();
        let (session, handle) = VoiceSession::new(
            settings,
            Some(engine),
            assistant.clone(),
            speaker.clone(),
        );

        Self {
            handle,
            engine: control,
            assistant,
            speaker,
            task: tokio::spawn(session.run()),
        }
    }

    /// Wait until the published snapshot satisfies `condition`
    pub async fn wait_for(
        &self,
        condition: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut updates = self.handle.subscribe();
        tokio::time::timeout(WAIT, updates.wait_for(condition))
            .await
            .expect("timed out waiting for session")
            .expect("session ended")
            .clone()
    }

    /// Start listening and wait until the engine stream is live
    pub async fn listen(&self) {
        assert!(self.handle.start().await);
        self.wait_for(|s| s.state == afya_voice::SessionState::Listening)
            .await;
    }

    /// Wait until a reply cycle has come to rest
    pub async fn settled(&self) -> SessionSnapshot {
        self.wait_for(|s| {
            s.state == afya_voice::SessionState::Idle && s.last_reply.is_some()
        })
        .await
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not shut down")
            .unwrap();
    }
}
