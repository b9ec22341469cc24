//! Microphone-backed recognition engine
//!
//! Captures audio on a dedicated thread, segments it by energy and sends each
//! segment to the configured STT provider. Interim results re-transcribe the
//! open segment roughly once a second.
//!
//! At most one capture thread holds the microphone: a restarted engine waits
//! for the previous thread to release it before opening the input stream.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::activity::{ActivityUpdate, SpeechActivity};
use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::stt::SpeechToText;
use crate::session::{RecognitionConfig, RecognitionEngine, RecognitionErrorKind, RecognitionEvent};
use crate::{Error, Result};

/// How often captured audio is drained
const TICK: Duration = Duration::from_millis(100);

/// New audio needed before another interim transcription (1 second)
const INTERIM_STRIDE: usize = SAMPLE_RATE as usize;

/// Listening this long without hearing any speech ends the session
const NO_SPEECH_TIMEOUT: Duration = Duration::from_secs(8);

type Events = mpsc::UnboundedSender<RecognitionEvent>;

/// Recognition engine built on the local microphone and a cloud STT provider
pub struct CaptureEngine {
    stt: Arc<SpeechToText>,
    runtime: Handle,
    stop: Option<Arc<AtomicBool>>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    /// Create an engine that runs transcription on `runtime`
    #[must_use]
    pub fn new(stt: SpeechToText, runtime: Handle) -> Self {
        Self {
            stt: Arc::new(stt),
            runtime,
            stop: None,
            worker: None,
        }
    }
}

impl RecognitionEngine for CaptureEngine {
    fn start(
        &mut self,
        config: RecognitionConfig,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>> {
        self.stop();

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let language = config.language;

        let worker = Worker {
            stt: Arc::clone(&self.stt),
            runtime: self.runtime.clone(),
            config,
            stop: Arc::clone(&stop),
            events: tx,
            previous: self.worker.take(),
        };

        let thread = std::thread::Builder::new()
            .name("afya-capture".to_string())
            .spawn(move || worker.run())?;

        tracing::debug!(language = %language, "capture engine started");
        self.stop = Some(stop);
        self.worker = Some(thread);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::SeqCst);
            tracing::debug!("capture engine stopping");
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the capture thread
struct Worker {
    stt: Arc<SpeechToText>,
    runtime: Handle,
    config: RecognitionConfig,
    stop: Arc<AtomicBool>,
    events: Events,
    previous: Option<JoinHandle<()>>,
}

impl Worker {
    fn run(mut self) {
        await_release(self.previous.take());
        if self.stop.load(Ordering::SeqCst) {
            return;
        }

        let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!(error = %e, "failed to open microphone");
                self.emit(RecognitionEvent::Error {
                    kind: capture_error_kind(&e),
                });
                return;
            }
        };

        self.emit(RecognitionEvent::Started);

        let outcome = self.listen(&capture);
        capture.stop();

        match outcome {
            Ok(()) => {
                self.emit(RecognitionEvent::Ended);
            }
            Err(kind) => {
                tracing::warn!(error = %kind, "recognition failed");
                self.emit(RecognitionEvent::Error { kind });
            }
        }
    }

    /// Capture until stopped, the segment ends in single-shot mode, or an
    /// error occurs
    fn listen(&self, capture: &AudioCapture) -> std::result::Result<(), RecognitionErrorKind> {
        let mut activity = SpeechActivity::new();
        let mut committed = String::new();
        let mut interim_at = 0usize;
        let started = Instant::now();

        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(TICK);

            if capture.has_failed() {
                return Err(RecognitionErrorKind::AudioCaptureFailed);
            }

            let chunk = capture.take_buffer();
            match activity.process(&chunk) {
                ActivityUpdate::Silence => {
                    if !activity.has_heard_speech() && started.elapsed() > NO_SPEECH_TIMEOUT {
                        return Err(RecognitionErrorKind::NoSpeechDetected);
                    }
                }
                ActivityUpdate::SpeechStarted => interim_at = 0,
                ActivityUpdate::Speech => {
                    let open = activity.segment().len();
                    if self.config.interim_results && open >= interim_at + INTERIM_STRIDE {
                        interim_at = open;
                        let Some((text, confidence)) = self.transcribe(activity.segment())?
                        else {
                            return Ok(());
                        };
                        if !text.is_empty() {
                            self.emit(RecognitionEvent::PartialResult {
                                text: join(&committed, &text),
                                confidence,
                            });
                        }
                    }
                }
                ActivityUpdate::SegmentEnded => {
                    let segment = activity.take_segment();
                    let Some((text, confidence)) = self.transcribe(&segment)? else {
                        return Ok(());
                    };
                    if !text.is_empty() {
                        committed = join(&committed, &text);
                        self.emit(RecognitionEvent::FinalResult {
                            text: committed.clone(),
                            confidence,
                        });
                    }
                    if !self.config.continuous {
                        return Ok(());
                    }
                }
                ActivityUpdate::Discarded => {}
            }

            if self.events.is_closed() {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Transcribe `samples`; `None` if the engine was stopped meanwhile
    fn transcribe(
        &self,
        samples: &[f32],
    ) -> std::result::Result<Option<(String, f32)>, RecognitionErrorKind> {
        let wav = samples_to_wav(samples, SAMPLE_RATE).map_err(|e| capture_error_kind(&e))?;
        let request = self
            .stt
            .transcribe(&wav, self.config.language, self.config.max_alternatives);

        let Some(result) = block_until_stopped(&self.runtime, &self.stop, request) else {
            tracing::debug!("transcription abandoned");
            return Ok(None);
        };

        let transcript = result.map_err(|e| {
            tracing::error!(error = %e, "transcription failed");
            stt_error_kind(&e)
        })?;

        Ok(Some((transcript.text, transcript.confidence)))
    }

    fn emit(&self, event: RecognitionEvent) {
        // A closed channel means the session already moved on
        let _ = self.events.send(event);
    }
}

/// Wait for the previous capture thread to drop its input stream
fn await_release(previous: Option<JoinHandle<()>>) {
    if let Some(previous) = previous
        && previous.join().is_err()
    {
        tracing::warn!("previous capture thread panicked");
    }
}

/// Drive `future` on `runtime`, abandoning it once `stop` is raised
fn block_until_stopped<F: Future>(runtime: &Handle, stop: &AtomicBool, future: F) -> Option<F::Output> {
    runtime.block_on(async {
        tokio::select! {
            output = future => Some(output),
            () = stopped(stop) => None,
        }
    })
}

async fn stopped(stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        tokio::time::sleep(TICK).await;
    }
}

fn join(committed: &str, text: &str) -> String {
    if committed.is_empty() {
        text.to_string()
    } else {
        format!("{committed} {text}")
    }
}

/// Classify an STT failure
fn stt_error_kind(error: &Error) -> RecognitionErrorKind {
    match error {
        Error::Auth(_) => RecognitionErrorKind::NotAllowed,
        Error::Http(e) if e.is_connect() || e.is_timeout() => {
            RecognitionErrorKind::NetworkUnavailable
        }
        other => RecognitionErrorKind::Other(other.to_string()),
    }
}

/// Classify a microphone failure
fn capture_error_kind(error: &Error) -> RecognitionErrorKind {
    match error {
        Error::Audio(detail) => {
            let detail = detail.to_ascii_lowercase();
            if detail.contains("permission") || detail.contains("denied") {
                RecognitionErrorKind::NotAllowed
            } else {
                RecognitionErrorKind::AudioCaptureFailed
            }
        }
        Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            RecognitionErrorKind::NotAllowed
        }
        _ => RecognitionErrorKind::AudioCaptureFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_errors() {
        assert_eq!(
            capture_error_kind(&Error::Audio("no input device available".into())),
            RecognitionErrorKind::AudioCaptureFailed
        );
        assert_eq!(
            capture_error_kind(&Error::Audio("Permission denied by user".into())),
            RecognitionErrorKind::NotAllowed
        );
    }

    #[test]
    fn test_stt_errors() {
        assert_eq!(
            stt_error_kind(&Error::Auth("Deepgram rejected credentials".into())),
            RecognitionErrorKind::NotAllowed
        );
        assert!(matches!(
            stt_error_kind(&Error::Stt("bad audio".into())),
            RecognitionErrorKind::Other(_)
        ));
    }

    #[test]
    fn test_restart_waits_for_previous_capture() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let previous = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        });

        await_release(Some(previous));
        assert!(released.load(Ordering::SeqCst));

        await_release(None);
    }

    #[test]
    fn test_stop_abandons_blocked_transcription() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let raise = Arc::clone(&stop);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            raise.store(true, Ordering::SeqCst);
        });

        let began = Instant::now();
        let outcome = block_until_stopped(runtime.handle(), &stop, std::future::pending::<()>());

        assert!(outcome.is_none());
        assert!(began.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn test_finished_transcription_is_returned() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let stop = AtomicBool::new(false);

        assert_eq!(block_until_stopped(runtime.handle(), &stop, async { 7 }), Some(7));
    }

    #[test]
    fn test_join_accumulates_segments() {
        assert_eq!(join("", "I have"), "I have");
        assert_eq!(join("I have", "a headache"), "I have a headache");
    }
}
