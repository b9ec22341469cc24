//! Utterance finalization
//!
//! Engines emit many interim results per utterance. The finalizer debounces
//! them: every new transcript re-arms a quiet timer, and only when the
//! transcript has been stable for the whole window is an [`Utterance`]
//! released.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::LanguageTag;

/// Default quiet window before a transcript counts as finished
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_secs(1);

/// A finished piece of user speech
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    /// Transcript text
    pub text: String,
    /// Recognition confidence in `[0, 1]`
    pub confidence: f32,
    /// Language the speech was recognized in
    pub language: LanguageTag,
}

impl Utterance {
    /// Create an utterance, clamping confidence into `[0, 1]`
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f32, language: LanguageTag) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            text: text.into(),
            confidence,
            language,
        }
    }
}

#[derive(Debug)]
struct Pending {
    text: String,
    confidence: f32,
    deadline: Instant,
}

/// Debounces a transcript stream into utterances
#[derive(Debug)]
pub struct UtteranceFinalizer {
    quiet_window: Duration,
    pending: Option<Pending>,
    last_text: Option<String>,
}

impl UtteranceFinalizer {
    /// Create a finalizer with the given quiet window
    #[must_use]
    pub const fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            pending: None,
            last_text: None,
        }
    }

    /// Feed a transcript value
    ///
    /// A new non-empty text (re)arms the quiet timer and returns `true`.
    /// Empty text and a repeat of the last seen text leave the timer alone.
    pub fn observe(&mut self, text: &str, confidence: f32) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        if self.last_text.as_deref() == Some(text) {
            if let Some(pending) = self.pending.as_mut() {
                pending.confidence = confidence;
            }
            return false;
        }

        self.last_text = Some(text.to_string());
        self.pending = Some(Pending {
            text: text.to_string(),
            confidence,
            deadline: Instant::now() + self.quiet_window,
        });

        tracing::trace!(text, "quiet timer armed");
        true
    }

    /// Whether a transcript is waiting for its quiet window to elapse
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Release the pending transcript now, without waiting
    pub fn flush(&mut self, language: LanguageTag) -> Option<Utterance> {
        self.pending
            .take()
            .map(|p| Utterance::new(p.text, p.confidence, language))
    }

    /// Drop any pending transcript and forget the last seen text
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_text = None;
    }

    /// Wait until the pending transcript has been quiet for the whole window
    ///
    /// Pending forever while nothing is armed. Cancel-safe: dropping the
    /// future keeps the pending transcript, and a re-armed timer is honoured
    /// on the next call.
    pub async fn ready(&mut self, language: LanguageTag) -> Utterance {
        loop {
            let Some(deadline) = self.pending.as_ref().map(|p| p.deadline) else {
                return std::future::pending().await;
            };

            tokio::time::sleep_until(deadline).await;

            if let Some(utterance) = self.flush(language) {
                tracing::debug!(text = %utterance.text, "utterance finalized");
                return utterance;
            }
        }
    }
}

impl Default for UtteranceFinalizer {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_emits_latest_text_after_quiet_window() {
        let mut finalizer = UtteranceFinalizer::default();

        finalizer.observe("my chest", 0.4);
        tokio::time::advance(Duration::from_millis(600)).await;
        finalizer.observe("my chest hurts and I feel dizzy", 0.8);

        let utterance = finalizer.ready(LanguageTag::English).await;
        assert_eq!(utterance.text, "my chest hurts and I feel dizzy");
        assert!((utterance.confidence - 0.8).abs() < f32::EPSILON);
        assert!(!finalizer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_text_restarts_timer() {
        let mut finalizer = UtteranceFinalizer::default();
        finalizer.observe("hello", 0.5);

        tokio::time::advance(Duration::from_millis(900)).await;
        finalizer.observe("hello there", 0.5);
        tokio::time::advance(Duration::from_millis(900)).await;

        let mut ready = task::spawn(finalizer.ready(LanguageTag::English));
        assert_pending!(ready.poll());

        tokio::time::advance(Duration::from_millis(150)).await;
        let utterance = assert_ready!(ready.poll());
        assert_eq!(utterance.text, "hello there");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_repeated_text_do_not_arm() {
        let mut finalizer = UtteranceFinalizer::default();

        assert!(!finalizer.observe("   ", 0.9));
        assert!(!finalizer.is_armed());

        assert!(finalizer.observe("fever", 0.9));
        let _ = finalizer.ready(LanguageTag::English).await;

        // Same transcript again: no second utterance
        assert!(!finalizer.observe("fever", 0.9));
        let mut ready = task::spawn(finalizer.ready(LanguageTag::English));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_pending!(ready.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_armed_timer() {
        let mut finalizer = UtteranceFinalizer::default();
        finalizer.observe("headache", 0.7);
        finalizer.reset();

        let mut ready = task::spawn(finalizer.ready(LanguageTag::English));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_pending!(ready.poll());
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert!((Utterance::new("a", 1.7, LanguageTag::English).confidence - 1.0).abs() < f32::EPSILON);
        assert!(Utterance::new("a", f32::NAN, LanguageTag::English).confidence.abs() < f32::EPSILON);
    }
}
