//! Speech activity segmentation
//!
//! Splits captured audio into speech segments using RMS energy. A segment
//! opens on the first loud chunk and closes after a stretch of silence; short
//! bursts (coughs, clicks) are discarded.

use super::capture::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum voiced audio for a segment to count (0.3 seconds)
const MIN_SPEECH_SAMPLES: usize = SAMPLE_RATE as usize * 3 / 10;

/// Silence that closes a segment (0.5 seconds)
const SILENCE_SAMPLES: usize = SAMPLE_RATE as usize / 2;

/// Whether the segmenter is inside a speech segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Waiting for speech
    Silent,
    /// Accumulating a segment
    Speaking,
}

/// Result of feeding one chunk of audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityUpdate {
    /// Nothing loud enough yet
    Silence,
    /// A new segment opened with this chunk
    SpeechStarted,
    /// The open segment grew
    Speech,
    /// The segment closed and is ready in [`SpeechActivity::take_segment`]
    SegmentEnded,
    /// The segment closed but was too short and was dropped
    Discarded,
}

/// Energy-based speech segmenter
#[derive(Debug)]
pub struct SpeechActivity {
    state: ActivityState,
    segment: Vec<f32>,
    voiced: usize,
    silence_run: usize,
    heard_speech: bool,
}

impl SpeechActivity {
    /// Create an idle segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ActivityState::Silent,
            segment: Vec::new(),
            voiced: 0,
            silence_run: 0,
            heard_speech: false,
        }
    }

    /// Feed a chunk of samples
    pub fn process(&mut self, samples: &[f32]) -> ActivityUpdate {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            ActivityState::Silent => {
                if !is_speech {
                    return ActivityUpdate::Silence;
                }

                self.state = ActivityState::Speaking;
                self.segment.clear();
                self.segment.extend_from_slice(samples);
                self.voiced = samples.len();
                self.silence_run = 0;
                self.heard_speech = true;
                tracing::trace!(energy, "speech started");
                ActivityUpdate::SpeechStarted
            }
            ActivityState::Speaking => {
                self.segment.extend_from_slice(samples);

                if is_speech {
                    self.voiced += samples.len();
                    self.silence_run = 0;
                } else {
                    self.silence_run += samples.len();
                }

                if self.silence_run <= SILENCE_SAMPLES {
                    return ActivityUpdate::Speech;
                }

                if self.voiced >= MIN_SPEECH_SAMPLES {
                    tracing::debug!(samples = self.segment.len(), "speech segment complete");
                    ActivityUpdate::SegmentEnded
                } else {
                    tracing::trace!(voiced = self.voiced, "segment too short, discarded");
                    self.reset_segment();
                    ActivityUpdate::Discarded
                }
            }
        }
    }

    /// Audio of the open segment so far
    #[must_use]
    pub fn segment(&self) -> &[f32] {
        &self.segment
    }

    /// Take the segment and return to silence
    pub fn take_segment(&mut self) -> Vec<f32> {
        let segment = std::mem::take(&mut self.segment);
        self.reset_segment();
        segment
    }

    /// Whether any speech has been heard since creation
    #[must_use]
    pub const fn has_heard_speech(&self) -> bool {
        self.heard_speech
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> ActivityState {
        self.state
    }

    fn reset_segment(&mut self) {
        self.state = ActivityState::Silent;
        self.segment.clear();
        self.voiced = 0;
        self.silence_run = 0;
    }
}

impl Default for SpeechActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn test_short_burst_is_discarded() {
        let mut activity = SpeechActivity::new();

        assert_eq!(activity.process(&[0.5; 800]), ActivityUpdate::SpeechStarted);
        assert_eq!(activity.process(&[0.0; 9000]), ActivityUpdate::Discarded);
        assert_eq!(activity.state(), ActivityState::Silent);
        assert!(activity.segment().is_empty());
        assert!(activity.has_heard_speech());
    }
}
