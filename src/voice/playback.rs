//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::session::PlaybackDone;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Interval between completion checks
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Input frames per resampler pass
const RESAMPLE_CHUNK: usize = 1024;

/// Plays mono audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports the playback rate
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        };

        let range = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| supports(c, 2))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = range
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Play samples, blocking until they finish or `stop` is raised
    ///
    /// Returns `true` if the audio ran to completion.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be built or started
    pub fn play(&self, samples: Vec<f32>, stop: &Arc<AtomicBool>) -> Result<bool> {
        if samples.is_empty() {
            return Ok(true);
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let channels = usize::from(self.config.channels);
        let total = samples.len();
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let finished = Arc::clone(&finished);
            let stop = Arc::clone(stop);
            let mut position = 0usize;

            device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let halted = stop.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = if halted {
                                0.0
                            } else {
                                samples.get(position).copied().unwrap_or(0.0)
                            };
                            frame.fill(sample);
                            if position < samples.len() {
                                position += 1;
                            }
                        }
                        if position >= samples.len() {
                            finished.store(true, Ordering::SeqCst);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration = duration_of(total);
        let deadline = Instant::now() + duration + Duration::from_millis(500);

        let completed = loop {
            if stop.load(Ordering::SeqCst) {
                break false;
            }
            if finished.load(Ordering::SeqCst) {
                break true;
            }
            if Instant::now() > deadline {
                tracing::warn!("playback did not report completion in time");
                break true;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        drop(stream);
        tracing::debug!(samples = total, completed, "playback ended");

        Ok(completed)
    }
}

/// Play `samples` on a dedicated thread and signal `done` when it ends
///
/// `done` is only signalled when the audio ran to completion; a stopped or
/// failed playback drops it instead.
pub fn spawn_playback(samples: Vec<f32>, stop: Arc<AtomicBool>, done: PlaybackDone) {
    let spawned = std::thread::Builder::new()
        .name("afya-playback".to_string())
        .spawn(move || {
            let result = AudioPlayback::new().and_then(|playback| playback.play(samples, &stop));
            match result {
                Ok(true) => done.finish(),
                Ok(false) => tracing::debug!("playback cancelled"),
                Err(e) => tracing::error!(error = %e, "playback failed"),
            }
        });

    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn playback thread");
    }
}

/// Playing time of a mono sample count at the playback rate
#[must_use]
pub fn duration_of(samples: usize) -> Duration {
    let millis = u64::try_from(samples)
        .unwrap_or(u64::MAX)
        .saturating_mul(1000)
        / u64::from(PLAYBACK_SAMPLE_RATE);
    Duration::from_millis(millis)
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
///
/// Empty input decodes to no samples at [`PLAYBACK_SAMPLE_RATE`].
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(downmix));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Decode MP3 bytes into samples at [`PLAYBACK_SAMPLE_RATE`]
///
/// # Errors
///
/// Returns error if the data is not valid MP3 or cannot be resampled
pub fn decode_for_playback(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let (samples, sample_rate) = decode_mp3(mp3_data)?;
    if sample_rate != PLAYBACK_SAMPLE_RATE {
        tracing::debug!(from = sample_rate, to = PLAYBACK_SAMPLE_RATE, "resampling reply");
    }
    resample(&samples, sample_rate, PLAYBACK_SAMPLE_RATE)
}

/// Resample mono audio with rubato
///
/// The output has `samples.len() * to_rate / from_rate` samples, aligned with
/// the input (the resampler's delay is trimmed).
///
/// # Errors
///
/// Returns error if either rate is zero or resampling fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == 0 || to_rate == 0 {
        return Err(Error::Audio(format!(
            "cannot resample from {from_rate} Hz to {to_rate} Hz"
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let delay = resampler.output_delay();
    let expected = usize::try_from(
        u64::try_from(samples.len()).unwrap_or(u64::MAX) * u64::from(to_rate)
            / u64::from(from_rate),
    )
    .unwrap_or(usize::MAX);

    let frames = resampler.input_frames_next();
    let mut blocks = samples.chunks(frames);
    let mut chunk = vec![0.0f64; frames];
    let mut output = Vec::with_capacity(delay + expected + resampler.output_frames_max());

    // Trailing zero blocks flush the delay line
    while output.len() < delay + expected {
        let block = blocks.next().unwrap_or_default();
        chunk.fill(0.0);
        for (slot, &sample) in chunk.iter_mut().zip(block) {
            *slot = f64::from(sample);
        }

        let result = resampler
            .process(&[&chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

/// Average one interleaved frame of i16 samples into a mono f32 sample
#[allow(clippy::cast_precision_loss)]
fn downmix(frame: &[i16]) -> f32 {
    let sum: f32 = frame.iter().map(|&s| f32::from(s) / 32768.0).sum();
    sum / frame.len() as f32
}

/// Generate a sine tone at the playback rate
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn tone(frequency: f32, duration: Duration, amplitude: f32) -> Vec<f32> {
    let count = usize::try_from(
        duration.as_millis() * u128::from(PLAYBACK_SAMPLE_RATE) / 1000,
    )
    .unwrap_or(0);

    (0..count)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (t * frequency * std::f32::consts::TAU).sin() * amplitude
        })
        .collect()
}
