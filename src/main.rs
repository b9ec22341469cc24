use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use afya_voice::voice::{
    AudioCapture, AudioPlayback, CaptureEngine, CloudSynthesizer, SpeechToText, TextToSpeech,
    input_available, levels, tone,
};
use afya_voice::{
    Assistant, AssistantReply, Config, HttpAssistant, LanguageTag, PlaybackController,
    RecognitionEngine, SessionHandle, SessionSettings, SessionSnapshot, Utterance, VoiceSession,
};

/// Longest a single spoken reply is waited on by `afya say`
const SAY_TIMEOUT: Duration = Duration::from_secs(120);

/// Afya - Voice front-end for a bilingual health assistant
#[derive(Parser)]
#[command(name = "afya", version, about)]
struct Cli {
    /// Language to start in (en, sw, en-US, sw-KE)
    #[arg(short, long, env = "AFYA_LANGUAGE")]
    language: Option<LanguageTag>,

    /// Assistant backend base URL
    #[arg(long, env = "AFYA_BACKEND_URL")]
    backend_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send typed text to the assistant and print the reply
    Ask {
        /// What to ask
        text: String,
        /// Confidence to report with the text
        #[arg(long, default_value = "1.0")]
        confidence: f32,
    },
    /// Speak text through the configured TTS voice
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

/// A line typed into the interactive console
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Toggle,
    Language(LanguageTag),
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    match line.to_ascii_lowercase().as_str() {
        "" => Input::Toggle,
        "q" | "quit" | "exit" => Input::Quit,
        other => {
            let code = other.strip_prefix("lang ").unwrap_or(other).trim();
            code.parse::<LanguageTag>()
                .map_or_else(|_| Input::Unknown(line.to_string()), Input::Language)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,afya_voice=info",
        1 => "info,afya_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(language) = cli.language {
        config.voice.language = language;
    }
    if let Some(url) = cli.backend_url {
        config.assistant.base_url = url;
    }
    tracing::debug!(
        backend = %config.assistant.base_url,
        language = %config.voice.language,
        stt = ?config.voice.stt_provider,
        tts = ?config.voice.tts_provider,
        "loaded configuration"
    );

    match cli.command {
        Some(Command::Ask { text, confidence }) => ask(&config, &text, confidence).await,
        Some(Command::Say { text }) => say(&config, &text).await,
        Some(Command::TestMic { duration }) => test_mic(duration).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        None => console(config).await,
    }
}

/// Interactive voice console
async fn console(config: Config) -> anyhow::Result<()> {
    let engine: Option<Box<dyn RecognitionEngine>> = if input_available() {
        match SpeechToText::from_config(&config) {
            Ok(stt) => Some(Box::new(CaptureEngine::new(
                stt,
                tokio::runtime::Handle::current(),
            )) as Box<dyn RecognitionEngine>),
            Err(e) => {
                tracing::warn!(error = %e, "speech recognition disabled");
                None
            }
        }
    } else {
        tracing::warn!("no microphone found, speech recognition disabled");
        None
    };

    let assistant = Arc::new(HttpAssistant::new(
        &config.assistant.base_url,
        config.assistant.request_timeout,
    )?);
    let synthesizer = Arc::new(CloudSynthesizer::new(TextToSpeech::from_config(&config)?));

    let (session, handle) =
        VoiceSession::new(SessionSettings::from(&config), engine, assistant, synthesizer);
    let session_task = tokio::spawn(session.run());
    let printer = tokio::spawn(print_updates(handle.subscribe()));

    println!("Afya voice assistant ({})", config.voice.language.label());
    println!("  Enter        start / stop listening");
    println!("  en | sw      switch language");
    println!("  q            quit\n");

    read_commands(&handle).await?;

    handle.shutdown().await;
    session_task.await?;
    printer.abort();

    Ok(())
}

async fn read_commands(handle: &SessionHandle) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                let delivered = match parse_input(&line) {
                    Input::Toggle => handle.toggle().await,
                    Input::Language(language) => handle.set_language(language).await,
                    Input::Quit => return Ok(()),
                    Input::Unknown(text) => {
                        println!("unrecognized input: {text}");
                        true
                    }
                };
                if !delivered {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// Print every user-visible change in the session
async fn print_updates(mut updates: watch::Receiver<SessionSnapshot>) {
    let mut shown = updates.borrow_and_update().clone();

    while updates.changed().await.is_ok() {
        let current = updates.borrow_and_update().clone();

        if current.language != shown.language {
            println!("[language] {}", current.language.label());
        }
        if current.state != shown.state {
            println!("[{}]", current.state);
        }
        if current.transcript != shown.transcript && !current.transcript.is_empty() {
            println!("  you: {}", current.transcript);
        }
        if current.last_reply != shown.last_reply
            && let Some(reply) = &current.last_reply
        {
            println!("  afya: {reply}");
        }
        if current.last_error != shown.last_error
            && let Some(error) = &current.last_error
        {
            println!("  error: {error}");
        }

        shown = current;
    }
}

/// Send typed text to the assistant
async fn ask(config: &Config, text: &str, confidence: f32) -> anyhow::Result<()> {
    let assistant = HttpAssistant::new(&config.assistant.base_url, config.assistant.request_timeout)?;
    let utterance = Utterance::new(text, confidence, config.voice.language);

    println!("POST {}", assistant.endpoint());
    match assistant.send(&utterance).await? {
        AssistantReply::Message {
            message,
            detected_language,
        } => {
            if let Some(language) = detected_language {
                println!("[{}]", language.label());
            }
            println!("{message}");
        }
        AssistantReply::NotUnderstood => {
            println!("{}", config.voice.language.not_understood());
        }
    }

    Ok(())
}

/// Speak text with the configured voice
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let synthesizer = Arc::new(CloudSynthesizer::new(TextToSpeech::from_config(config)?));
    let mut playback =
        PlaybackController::with_voice(synthesizer, config.voice.speech_rate, config.voice.pitch);

    println!("Speaking: \"{text}\"");
    playback.speak(text, config.voice.language).await?;

    if !playback.wait_finished(SAY_TIMEOUT).await {
        anyhow::bail!("playback did not complete");
    }

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let (rms, peak) = levels(&capture.take_buffer());

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (rms * 100.0).min(50.0) as usize;
        let meter = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {rms:.4} | Peak: {peak:.4} | [{meter}]",
            i + 1
        );

        if capture.has_failed() {
            anyhow::bail!("microphone stream failed");
        }
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check that the microphone is plugged in and unmuted.");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let samples = tone(440.0, Duration::from_secs(2), 0.3);
    let completed = tokio::task::spawn_blocking(move || {
        let stop = Arc::new(AtomicBool::new(false));
        AudioPlayback::new()?.play(samples, &stop)
    })
    .await??;

    println!("\n---");
    if completed {
        println!("If you heard the tone, your speakers are working!");
    } else {
        println!("Playback was interrupted.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input(""), Input::Toggle);
        assert_eq!(parse_input("  q "), Input::Quit);
        assert_eq!(parse_input("sw"), Input::Language(LanguageTag::Swahili));
        assert_eq!(parse_input("lang en-US"), Input::Language(LanguageTag::English));
        assert_eq!(parse_input("hello"), Input::Unknown("hello".to_string()));
    }
}
