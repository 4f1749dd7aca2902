use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use memo_client::capture::{
    Activity, ActivityDetector, Microphone, SAMPLE_RATE, TranscribingRecognizer,
};
use memo_client::speech::{
    CommandVoice, LocalVoice, PLAYBACK_SAMPLE_RATE, PlaybackQueue, SpeakerSink,
};
use memo_client::{
    AbortHandle, BackendClient, BackendSynthesizer, BusyWatch, Config, Conversation, MuteHandle,
    Origin, Rejection, SessionHandle, StateRepo, Submission, TerminalRenderer, db,
};

/// Memo - talk or type to your Memo companion
#[derive(Parser)]
#[command(name = "memo", version, about)]
struct Cli {
    /// Backend base URL
    #[arg(short, long)]
    backend: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable microphone and speech output
    #[arg(long, env = "MEMO_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text through the backend voice (local voice on failure)
    Say {
        /// Text to speak
        #[arg(default_value = "Hello there. I'm Memo.")]
        text: String,
    },
    /// Forget the stored session and conversation
    Reset,
}

/// One line of REPL input
enum Input {
    Text(String),
    Listen,
    Retry,
    Reset,
    Help,
    Quit,
}

const HELP: &str = "\
Type a message and press enter, or:
  /listen   speak instead of typing (ends after a pause, or /stop)
  /stop     stop listening, or cancel the reply in progress
  /retry    resend your last message after an error
  /mute     toggle speech output
  /reset    start a new conversation
  /quit     exit";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; stdout belongs to the conversation
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,memo_client=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            eprintln!("memo: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_with_options(cli.disable_voice)?;
    if let Some(url) = cli.backend {
        config.backend_url = url.trim_end_matches('/').to_string();
    }
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => {
                test_mic(duration, config.capture.energy_threshold).await
            }
            Command::TestSpeaker => test_speaker().await,
            Command::Say { text } => say(&config, &text).await,
            Command::Reset => reset_store(&config),
        };
    }

    chat(config).await
}

/// Interactive chat loop
async fn chat(config: Config) -> anyhow::Result<()> {
    let client = BackendClient::new(&config.backend_url)?;
    let session = SessionHandle::default();

    let mut conversation = Conversation::new(
        &config,
        client.clone(),
        session.clone(),
        Box::new(TerminalRenderer::stdout()),
    );

    let speech = config
        .speech
        .enabled
        .then(|| build_speech(&config, &client, &session))
        .flatten();
    if let Some(queue) = speech {
        conversation = conversation.with_speech(queue);
    }

    match db::init(config.db_path()) {
        Ok(pool) => conversation = conversation.with_store(StateRepo::new(pool)),
        Err(e) => tracing::warn!(error = %e, "persistence disabled"),
    }

    let mut recognizer = config.capture.enabled.then(|| {
        TranscribingRecognizer::new(Arc::new(client.clone()), config.capture.energy_threshold)
    });

    tracing::info!(backend = %config.backend_url, "starting memo");
    println!("Connected to {} (/help for commands)", config.backend_url);
    conversation.startup().await;

    let mut input = spawn_input(Controls {
        abort: conversation.abort_handle(),
        stop: conversation.stop_handle(),
        mute: conversation.mute_handle(),
        busy: conversation.busy_watch(),
    });

    while let Some(line) = input.recv().await {
        match line {
            Input::Text(text) => report(conversation.submit(&text, Origin::Typed).await),
            Input::Listen => match recognizer.as_mut() {
                Some(recognizer) => report(conversation.listen(recognizer).await),
                None => println!("  (voice capture is disabled)"),
            },
            Input::Retry => report(conversation.retry().await),
            Input::Reset => {
                conversation.reset();
                conversation.startup().await;
            }
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
        }
    }

    if let Some(queue) = conversation.speech() {
        queue.interrupt();
    }
    Ok(())
}

fn report(submission: Submission) {
    match submission {
        Submission::Rejected(Rejection::CoolingDown) => println!("  (slow down a moment)"),
        Submission::Rejected(Rejection::Busy) => println!("{BUSY}"),
        Submission::Rejected(Rejection::TooShort) => {}
        Submission::Rejected(Rejection::NothingToRetry) => println!("  (nothing to retry)"),
        Submission::Cancelled => println!("  (stopped)"),
        Submission::Completed | Submission::Failed(_) => {}
    }
}

/// Handles the input task uses while the main loop is awaiting
struct Controls {
    abort: AbortHandle,
    stop: AbortHandle,
    mute: MuteHandle,
    busy: BusyWatch,
}

const BUSY: &str = "  (still working on the last one)";

/// Read stdin lines into commands
///
/// `/stop`, `/mute` and Ctrl-C act immediately through the handles, since
/// the main loop is busy awaiting the exchange or listening session. Input
/// that needs the gate is refused while an exchange is in flight.
fn spawn_input(controls: Controls) -> mpsc::UnboundedReceiver<Input> {
    let Controls {
        abort,
        stop,
        mute,
        busy,
    } = controls;
    let (tx, rx) = mpsc::unbounded_channel();

    let signal_tx = tx.clone();
    let (signal_abort, signal_stop) = (abort.clone(), stop.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_abort.abort();
            signal_stop.abort();
            let _ = signal_tx.send(Input::Quit);
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    let _ = tx.send(Input::Quit);
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read input");
                    let _ = tx.send(Input::Quit);
                    return;
                }
            };

            let input = match line.trim() {
                "" => continue,
                "/stop" => {
                    stop.abort();
                    abort.abort();
                    continue;
                }
                "/mute" => {
                    let muted = mute.toggle();
                    println!("  ({})", if muted { "muted" } else { "unmuted" });
                    continue;
                }
                "/listen" => Input::Listen,
                "/retry" => Input::Retry,
                "/reset" => Input::Reset,
                "/help" => Input::Help,
                "/quit" | "/exit" => Input::Quit,
                _ => Input::Text(line),
            };

            if busy.is_busy() && matches!(input, Input::Text(_) | Input::Listen | Input::Retry) {
                println!("{BUSY}");
                continue;
            }

            if tx.send(input).is_err() {
                return;
            }
        }
    });

    rx
}

/// Speaker output with backend synthesis and a local fallback voice
fn build_speech(
    config: &Config,
    client: &BackendClient,
    session: &SessionHandle,
) -> Option<PlaybackQueue> {
    let sink = match SpeakerSink::new() {
        Ok(sink) => sink,
        Err(e) => {
            tracing::warn!(error = %e, "no audio output, speech disabled");
            return None;
        }
    };

    let fallback: Option<Arc<dyn LocalVoice>> = match &config.speech.local_voice {
        Some(command) => match CommandVoice::from_command(command) {
            Ok(voice) => Some(Arc::new(voice)),
            Err(e) => {
                tracing::warn!(error = %e, "local voice unavailable");
                None
            }
        },
        None => CommandVoice::detect().map(|voice| Arc::new(voice) as Arc<dyn LocalVoice>),
    };

    let synthesizer = BackendSynthesizer::new(client.clone(), session.clone());
    Some(PlaybackQueue::spawn(
        Arc::new(synthesizer),
        Arc::new(sink),
        fallback,
    ))
}

/// Speak one piece of text and wait for it to finish
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let client = BackendClient::new(&config.backend_url)?;

    let session = match db::init(config.db_path()) {
        Ok(pool) => SessionHandle::new(StateRepo::new(pool).load().session_id),
        Err(_) => SessionHandle::default(),
    };

    let queue = build_speech(config, &client, &session)
        .ok_or_else(|| anyhow::anyhow!("no audio output available"))?;

    println!("Speaking: \"{text}\"");
    queue.enqueue(text);
    queue.wait_idle().await;
    Ok(())
}

/// Clear the stored conversation
fn reset_store(config: &Config) -> anyhow::Result<()> {
    let pool = db::init(config.db_path())?;
    StateRepo::new(pool).clear_conversation()?;
    println!("Conversation cleared; the next start greets you as new.");
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, energy_threshold: f32) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut microphone = Microphone::open()?;
    microphone.start()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let mut detector = ActivityDetector::new(energy_threshold);

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = microphone.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let activity = match detector.process(&samples) {
            Activity::Silence => "silence",
            Activity::Speech => "speech",
            Activity::SegmentComplete(_) => "segment",
        };

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}] {}",
            i + 1,
            energy,
            peak,
            meter,
            activity
        );
    }

    microphone.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = SpeakerSink::new()?;

    let frequency = 440.0_f32;
    let num_samples = usize::try_from(PLAYBACK_SAMPLE_RATE)? * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    tokio::task::spawn_blocking(move || {
        sink.play_samples_blocking(samples, &AtomicBool::new(false))
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
