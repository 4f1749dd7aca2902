//! Capture pipeline integration tests
//!
//! Exercises voice capture without audio hardware: synthetic samples for the
//! activity detector, scripted recognizers for listening sessions.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use memo_client::capture::{
    Activity, ActivityDetector, Recognizer, RecognizerEvent, RecognizerFailure, SAMPLE_RATE,
    Transcriber, samples_to_wav,
};
use memo_client::render::{NullRenderer, Role};
use memo_client::{
    BackendClient, Config, Conversation, FailureKind, Origin, Result, SessionHandle, Submission,
};

mod common;
use common::{ChatReply, MockBackend, spawn_backend, test_config};

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

#[test]
fn speech_segment_detection() {
    let mut detector = ActivityDetector::new(0.02);

    assert_eq!(detector.process(&generate_silence(0.1)), Activity::Silence);

    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    assert_eq!(detector.process(&speech), Activity::Speech);

    let more_speech = generate_sine_samples(440.0, 0.3, 0.3);
    assert_eq!(detector.process(&more_speech), Activity::Speech);

    let silence = generate_silence(0.6);
    match detector.process(&silence) {
        Activity::SegmentComplete(segment) => {
            assert_eq!(
                segment.len(),
                speech.len() + more_speech.len() + silence.len()
            );
        }
        other => panic!("expected a complete segment, got {other:?}"),
    }

    // Back to idle
    assert_eq!(detector.process(&generate_silence(0.1)), Activity::Silence);
}

#[test]
fn short_pause_keeps_segment_open() {
    let mut detector = ActivityDetector::new(0.02);

    detector.process(&generate_sine_samples(220.0, 0.4, 0.3));
    // A breath between words
    assert_eq!(detector.process(&generate_silence(0.2)), Activity::Speech);
    assert_eq!(
        detector.process(&generate_sine_samples(220.0, 0.4, 0.3)),
        Activity::Speech
    );
}

#[test]
fn quiet_tone_below_threshold() {
    let mut detector = ActivityDetector::new(0.05);
    let hum = generate_sine_samples(60.0, 1.0, 0.01);
    assert_eq!(detector.process(&hum), Activity::Silence);
    assert!(detector.flush().is_none());
}

#[test]
fn flush_on_stop_mid_speech() {
    let mut detector = ActivityDetector::new(0.02);
    let speech = generate_sine_samples(440.0, 0.5, 0.3);
    detector.process(&speech);

    let segment = detector.flush().unwrap();
    assert_eq!(segment.len(), speech.len());
    assert!(detector.flush().is_none());
}

#[test]
fn wav_header_and_length() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");
    assert_eq!(wav_data.len(), 44 + samples.len() * 2);
}

#[test]
fn wav_readback() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
    assert_eq!(read_samples[3], i16::MAX);
}

#[tokio::test]
async fn backend_transcription() {
    let backend = MockBackend::with_replies(vec![]);
    let url = spawn_backend(Arc::clone(&backend)).await;
    let client = BackendClient::new(&url).unwrap();

    let wav = samples_to_wav(&generate_sine_samples(440.0, 0.5, 0.3), SAMPLE_RATE).unwrap();
    let text = client.transcribe(wav).await.unwrap();

    assert_eq!(text, "I feel great today");
    assert_eq!(*backend.transcribe_calls.lock().unwrap(), 1);
}

/// Recognizer replaying a fixed script, then staying open and quiet
struct Scripted {
    script: Vec<RecognizerEvent>,
    open: Option<mpsc::Sender<RecognizerEvent>>,
    stops: usize,
}

impl Scripted {
    fn new(script: Vec<RecognizerEvent>) -> Self {
        Self {
            script,
            open: None,
            stops: 0,
        }
    }
}

impl Recognizer for Scripted {
    fn start(&mut self) -> Result<mpsc::Receiver<RecognizerEvent>> {
        let (tx, rx) = mpsc::channel(16);
        for event in self.script.drain(..) {
            tx.try_send(event).unwrap();
        }
        self.open = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.open = None;
        self.stops += 1;
    }
}

fn voice_conversation(config: &Config) -> Conversation {
    let client = BackendClient::new(&config.backend_url).unwrap();
    Conversation::new(
        config,
        client,
        SessionHandle::default(),
        Box::new(NullRenderer),
    )
}

#[tokio::test]
async fn spoken_utterance_submitted_after_silence() {
    let backend = MockBackend::with_replies(vec![ChatReply::text(&["Glad to hear it."])]);
    let url = spawn_backend(Arc::clone(&backend)).await;
    let mut conversation = voice_conversation(&test_config(&url));

    let mut recognizer = Scripted::new(vec![
        RecognizerEvent::Interim("I fee".into()),
        RecognizerEvent::Final("I feel great".into()),
        RecognizerEvent::Interim("today".into()),
    ]);

    let outcome = conversation.listen(&mut recognizer).await;

    assert_eq!(outcome, Submission::Completed);
    assert_eq!(backend.chat_messages(), vec!["I feel great today"]);
    assert_eq!(recognizer.stops, 1);
    assert!(!conversation.is_listening());

    let messages = conversation.transcript().messages();
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text, "I feel great today");
    assert_eq!(messages[1].text, "Glad to hear it.");
    assert_eq!(conversation.transcript().status(), None);
}

#[tokio::test]
async fn stop_finalizes_what_was_heard() {
    let backend = MockBackend::with_replies(vec![ChatReply::text(&["Sure."])]);
    let url = spawn_backend(Arc::clone(&backend)).await;
    let mut config = test_config(&url);
    config.capture.silence_window = Duration::from_secs(30);
    let mut conversation = voice_conversation(&config);

    let stop = conversation.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.abort();
    });

    let mut recognizer = Scripted::new(vec![RecognizerEvent::Interim("hold on".into())]);
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        conversation.listen(&mut recognizer),
    )
    .await
    .unwrap();

    assert_eq!(outcome, Submission::Completed);
    assert_eq!(backend.chat_messages(), vec!["hold on"]);
}

#[tokio::test]
async fn silence_only_reports_no_speech() {
    let backend = MockBackend::with_replies(vec![]);
    let url = spawn_backend(Arc::clone(&backend)).await;
    let mut conversation = voice_conversation(&test_config(&url));

    let mut recognizer = Scripted::new(vec![]);
    let outcome = conversation.listen(&mut recognizer).await;

    assert_eq!(outcome, Submission::Failed(FailureKind::CaptureNoSpeech));
    assert!(backend.chat_messages().is_empty());
    assert!(conversation.transcript().is_empty());
    assert_eq!(
        conversation.transcript().status(),
        Some(FailureKind::CaptureNoSpeech.user_message().as_str())
    );
    assert!(!conversation.is_busy());
}

#[tokio::test]
async fn permission_denied_surfaces_without_request() {
    let backend = MockBackend::with_replies(vec![]);
    let url = spawn_backend(Arc::clone(&backend)).await;
    let mut conversation = voice_conversation(&test_config(&url));

    let mut recognizer = Scripted::new(vec![
        RecognizerEvent::Interim("hel".into()),
        RecognizerEvent::Failed(RecognizerFailure::PermissionDenied),
    ]);
    let outcome = conversation.listen(&mut recognizer).await;

    assert_eq!(
        outcome,
        Submission::Failed(FailureKind::CapturePermissionDenied)
    );
    assert!(backend.chat_messages().is_empty());
    assert!(!conversation.transcript().retry_available());
    assert!(!conversation.is_listening());
}

#[tokio::test]
async fn voice_cooldown_applies_to_next_utterance() {
    let backend = MockBackend::with_replies(vec![ChatReply::text(&["Okay."])]);
    let url = spawn_backend(Arc::clone(&backend)).await;
    let mut config = test_config(&url);
    config.gate.voice_cooldown = Duration::from_secs(30);
    let mut conversation = voice_conversation(&config);

    let mut first = Scripted::new(vec![RecognizerEvent::Final("first thought".into())]);
    assert_eq!(
        conversation.listen(&mut first).await,
        Submission::Completed
    );

    let mut second = Scripted::new(vec![RecognizerEvent::Final("second thought".into())]);
    assert!(matches!(
        conversation.listen(&mut second).await,
        Submission::Rejected(_)
    ));

    // Typing is governed by its own cooldown
    assert_eq!(
        conversation.submit("typed instead", Origin::Typed).await,
        Submission::Completed
    );
    assert_eq!(
        backend.chat_messages(),
        vec!["first thought", "typed instead"]
    );
}

/// Recognizer that behaves like the microphone one: speech is announced at
/// once, and its words arrive only after a transcription delay
struct Delayed {
    words: &'static str,
    /// How long the user talks; `None` talks until stopped
    talk_for: Option<Duration>,
    transcription: Duration,
    stop: CancellationToken,
}

impl Delayed {
    fn new(words: &'static str, talk_for: Option<Duration>, transcription: Duration) -> Self {
        Self {
            words,
            talk_for,
            transcription,
            stop: CancellationToken::new(),
        }
    }
}

impl Recognizer for Delayed {
    fn start(&mut self) -> Result<mpsc::Receiver<RecognizerEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let stop = self.stop.clone();
        let (words, talk_for, transcription) = (self.words, self.talk_for, self.transcription);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(RecognizerEvent::Pending).await;

            let talking_until = talk_for.map(|d| tokio::time::Instant::now() + d);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
                if talking_until.is_some_and(|t| tokio::time::Instant::now() >= t) {
                    break;
                }
                let _ = tx.send(RecognizerEvent::Interim(String::new())).await;
            }

            // Stopping ends capture, not the transcription in flight
            tokio::time::sleep(transcription).await;
            let _ = tx.send(RecognizerEvent::Final(words.to_string())).await;
        });

        Ok(rx)
    }

    fn stop(&mut self) {
        self.stop.cancel();
    }
}

#[tokio::test]
async fn stop_keeps_speech_still_being_transcribed() {
    let backend = MockBackend::with_replies(vec![ChatReply::text(&["Take your time."])]);
    let url = spawn_backend(Arc::clone(&backend)).await;
    let mut config = test_config(&url);
    config.capture.silence_window = Duration::from_secs(30);
    let mut conversation = voice_conversation(&config);

    let stop = conversation.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stop.abort();
    });

    let mut recognizer = Delayed::new("hold on", None, Duration::from_millis(400));
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        conversation.listen(&mut recognizer),
    )
    .await
    .unwrap();

    assert_eq!(outcome, Submission::Completed);
    assert_eq!(backend.chat_messages(), vec!["hold on"]);
    assert!(!conversation.is_listening());
}

#[tokio::test]
async fn silence_waits_for_slow_transcription() {
    let backend = MockBackend::with_replies(vec![ChatReply::text(&["Glad to hear it."])]);
    let url = spawn_backend(Arc::clone(&backend)).await;
    // Transcription takes far longer than the 300 ms silence window
    let mut conversation = voice_conversation(&test_config(&url));

    let mut recognizer = Delayed::new(
        "I feel great today",
        Some(Duration::from_millis(500)),
        Duration::from_millis(1200),
    );
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        conversation.listen(&mut recognizer),
    )
    .await
    .unwrap();

    assert_eq!(outcome, Submission::Completed);
    assert_eq!(backend.chat_messages(), vec!["I feel great today"]);
    assert_eq!(
        conversation.transcript().messages()[0].text,
        "I feel great today"
    );
}
