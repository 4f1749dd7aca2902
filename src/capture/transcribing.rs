//! Recognizer backed by the microphone and backend transcription
//!
//! A capture thread records from the default input device and cuts the
//! stream into speech segments by energy. Each segment is encoded as WAV and
//! sent to a [`Transcriber`]; the returned text becomes a final fragment.
//! The onset of speech is announced as [`RecognizerEvent::Pending`] and
//! settled by exactly one `Final`, empty when the speech was discarded or
//! held no words. Ongoing voice activity is reported as empty interim text so
//! the silence window keeps extending while the user talks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use super::activity::{Activity, ActivityDetector};
use super::microphone::{Microphone, SAMPLE_RATE, samples_to_wav};
use super::recognizer::{Recognizer, RecognizerEvent, RecognizerFailure, Transcriber};
use crate::{Error, Result};

/// How often the capture thread drains the microphone buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Recognizer that records locally and transcribes through a [`Transcriber`]
pub struct TranscribingRecognizer {
    transcriber: Arc<dyn Transcriber>,
    energy_threshold: f32,
    stop: Option<Arc<AtomicBool>>,
}

impl TranscribingRecognizer {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, energy_threshold: f32) -> Self {
        Self {
            transcriber,
            energy_threshold,
            stop: None,
        }
    }
}

impl Recognizer for TranscribingRecognizer {
    fn start(&mut self) -> Result<mpsc::Receiver<RecognizerEvent>> {
        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::CaptureUnavailable("no async runtime"))?;

        let (events_tx, events_rx) = mpsc::channel(32);
        let (segments_tx, segments_rx) = mpsc::channel(4);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread_events = events_tx.clone();
        let threshold = self.energy_threshold;
        std::thread::Builder::new()
            .name("memo-capture".to_string())
            .spawn(move || record(&thread_stop, threshold, &thread_events, &segments_tx))
            .map_err(|e| Error::Recognizer(format!("failed to spawn capture thread: {e}")))?;

        runtime.spawn(transcribe_segments(
            Arc::clone(&self.transcriber),
            segments_rx,
            events_tx,
        ));

        self.stop = Some(stop);
        Ok(events_rx)
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for TranscribingRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture thread body; returns when stopped or when the receiver goes away
fn record(
    stop: &AtomicBool,
    threshold: f32,
    events: &mpsc::Sender<RecognizerEvent>,
    segments: &mpsc::Sender<Vec<f32>>,
) {
    let mut microphone = match Microphone::open().and_then(|mut mic| mic.start().map(|()| mic)) {
        Ok(mic) => mic,
        Err(e) => {
            tracing::warn!(error = %e, "microphone unavailable");
            let failure = match e {
                Error::CapturePermissionDenied => RecognizerFailure::PermissionDenied,
                other => RecognizerFailure::Other(other.to_string()),
            };
            let _ = events.blocking_send(RecognizerEvent::Failed(failure));
            return;
        }
    };

    let mut detector = ActivityDetector::new(threshold);
    // Speech announced as pending and not yet handed to transcription
    let mut holding = false;

    while !stop.load(Ordering::SeqCst) && !events.is_closed() {
        std::thread::sleep(POLL_INTERVAL);

        match detector.process(&microphone.take_buffer()) {
            Activity::Silence => {
                if holding {
                    // The detector dropped it as noise
                    holding = false;
                    settle(events);
                }
            }
            Activity::Speech => {
                if holding {
                    // Non-blocking: a full channel already means "still talking"
                    let _ = events.try_send(RecognizerEvent::Interim(String::new()));
                } else {
                    holding = true;
                    let _ = events.blocking_send(RecognizerEvent::Pending);
                }
            }
            Activity::SegmentComplete(samples) => {
                if !holding {
                    let _ = events.blocking_send(RecognizerEvent::Pending);
                }
                holding = false;
                if segments.blocking_send(samples).is_err() {
                    break;
                }
            }
        }
    }

    microphone.stop();

    // Speech cut off by an explicit stop is still worth transcribing
    if holding {
        match detector.flush() {
            Some(samples) => {
                if segments.blocking_send(samples).is_err() {
                    settle(events);
                }
            }
            None => settle(events),
        }
    }
}

/// Close out a pending announcement that will never be transcribed
fn settle(events: &mpsc::Sender<RecognizerEvent>) {
    let _ = events.blocking_send(RecognizerEvent::Final(String::new()));
}

async fn transcribe_segments(
    transcriber: Arc<dyn Transcriber>,
    mut segments: mpsc::Receiver<Vec<f32>>,
    events: mpsc::Sender<RecognizerEvent>,
) {
    while let Some(samples) = segments.recv().await {
        let event = match samples_to_wav(&samples, SAMPLE_RATE) {
            Ok(wav) => match transcriber.transcribe(wav).await {
                Ok(text) => RecognizerEvent::Final(text.trim().to_string()),
                Err(e) => {
                    tracing::warn!(error = %e, "transcription failed");
                    RecognizerEvent::Failed(RecognizerFailure::Other(e.to_string()))
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode speech segment");
                RecognizerEvent::Final(String::new())
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }
}
