//! Capture state machine
//!
//! The engine owns one listening session at a time. It folds recognizer
//! events into a transcript, tracks the silence deadline, and turns the
//! session into a single [`CaptureOutcome`] however it ends. It never touches
//! the clock itself; callers pass `now`, which keeps every transition
//! testable without a recognizer.
//!
//! Recognizers that transcribe after the fact announce held speech with
//! [`RecognizerEvent::Pending`]. When listening ends while such results are
//! outstanding the session moves to finalizing and waits for them, bounded by
//! [`FINALIZE_TIMEOUT`], so words spoken right before the cutoff are kept.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::recognizer::{Recognizer, RecognizerEvent, RecognizerFailure};
use crate::{Error, Result};

/// Back-to-back engine restarts without a result before giving up
const MAX_IDLE_RESTARTS: u32 = 3;

/// Longest wait for outstanding results once listening has ended
pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Listening,
    /// No longer listening; waiting for pending results
    Finalizing,
}

/// How a listening session ended
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Non-empty transcript ready to submit
    Utterance(String),
    /// The session ended without any words
    NoSpeech,
    /// The recognizer failed
    Failed(Error),
}

/// What the driver should do after an event
#[derive(Debug)]
pub enum Step {
    Continue,
    /// The engine ended on its own; start it again
    Restart,
    /// Listening is over; stop the recognizer but keep feeding its events
    Drain,
    Finished(CaptureOutcome),
}

#[derive(Debug)]
struct CaptureSession {
    finalized: Vec<String>,
    interim: String,
    deadline: Instant,
    idle_restarts: u32,
    pending: u32,
    /// Set once listening has ended; the give-up instant
    finalizing_until: Option<Instant>,
}

/// Listening state machine
#[derive(Debug)]
pub struct CaptureEngine {
    silence_window: Duration,
    session: Option<CaptureSession>,
    last_transcript: Option<String>,
}

impl CaptureEngine {
    #[must_use]
    pub const fn new(silence_window: Duration) -> Self {
        Self {
            silence_window,
            session: None,
            last_transcript: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> CaptureState {
        match &self.session {
            None => CaptureState::Idle,
            Some(CaptureSession {
                finalizing_until: None,
                ..
            }) => CaptureState::Listening,
            Some(_) => CaptureState::Finalizing,
        }
    }

    /// Whether a session is running, listening or finalizing
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub const fn silence_window(&self) -> Duration {
        self.silence_window
    }

    /// Transcript of the most recent session that produced words
    #[must_use]
    pub fn last_transcript(&self) -> Option<&str> {
        self.last_transcript.as_deref()
    }

    /// Results announced by the recognizer and not yet delivered
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.pending)
    }

    /// Next instant the session acts on its own: the silence deadline while
    /// listening, the give-up instant while finalizing
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.session
            .as_ref()
            .map(|s| s.finalizing_until.unwrap_or(s.deadline))
    }

    /// Text heard so far, finalized fragments followed by interim text
    #[must_use]
    pub fn preview(&self) -> Option<String> {
        self.session.as_ref().map(compose)
    }

    /// Begin a listening session
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureUnavailable`] if a session is already running
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::CaptureUnavailable("already listening"));
        }

        self.session = Some(CaptureSession {
            finalized: Vec::new(),
            interim: String::new(),
            deadline: now + self.silence_window,
            idle_restarts: 0,
            pending: 0,
            finalizing_until: None,
        });
        tracing::debug!("listening");
        Ok(())
    }

    /// Fold a recognizer event into the session
    pub fn handle(&mut self, event: RecognizerEvent, now: Instant) -> Step {
        let silence_window = self.silence_window;
        let Some(session) = self.session.as_mut() else {
            return Step::Continue;
        };
        let finalizing = session.finalizing_until.is_some();

        match event {
            RecognizerEvent::Interim(text) => {
                session.interim = text;
                if !finalizing {
                    session.deadline = now + silence_window;
                    session.idle_restarts = 0;
                }
                Step::Continue
            }
            RecognizerEvent::Pending => {
                session.pending += 1;
                if !finalizing {
                    session.deadline = now + silence_window;
                    session.idle_restarts = 0;
                }
                Step::Continue
            }
            RecognizerEvent::Final(text) => {
                session.finalized.push(text);
                session.interim.clear();
                session.pending = session.pending.saturating_sub(1);
                if finalizing {
                    if session.pending == 0 {
                        return Step::Finished(self.finalize());
                    }
                } else {
                    session.deadline = now + silence_window;
                    session.idle_restarts = 0;
                }
                Step::Continue
            }
            RecognizerEvent::Ended if finalizing => {
                tracing::debug!(pending = session.pending, "recognizer drained");
                Step::Finished(self.finalize())
            }
            RecognizerEvent::Ended => {
                session.idle_restarts += 1;
                if session.idle_restarts > MAX_IDLE_RESTARTS {
                    tracing::warn!("recognizer keeps ending, finalizing");
                    return Step::Finished(self.finalize());
                }
                tracing::trace!("recognizer ended, restarting");
                Step::Restart
            }
            RecognizerEvent::Failed(failure) => {
                self.session = None;
                let error = match failure {
                    RecognizerFailure::PermissionDenied => Error::CapturePermissionDenied,
                    RecognizerFailure::Other(message) => Error::Recognizer(message),
                };
                tracing::warn!(error = %error, "capture failed");
                Step::Finished(CaptureOutcome::Failed(error))
            }
        }
    }

    /// Act on a deadline that may have passed
    ///
    /// While listening, an elapsed silence window ends listening. While
    /// finalizing, an elapsed give-up instant finalizes with what arrived.
    pub fn check_silence(&mut self, now: Instant) -> Option<Step> {
        let (deadline, finalizing_until, pending) = self
            .session
            .as_ref()
            .map(|s| (s.deadline, s.finalizing_until, s.pending))?;

        match finalizing_until {
            None if now >= deadline => {
                tracing::debug!("silence window elapsed");
                Some(self.wind_down(now))
            }
            Some(until) if now >= until => {
                tracing::warn!(pending, "gave up waiting for results");
                Some(Step::Finished(self.finalize()))
            }
            _ => None,
        }
    }

    /// Explicit stop
    ///
    /// A no-op returning `None` when not listening, including while already
    /// finalizing.
    pub fn stop(&mut self, now: Instant) -> Option<Step> {
        (self.state() == CaptureState::Listening).then(|| self.wind_down(now))
    }

    /// Abandon the session without producing a transcript
    pub fn cancel(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("listening cancelled");
        }
    }

    /// End listening; finalize now unless results are outstanding
    fn wind_down(&mut self, now: Instant) -> Step {
        let Some(session) = self.session.as_mut() else {
            return Step::Finished(CaptureOutcome::NoSpeech);
        };
        if session.pending == 0 {
            return Step::Finished(self.finalize());
        }

        tracing::debug!(pending = session.pending, "waiting for pending results");
        session.finalizing_until = Some(now + FINALIZE_TIMEOUT);
        Step::Drain
    }

    fn finalize(&mut self) -> CaptureOutcome {
        let Some(session) = self.session.take() else {
            return CaptureOutcome::NoSpeech;
        };

        let transcript = compose(&session);
        if transcript.is_empty() {
            tracing::debug!("no speech captured");
            return CaptureOutcome::NoSpeech;
        }

        tracing::debug!(transcript = %transcript, "utterance captured");
        self.last_transcript = Some(transcript.clone());
        CaptureOutcome::Utterance(transcript)
    }
}

/// Join fragments with single spaces, trimmed and whitespace-collapsed
fn compose(session: &CaptureSession) -> String {
    session
        .finalized
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(session.interim.as_str()))
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run one listening session to completion
///
/// Listening ends on `stop` being cancelled, on the silence window elapsing
/// after the last recognizer activity, or on a recognizer failure. Results
/// still pending at that point are awaited before the transcript is
/// composed. The recognizer is restarted transparently if it ends by itself
/// mid-session and is always stopped before returning.
pub async fn listen(
    engine: &mut CaptureEngine,
    recognizer: &mut dyn Recognizer,
    stop: &CancellationToken,
) -> CaptureOutcome {
    if let Err(e) = engine.start(Instant::now()) {
        return CaptureOutcome::Failed(e);
    }

    let mut events = match recognizer.start() {
        Ok(events) => events,
        Err(e) => {
            engine.cancel();
            return CaptureOutcome::Failed(e);
        }
    };

    let outcome = loop {
        let Some(deadline) = engine.deadline() else {
            break CaptureOutcome::NoSpeech;
        };
        let listening = engine.state() == CaptureState::Listening;

        let step = tokio::select! {
            biased;
            () = stop.cancelled(), if listening => {
                engine.stop(Instant::now()).unwrap_or(Step::Continue)
            }
            event = events.recv() => {
                let event = event.unwrap_or(RecognizerEvent::Ended);
                engine.handle(event, Instant::now())
            }
            () = tokio::time::sleep_until(deadline) => {
                engine.check_silence(Instant::now()).unwrap_or(Step::Continue)
            }
        };

        match step {
            Step::Continue => {}
            Step::Restart => match recognizer.start() {
                Ok(restarted) => events = restarted,
                Err(e) => {
                    engine.cancel();
                    break CaptureOutcome::Failed(e);
                }
            },
            Step::Drain => recognizer.stop(),
            Step::Finished(outcome) => break outcome,
        }
    };

    recognizer.stop();
    outcome
}
