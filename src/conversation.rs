//! Conversation orchestration
//!
//! [`Conversation`] owns the interaction state machine: the request gate,
//! the capture engine, the transcript and (optionally) the playback queue and
//! store. A captured or typed utterance passes through the gate, the reply
//! stream is decoded, and each event is handed to the renderer and the speech
//! segmenter in arrival order.

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio::time::Instant;

use crate::capture::{self, CaptureEngine, CaptureOutcome, Recognizer};
use crate::client::BackendClient;
use crate::config::Config;
use crate::db::{MAX_HISTORY, StateRepo};
use crate::error::FailureKind;
use crate::gate::{AbortHandle, BusyWatch, Origin, Rejection, RequestGate, Ticket};
use crate::render::{Change, Message, Renderer, Role, Transcript};
use crate::session::SessionHandle;
use crate::speech::{PlaybackControl, PlaybackQueue, SentenceSegmenter};
use crate::stream::StreamEvent;
use crate::{Error, Result};

/// Result of a submission, retry or listening session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The reply streamed to completion
    Completed,
    /// Not admitted; nothing changed
    Rejected(Rejection),
    /// Aborted by the user
    Cancelled,
    /// Failed; already surfaced in the transcript
    Failed(FailureKind),
}

/// Flips speech output from any task
///
/// Takes effect on the playback queue at once, even while the conversation
/// is busy streaming a reply, and persists the preference.
#[derive(Clone)]
pub struct MuteHandle {
    muted: Arc<AtomicBool>,
    playback: Option<PlaybackControl>,
    store: Option<StateRepo>,
}

impl MuteHandle {
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Flip speech output; returns the new mute state
    pub fn toggle(&self) -> bool {
        let muted = !self.muted.fetch_xor(true, Ordering::SeqCst);
        if let Some(playback) = &self.playback {
            playback.set_muted(muted);
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.set_muted(muted) {
                tracing::warn!(error = %e, "failed to persist mute");
            }
        }
        tracing::info!(muted, "speech output toggled");
        muted
    }
}

/// The voice and text chat client
pub struct Conversation {
    client: BackendClient,
    session: SessionHandle,
    gate: RequestGate,
    capture: CaptureEngine,
    stop_listening: AbortHandle,
    transcript: Transcript,
    renderer: Box<dyn Renderer>,
    speech: Option<PlaybackQueue>,
    store: Option<StateRepo>,
    muted: Arc<AtomicBool>,
}

impl Conversation {
    #[must_use]
    pub fn new(
        config: &Config,
        client: BackendClient,
        session: SessionHandle,
        renderer: Box<dyn Renderer>,
    ) -> Self {
        Self {
            client,
            session,
            gate: RequestGate::new(config.gate.clone()),
            capture: CaptureEngine::new(config.capture.silence_window),
            stop_listening: AbortHandle::new(),
            transcript: Transcript::new(),
            renderer,
            speech: None,
            store: None,
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Speak replies through `queue`
    #[must_use]
    pub fn with_speech(mut self, queue: PlaybackQueue) -> Self {
        queue.set_muted(self.is_muted());
        self.speech = Some(queue);
        self
    }

    /// Persist state in `store`, restoring whatever it already holds
    #[must_use]
    pub fn with_store(mut self, store: StateRepo) -> Self {
        let snapshot = store.load();

        if let Some(id) = &snapshot.session_id {
            self.session.adopt(id);
        }
        self.muted.store(snapshot.muted, Ordering::SeqCst);
        if let Some(queue) = &self.speech {
            queue.set_muted(snapshot.muted);
        }
        self.transcript = Transcript::restore(snapshot.messages, snapshot.mood);

        tracing::debug!(
            messages = self.transcript.messages().len(),
            muted = snapshot.muted,
            "conversation restored"
        );
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.capture.is_listening()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn speech(&self) -> Option<&PlaybackQueue> {
        self.speech.as_ref()
    }

    /// Handle that aborts the in-flight exchange
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.gate.abort_handle()
    }

    /// Busy flag readable while this conversation is awaited elsewhere
    #[must_use]
    pub fn busy_watch(&self) -> BusyWatch {
        self.gate.busy_watch()
    }

    /// Handle that mutes speech while this conversation is awaited elsewhere
    ///
    /// Take it after attaching speech and storage so it reaches both.
    #[must_use]
    pub fn mute_handle(&self) -> MuteHandle {
        MuteHandle {
            muted: Arc::clone(&self.muted),
            playback: self.speech.as_ref().map(PlaybackQueue::control),
            store: self.store.clone(),
        }
    }

    /// Handle that ends the current listening session
    #[must_use]
    pub fn stop_handle(&self) -> AbortHandle {
        self.stop_listening.clone()
    }

    /// Show the restored conversation, or greet when there is none
    ///
    /// A failed handshake leaves an empty conversation.
    pub async fn startup(&mut self) {
        if !self.transcript.is_empty() {
            self.show(Change::Reset);
            return;
        }

        let session_id = self.session.get();
        let greeting = match self.client.startup(session_id.as_deref()).await {
            Ok(greeting) => greeting,
            Err(e) => {
                tracing::warn!(error = %e, "startup handshake failed");
                return;
            }
        };

        self.adopt_session(&greeting.session_id);
        if let Some(mood) = greeting.mood {
            self.update_mood(mood);
        }
        let change = self
            .transcript
            .push(Message::new(Role::Assistant, greeting.message.clone()));
        self.show(change);

        if let Some(queue) = &self.speech {
            let mut segmenter = SentenceSegmenter::new();
            for sentence in segmenter.push(&greeting.message) {
                queue.enqueue(sentence);
            }
            if let Some(rest) = segmenter.flush() {
                queue.enqueue(rest);
            }
        }

        self.persist_messages();
    }

    /// Submit an utterance
    pub async fn submit(&mut self, text: &str, origin: Origin) -> Submission {
        match self.gate.submit(text, origin, Instant::now()) {
            Ok(ticket) => self.exchange(ticket, false).await,
            Err(rejection) => Submission::Rejected(rejection),
        }
    }

    /// Resubmit the last utterance through the retry affordance
    ///
    /// Only available right after a recoverable failure, and only once.
    pub async fn retry(&mut self) -> Submission {
        if self.gate.is_busy() {
            return Submission::Rejected(Rejection::Busy);
        }
        if !self.transcript.take_retry() {
            return Submission::Rejected(Rejection::NothingToRetry);
        }
        self.show(Change::Retry);

        match self.gate.retry(Instant::now()) {
            Ok(ticket) => self.exchange(ticket, true).await,
            Err(rejection) => Submission::Rejected(rejection),
        }
    }

    /// Listen for one utterance and submit it
    ///
    /// Rejected while an exchange is in flight. Capture failures end up in
    /// the status line only.
    pub async fn listen(&mut self, recognizer: &mut dyn Recognizer) -> Submission {
        if self.gate.is_busy() {
            return Submission::Rejected(Rejection::Busy);
        }

        // Barge-in: the user talking over a reply silences it
        if let Some(queue) = &self.speech {
            queue.interrupt();
        }

        let change = self.transcript.set_status("listening");
        self.show(change);

        let stop = self.stop_listening.arm();
        let outcome = capture::listen(&mut self.capture, recognizer, &stop).await;

        if let Some(change) = self.transcript.clear_status() {
            self.show(change);
        }

        match outcome {
            CaptureOutcome::Utterance(text) => self.submit(&text, Origin::Voice).await,
            CaptureOutcome::NoSpeech => self.capture_failed(FailureKind::CaptureNoSpeech),
            CaptureOutcome::Failed(e) => self.capture_failed(e.kind()),
        }
    }

    /// End the listening session early; it finalizes with what was heard
    pub fn stop_listening(&self) {
        self.stop_listening.abort();
    }

    /// Abort the in-flight exchange
    pub fn abort(&self) {
        self.gate.abort();
    }

    /// Flip speech output; returns the new mute state
    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.mute_handle().toggle();
        let change = self
            .transcript
            .set_status(if muted { "muted" } else { "unmuted" });
        self.show(change);
        muted
    }

    /// Start over: forget the session, messages and mood
    pub fn reset(&mut self) {
        self.gate.abort();
        self.stop_listening.abort();
        if let Some(queue) = &self.speech {
            queue.interrupt();
        }

        self.session.clear();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear_conversation() {
                tracing::warn!(error = %e, "failed to clear stored conversation");
            }
        }

        let change = self.transcript.clear();
        self.show(change);
        tracing::info!("conversation reset");
    }

    async fn exchange(&mut self, ticket: Ticket, is_retry: bool) -> Submission {
        // Cut off the previous reply before anything else happens
        if let Some(queue) = &self.speech {
            queue.interrupt();
        }
        if let Some(change) = self.transcript.clear_retry() {
            self.show(change);
        }
        if let Some(change) = self.transcript.clear_status() {
            self.show(change);
        }

        let utterance = ticket.utterance().to_string();
        if !is_retry {
            let change = self
                .transcript
                .push(Message::new(Role::User, utterance.clone()));
            self.show(change);
        }
        let change = self.transcript.begin_reply();
        self.show(change);

        let mut segmenter = SentenceSegmenter::new();
        let result = ticket
            .run(self.stream_reply(&utterance, &mut segmenter))
            .await;

        let submission = match result {
            Ok(()) => Submission::Completed,
            Err(Error::Cancelled) => {
                if let Some(change) = self.transcript.finish_reply() {
                    self.show(change);
                }
                Submission::Cancelled
            }
            Err(e) => {
                let kind = e.kind();
                tracing::warn!(error = %e, kind = %kind, "exchange failed");
                for change in self.transcript.fail(kind) {
                    self.show(change);
                }
                Submission::Failed(kind)
            }
        };

        self.persist_messages();
        submission
    }

    async fn stream_reply(
        &mut self,
        utterance: &str,
        segmenter: &mut SentenceSegmenter,
    ) -> Result<()> {
        let session_id = self.session.get();
        let events = self.client.chat(session_id.as_deref(), utterance).await?;
        let mut events = pin!(events);

        while let Some(event) = events.next().await {
            self.apply(event?, segmenter);
        }
        Ok(())
    }

    /// Hand one stream event to the transcript and the speech queue
    fn apply(&mut self, event: StreamEvent, segmenter: &mut SentenceSegmenter) {
        match event {
            StreamEvent::TextDelta(text) => {
                if let Some(change) = self.transcript.append(&text) {
                    self.show(change);
                }
                if let Some(queue) = &self.speech {
                    for sentence in segmenter.push(&text) {
                        queue.enqueue(sentence);
                    }
                }
            }
            StreamEvent::SessionId(id) => self.adopt_session(&id),
            StreamEvent::Mood(mood) => self.update_mood(mood),
            StreamEvent::Done => {
                if let (Some(queue), Some(rest)) = (&self.speech, segmenter.flush()) {
                    queue.enqueue(rest);
                }
                if let Some(change) = self.transcript.finish_reply() {
                    self.show(change);
                }
            }
        }
    }

    fn capture_failed(&mut self, kind: FailureKind) -> Submission {
        let change = self.transcript.set_status(kind.user_message());
        self.show(change);
        Submission::Failed(kind)
    }

    fn adopt_session(&self, id: &str) {
        if !self.session.adopt(id) {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.set_session_id(id.trim()) {
                tracing::warn!(error = %e, "failed to persist session id");
            }
        }
    }

    fn update_mood(&mut self, mood: String) {
        if let Some(store) = &self.store {
            if let Err(e) = store.set_mood(&mood) {
                tracing::warn!(error = %e, "failed to persist mood");
            }
        }
        let change = self.transcript.set_mood(mood);
        self.show(change);
    }

    fn persist_messages(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.set_messages(&self.transcript.history(MAX_HISTORY)) {
                tracing::warn!(error = %e, "failed to persist messages");
            }
        }
    }

    fn show(&mut self, change: Change) {
        self.renderer.render(&self.transcript, &change);
    }
}
