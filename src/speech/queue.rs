//! Ordered text-to-speech playback
//!
//! Segments are spoken one at a time by a single worker task, so audio for a
//! segment never starts before the previous one (or its fallback) finished.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Produces encoded audio for a piece of text
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into playable audio bytes
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Plays encoded audio
///
/// The returned future resolves once playback has completed. Dropping it
/// must stop the audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> Result<()>;
}

/// Speaks text without the backend, used when synthesis or playback fails
///
/// Dropping the returned future must silence the voice.
#[async_trait]
pub trait LocalVoice: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;
}

struct Segment {
    text: String,
    generation: u64,
}

struct Shared {
    muted: AtomicBool,
    generation: AtomicU64,
    current: Mutex<CancellationToken>,
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn cancel_current(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    fn interrupt(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_current();
        tracing::debug!("playback interrupted");
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        if muted {
            self.cancel_current();
        }
        tracing::debug!(muted, "playback mute changed");
    }
}

/// Mute and interrupt access to a [`PlaybackQueue`] from other tasks
#[derive(Clone)]
pub struct PlaybackControl(Arc<Shared>);

impl PlaybackControl {
    /// See [`PlaybackQueue::interrupt`]
    pub fn interrupt(&self) {
        self.0.interrupt();
    }

    /// See [`PlaybackQueue::set_muted`]
    pub fn set_muted(&self, muted: bool) {
        self.0.set_muted(muted);
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.0.muted.load(Ordering::SeqCst)
    }
}

/// Serializes speech segments onto the audio output
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<Segment>,
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl PlaybackQueue {
    /// Start the playback worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        fallback: Option<Arc<dyn LocalVoice>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            muted: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            current: Mutex::new(CancellationToken::new()),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let worker = tokio::spawn(run_worker(
            rx,
            Arc::clone(&shared),
            synthesizer,
            sink,
            fallback,
        ));

        Self { tx, shared, worker }
    }

    /// Queue a segment behind everything already queued
    pub fn enqueue(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }

        let segment = Segment {
            text,
            generation: self.shared.generation.load(Ordering::SeqCst),
        };

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(segment).is_err() {
            tracing::warn!("playback worker gone, dropping segment");
            self.segment_done();
        }
    }

    /// Stop current audio and discard every queued segment
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    /// Mute or unmute speech output
    ///
    /// Muting silences the current segment immediately. Segments reaching the
    /// front of the queue while muted are drained without being played.
    pub fn set_muted(&self, muted: bool) {
        self.shared.set_muted(muted);
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// Handle that mutes or interrupts this queue while its owner is busy
    #[must_use]
    pub fn control(&self) -> PlaybackControl {
        PlaybackControl(Arc::clone(&self.shared))
    }

    /// Segments queued or in progress
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until every queued segment has been played or drained
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn segment_done(&self) {
        finish_segment(&self.shared);
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.shared.cancel_current();
        self.worker.abort();
    }
}

fn finish_segment(shared: &Shared) {
    if shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.idle.notify_waiters();
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Segment>,
    shared: Arc<Shared>,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    fallback: Option<Arc<dyn LocalVoice>>,
) {
    while let Some(segment) = rx.recv().await {
        if let Some(token) = admit(&shared, &segment) {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    tracing::debug!(segment = %segment.text, "segment cut off");
                }
                () = speak_segment(&segment.text, &*synthesizer, &*sink, fallback.as_deref()) => {}
            }
        }
        finish_segment(&shared);
    }
}

/// Install a fresh cancellation token for `segment`, unless it must be skipped
///
/// The checks run while holding the token lock, so a mute or interrupt that
/// lands concurrently either is seen here or cancels the new token.
fn admit(shared: &Shared, segment: &Segment) -> Option<CancellationToken> {
    let mut current = shared.current.lock().ok()?;

    if segment.generation != shared.generation.load(Ordering::SeqCst) {
        tracing::trace!(segment = %segment.text, "dropping segment from earlier turn");
        return None;
    }
    if shared.muted.load(Ordering::SeqCst) {
        tracing::debug!(segment = %segment.text, "muted, draining segment");
        return None;
    }

    *current = CancellationToken::new();
    Some(current.clone())
}

async fn speak_segment(
    text: &str,
    synthesizer: &dyn Synthesizer,
    sink: &dyn AudioSink,
    fallback: Option<&dyn LocalVoice>,
) {
    let failure = match synthesizer.synthesize(text).await {
        Ok(audio) => match sink.play(audio).await {
            Ok(()) => return,
            Err(e) => e,
        },
        Err(e) => e,
    };

    tracing::warn!(error = %failure, segment = text, "speech failed, using local voice");

    if let Some(voice) = fallback {
        if let Err(e) = voice.speak(text).await {
            tracing::warn!(error = %e, "local voice failed, skipping segment");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Error;

    /// Event log shared by the fakes
    #[derive(Default, Clone)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FakeSynth {
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Synthesizer for FakeSynth {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            if self.fail_on == Some(text) {
                return Err(Error::Tts("synthesis refused".to_string()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    struct FakeSink {
        log: Log,
        duration: Duration,
    }

    #[async_trait]
    impl AudioSink for FakeSink {
        async fn play(&self, audio: Vec<u8>) -> Result<()> {
            let text = String::from_utf8(audio).unwrap();
            self.log.push(format!("start {text}"));
            tokio::time::sleep(self.duration).await;
            self.log.push(format!("end {text}"));
            Ok(())
        }
    }

    struct FakeVoice {
        log: Log,
    }

    #[async_trait]
    impl LocalVoice for FakeVoice {
        async fn speak(&self, text: &str) -> Result<()> {
            self.log.push(format!("local {text}"));
            Ok(())
        }
    }

    fn queue(log: &Log, fail_on: Option<&'static str>, duration: Duration) -> PlaybackQueue {
        PlaybackQueue::spawn(
            Arc::new(FakeSynth { fail_on }),
            Arc::new(FakeSink {
                log: log.clone(),
                duration,
            }),
            Some(Arc::new(FakeVoice { log: log.clone() })),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn plays_in_order_without_overlap() {
        let log = Log::default();
        let q = queue(&log, None, Duration::from_millis(50));

        q.enqueue("one");
        q.enqueue("two");
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.enqueue("three");
        q.wait_idle().await;

        assert_eq!(
            log.entries(),
            vec!["start one", "end one", "start two", "end two", "start three", "end three"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_segment_falls_back_and_queue_continues() {
        let log = Log::default();
        let q = queue(&log, Some("bad"), Duration::from_millis(5));

        q.enqueue("good");
        q.enqueue("bad");
        q.enqueue("after");
        q.wait_idle().await;

        assert_eq!(
            log.entries(),
            vec!["start good", "end good", "local bad", "start after", "end after"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mute_stops_current_and_drains_queued() {
        let log = Log::default();
        let q = queue(&log, None, Duration::from_millis(100));

        q.enqueue("first");
        q.enqueue("second");
        q.enqueue("third");
        tokio::time::sleep(Duration::from_millis(30)).await;

        q.set_muted(true);
        q.wait_idle().await;
        assert!(q.is_muted());
        assert_eq!(log.entries(), vec!["start first"]);

        q.set_muted(false);
        q.enqueue("fourth");
        q.wait_idle().await;
        assert_eq!(
            log.entries(),
            vec!["start first", "start fourth", "end fourth"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_clears_queue() {
        let log = Log::default();
        let q = queue(&log, None, Duration::from_millis(100));

        q.enqueue("old one");
        q.enqueue("old two");
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.interrupt();
        q.enqueue("new");
        q.wait_idle().await;

        assert_eq!(log.entries(), vec!["start old one", "start new", "end new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn control_mutes_from_another_task() {
        let log = Log::default();
        let q = queue(&log, None, Duration::from_millis(100));
        let control = q.control();

        q.enqueue("playing");
        q.enqueue("queued");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            control.set_muted(true);
        });
        q.wait_idle().await;

        assert!(q.is_muted());
        assert_eq!(log.entries(), vec!["start playing"]);
    }

    #[tokio::test]
    async fn blank_segments_ignored() {
        let log = Log::default();
        let q = queue(&log, None, Duration::from_millis(1));

        q.enqueue("   ");
        assert_eq!(q.pending(), 0);
        q.wait_idle().await;
        assert!(log.entries().is_empty());
    }
}
