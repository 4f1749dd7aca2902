//! Request gate
//!
//! Admits at most one conversational exchange at a time, spaced by a
//! per-origin cooldown. An admitted exchange holds a [`Ticket`]; the busy flag
//! is cleared when the ticket is dropped, so every exit path (success, error,
//! timeout, abort, panic unwind) releases the gate.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GateConfig;
use crate::{Error, Result};

/// Where an utterance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Typed,
    Voice,
}

/// Why a submission was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Shorter than the minimum after trimming
    TooShort,
    /// Another exchange is in flight
    Busy,
    /// Too soon after the previous submission
    CoolingDown,
    /// Retry requested with nothing submitted yet
    NothingToRetry,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => f.write_str("utterance too short"),
            Self::Busy => f.write_str("exchange in flight"),
            Self::CoolingDown => f.write_str("cooling down"),
            Self::NothingToRetry => f.write_str("nothing to retry"),
        }
    }
}

/// Cancels whatever operation was armed last
///
/// Cloneable, so another task (an input reader, a signal handler) can cancel
/// an exchange or a listening session while its owner is busy awaiting it.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<Mutex<CancellationToken>>);

impl AbortHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the token with a fresh one and return it
    #[must_use]
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.0.lock() {
            *current = token.clone();
        }
        token
    }

    /// Cancel the armed token; harmless if its operation already finished
    pub fn abort(&self) {
        if let Ok(current) = self.0.lock() {
            current.cancel();
        }
    }
}

/// Clears the busy flag when dropped
#[derive(Debug)]
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
        tracing::trace!("gate released");
    }
}

/// An admitted exchange
#[derive(Debug)]
pub struct Ticket {
    utterance: String,
    origin: Origin,
    timeout: Duration,
    abort: CancellationToken,
    _guard: BusyGuard,
}

impl Ticket {
    #[must_use]
    pub fn utterance(&self) -> &str {
        &self.utterance
    }

    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }

    /// Drive the exchange under the gate's timeout and abort signal
    ///
    /// `exchange` is dropped (cancelling any in-flight request) when the
    /// timeout fires or the gate is aborted. The gate is released when this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] or [`Error::Cancelled`], or whatever error
    /// `exchange` produced
    pub async fn run<F, T>(self, exchange: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.abort.cancelled() => {
                tracing::debug!("exchange aborted");
                Err(Error::Cancelled)
            }
            result = tokio::time::timeout(self.timeout, exchange) => {
                result.unwrap_or_else(|_| {
                    tracing::warn!(timeout_secs = self.timeout.as_secs(), "exchange timed out");
                    Err(Error::Timeout)
                })
            }
        }
    }
}

/// Read-only view of a gate's busy flag, for tasks that do not own the gate
#[derive(Debug, Clone)]
pub struct BusyWatch(Arc<AtomicBool>);

impl BusyWatch {
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Single in-flight exchange guard
#[derive(Debug)]
pub struct RequestGate {
    config: GateConfig,
    busy: Arc<AtomicBool>,
    abort: AbortHandle,
    last_accepted: Option<Instant>,
    last_utterance: Option<(String, Origin)>,
}

impl RequestGate {
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            busy: Arc::new(AtomicBool::new(false)),
            abort: AbortHandle::new(),
            last_accepted: None,
            last_utterance: None,
        }
    }

    /// Whether an exchange is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn busy_watch(&self) -> BusyWatch {
        BusyWatch(Arc::clone(&self.busy))
    }

    /// Text of the last admitted submission
    #[must_use]
    pub fn last_utterance(&self) -> Option<&str> {
        self.last_utterance.as_ref().map(|(text, _)| text.as_str())
    }

    #[must_use]
    pub const fn cooldown(&self, origin: Origin) -> Duration {
        match origin {
            Origin::Typed => self.config.typed_cooldown,
            Origin::Voice => self.config.voice_cooldown,
        }
    }

    /// Admit a submission
    ///
    /// A rejection leaves the gate untouched.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] reason when the submission is not admitted
    pub fn submit(
        &mut self,
        utterance: &str,
        origin: Origin,
        now: Instant,
    ) -> std::result::Result<Ticket, Rejection> {
        let utterance = utterance.trim();
        if utterance.chars().count() < self.config.min_utterance_chars {
            tracing::debug!(utterance, "rejected: too short");
            return Err(Rejection::TooShort);
        }

        let cooldown = self.cooldown(origin);
        if self
            .last_accepted
            .is_some_and(|at| now.saturating_duration_since(at) < cooldown)
        {
            tracing::debug!(?origin, "rejected: cooling down");
            return Err(Rejection::CoolingDown);
        }

        self.admit(utterance.to_string(), origin, now)
    }

    /// Resubmit the last admitted utterance
    ///
    /// Ignores the cooldown: retry is an explicit user request following a
    /// failed exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::NothingToRetry`] or [`Rejection::Busy`]
    pub fn retry(&mut self, now: Instant) -> std::result::Result<Ticket, Rejection> {
        let (utterance, origin) = self
            .last_utterance
            .clone()
            .ok_or(Rejection::NothingToRetry)?;
        tracing::debug!(utterance = %utterance, "retrying");
        self.admit(utterance, origin, now)
    }

    /// Cancel the in-flight exchange, if any
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Handle that cancels the in-flight exchange from elsewhere
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn admit(
        &mut self,
        utterance: String,
        origin: Origin,
        now: Instant,
    ) -> std::result::Result<Ticket, Rejection> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("rejected: busy");
            return Err(Rejection::Busy);
        }

        self.last_accepted = Some(now);
        self.last_utterance = Some((utterance.clone(), origin));

        tracing::debug!(utterance = %utterance, ?origin, "exchange admitted");
        Ok(Ticket {
            utterance,
            origin,
            timeout: self.config.request_timeout,
            abort: self.abort.arm(),
            _guard: BusyGuard(Arc::clone(&self.busy)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> RequestGate {
        RequestGate::new(GateConfig::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn short_utterances_never_admitted() {
        let mut gate = gate();
        let now = Instant::now();

        for text in ["", " ", "a", "  b  ", "\n"] {
            assert_eq!(
                gate.submit(text, Origin::Typed, now).unwrap_err(),
                Rejection::TooShort
            );
        }
        assert!(!gate.is_busy());
        assert_eq!(gate.last_utterance(), None);
    }

    #[test]
    fn utterance_trimmed() {
        let mut gate = gate();
        let ticket = gate.submit("  hi  ", Origin::Typed, Instant::now()).unwrap();
        assert_eq!(ticket.utterance(), "hi");
    }

    #[test]
    fn busy_until_ticket_dropped() {
        let mut gate = gate();
        let t0 = Instant::now();

        let watch = gate.busy_watch();
        let ticket = gate.submit("first", Origin::Typed, t0).unwrap();
        assert!(gate.is_busy());
        assert!(watch.is_busy());
        assert_eq!(
            gate.submit("second", Origin::Typed, t0 + ms(5000)).unwrap_err(),
            Rejection::Busy
        );
        // Rejection keeps the first utterance for retry
        assert_eq!(gate.last_utterance(), Some("first"));

        drop(ticket);
        assert!(!gate.is_busy());
        assert!(!watch.is_busy());
        assert!(gate.submit("second", Origin::Typed, t0 + ms(5000)).is_ok());
    }

    #[test]
    fn voice_cooldown_rejects_without_mutation() {
        let mut gate = gate();
        let t0 = Instant::now();

        drop(gate.submit("hello", Origin::Voice, t0).unwrap());

        for offset in [1, 500, 1999] {
            assert_eq!(
                gate.submit("again", Origin::Voice, t0 + ms(offset))
                    .unwrap_err(),
                Rejection::CoolingDown
            );
            assert!(!gate.is_busy());
            assert_eq!(gate.last_utterance(), Some("hello"));
        }

        assert!(gate.submit("again", Origin::Voice, t0 + ms(2000)).is_ok());
    }

    #[test]
    fn typed_cooldown_is_shorter() {
        let mut gate = gate();
        let t0 = Instant::now();

        drop(gate.submit("hello", Origin::Voice, t0).unwrap());
        assert_eq!(
            gate.submit("typed", Origin::Typed, t0 + ms(400)).unwrap_err(),
            Rejection::CoolingDown
        );
        assert!(gate.submit("typed", Origin::Typed, t0 + ms(600)).is_ok());
    }

    #[test]
    fn retry_resubmits_last_utterance() {
        let mut gate = gate();
        let t0 = Instant::now();

        assert_eq!(gate.retry(t0).unwrap_err(), Rejection::NothingToRetry);

        drop(gate.submit("tell me more", Origin::Voice, t0).unwrap());
        let ticket = gate.retry(t0 + ms(10)).unwrap();
        assert_eq!(ticket.utterance(), "tell me more");
        assert_eq!(ticket.origin(), Origin::Voice);
        assert_eq!(gate.retry(t0 + ms(20)).unwrap_err(), Rejection::Busy);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_exchange_and_releases() {
        let mut gate = gate();
        let ticket = gate.submit("slow", Origin::Typed, Instant::now()).unwrap();

        let result: Result<()> = ticket
            .run(async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert!(!gate.is_busy());
    }

    #[tokio::test]
    async fn abort_cancels_exchange() {
        let mut gate = gate();
        let ticket = gate.submit("abort me", Origin::Typed, Instant::now()).unwrap();

        gate.abort();
        let result: Result<()> = ticket.run(std::future::pending()).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!gate.is_busy());
    }

    #[tokio::test]
    async fn abort_handle_reaches_current_exchange_only() {
        let mut gate = gate();
        let handle = gate.abort_handle();

        // Aborting while idle must not poison the next exchange
        handle.abort();
        let ticket = gate.submit("first", Origin::Typed, Instant::now()).unwrap();
        let result = ticket.run(async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);

        let ticket = gate
            .submit("second", Origin::Typed, Instant::now() + Duration::from_secs(5))
            .unwrap();
        handle.abort();
        let result: Result<()> = ticket.run(std::future::pending()).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn failed_exchange_releases() {
        let mut gate = gate();
        let ticket = gate.submit("boom", Origin::Typed, Instant::now()).unwrap();

        let result: Result<()> = ticket.run(async { Err(Error::RateLimited) }).await;

        assert!(matches!(result, Err(Error::RateLimited)));
        assert!(!gate.is_busy());
    }

    #[tokio::test]
    async fn panicking_exchange_releases() {
        let mut gate = gate();
        let ticket = gate.submit("panic", Origin::Typed, Instant::now()).unwrap();

        async fn explode() -> Result<()> {
            panic!("decoder blew up")
        }

        let handle = tokio::spawn(ticket.run(explode()));

        assert!(handle.await.is_err());
        assert!(!gate.is_busy());
    }
}
