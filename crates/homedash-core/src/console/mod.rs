// ── Broker debug console ──
//
// Operator-driven broker connection with an explicit state machine:
//
//   Idle -> Connecting -> Connected -> Idle
//   Connecting -> Idle   (timeout, cancel, connect error)
//   Connected  -> Idle   (disconnect, transport close, unload)
//
// At most one link is live. Each link gets a generation number; every
// event handler and background task checks it still owns the live link
// before touching state, so late events from a cancelled or timed-out
// attempt are dropped.

mod transcript;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use homedash_api::{BrokerConnector, BrokerLink, LinkEvent, QoS};
use serde::Serialize;
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionParams;

pub use transcript::{
    Direction, TRANSCRIPT_LIMIT, TRANSCRIPT_RETAIN, Transcript, TranscriptEntry,
};

pub const MSG_MISSING_URL: &str = "Enter a WebSocket address";
pub const MSG_TIMEOUT: &str = "Connection timed out; check the address and network, then retry";
pub const MSG_CANCELLED: &str = "Connection cancelled";
pub const MSG_CLOSED: &str = "Connection closed";

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsoleStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

/// Everything the console UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsoleState {
    pub status: ConsoleStatus,
    /// Last connection error, cleared on successful connect.
    pub error: Option<String>,
    /// Acknowledged subscriptions, unique by topic, in subscribe order.
    pub subscriptions: Vec<Subscription>,
    pub transcript: Transcript,
}

/// Why an operator request was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Skip {
    #[strum(serialize = "not connected")]
    NotConnected,
    #[strum(serialize = "topic is blank")]
    BlankTopic,
    #[strum(serialize = "already subscribed")]
    AlreadySubscribed,
}

/// Result of a subscribe/unsubscribe/publish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Acknowledged by the broker and applied to the console state.
    Done,
    Ignored(Skip),
    /// The broker refused or the link went away before acknowledging.
    Failed(String),
}

// ── DebugConsole ─────────────────────────────────────────────────────

/// Single-connection broker console.
///
/// Cheaply cloneable; clones share the same connection and state.
pub struct DebugConsole<C: BrokerConnector> {
    inner: Arc<ConsoleInner<C>>,
}

impl<C: BrokerConnector> Clone for DebugConsole<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ConsoleInner<C: BrokerConnector> {
    connector: C,
    state: watch::Sender<ConsoleState>,
    /// The one live link. Status transitions happen under this lock.
    live: Mutex<Option<LiveLink<C::Link>>>,
    generation: AtomicU64,
    /// Application shutdown; closes any live link.
    unload: CancellationToken,
}

struct LiveLink<L> {
    generation: u64,
    link: Arc<L>,
    timer: Option<AbortHandle>,
    pump: AbortHandle,
    unload_hook: AbortHandle,
}

impl<L: BrokerLink> LiveLink<L> {
    /// Close the transport and stop every task tied to this link.
    fn release(self) {
        self.link.force_close();
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.unload_hook.abort();
        self.pump.abort();
    }
}

type LiveSlot<L> = Option<LiveLink<L>>;

fn owns<L>(live: &LiveSlot<L>, generation: u64) -> bool {
    live.as_ref().is_some_and(|l| l.generation == generation)
}

impl<C: BrokerConnector> DebugConsole<C> {
    /// `unload` is the application-wide shutdown signal; when it fires, a
    /// live link is force-closed.
    pub fn new(connector: C, unload: CancellationToken) -> Self {
        let (state, _) = watch::channel(ConsoleState::default());
        Self {
            inner: Arc::new(ConsoleInner {
                connector,
                state,
                live: Mutex::new(None),
                generation: AtomicU64::new(0),
                unload,
            }),
        }
    }

    // ── Getters ──────────────────────────────────────────────────────

    pub fn state(&self) -> ConsoleState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> ConsoleStatus {
        self.inner.state.borrow().status
    }

    /// Observe every state change.
    pub fn watch(&self) -> watch::Receiver<ConsoleState> {
        self.inner.state.subscribe()
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start connecting. No-op while connecting or connected.
    ///
    /// The outcome arrives asynchronously: `Connected`, or back to `Idle`
    /// with an error (transport failure or timeout).
    pub fn connect(&self, params: &ConnectionParams) {
        let mut live = self.lock_live();
        if live.is_some() {
            debug!(status = %self.status(), "connect ignored");
            return;
        }

        let Some(url) = params.endpoint() else {
            self.update(|s| {
                s.status = ConsoleStatus::Idle;
                s.error = Some(MSG_MISSING_URL.into());
            });
            return;
        };

        let timeout = params.connect_timeout();
        let (link, events) = match self.inner.connector.open(params.link_options(url)) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(error = %e, "broker link could not be opened");
                self.update(|s| {
                    s.status = ConsoleStatus::Idle;
                    s.error = Some(e.to_string());
                });
                return;
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.update(|s| {
            s.status = ConsoleStatus::Connecting;
            s.error = None;
        });
        info!(generation, timeout_secs = timeout.as_secs(), "broker connecting");

        let timer = tokio::spawn(self.clone().connect_timer(generation, timeout));
        let pump = tokio::spawn(self.clone().pump(generation, events));
        let unload_hook = tokio::spawn(self.clone().unload_hook(generation));

        *live = Some(LiveLink {
            generation,
            link: Arc::new(link),
            timer: Some(timer.abort_handle()),
            pump: pump.abort_handle(),
            unload_hook: unload_hook.abort_handle(),
        });
    }

    /// Abort an attempt still in `Connecting`. Ignored otherwise.
    pub fn cancel_connect(&self) {
        let mut live = self.lock_live();
        if self.status() != ConsoleStatus::Connecting {
            return;
        }
        if let Some(link) = live.take() {
            link.release();
        }
        info!("broker connect cancelled");
        self.update(|s| {
            s.status = ConsoleStatus::Idle;
            s.error = Some(MSG_CANCELLED.into());
        });
    }

    /// Close the live link (if any) and forget all subscriptions.
    pub fn disconnect(&self) {
        let mut live = self.lock_live();
        if let Some(link) = live.take() {
            link.release();
            info!("broker disconnected");
        }
        self.update(|s| {
            s.status = ConsoleStatus::Idle;
            s.error = None;
            s.subscriptions.clear();
        });
    }

    // ── Operator requests ────────────────────────────────────────────

    /// Subscribe to `topic`. The subscription is recorded once the broker
    /// acknowledges it.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Outcome {
        let topic = topic.trim();
        if topic.is_empty() {
            return Outcome::Ignored(Skip::BlankTopic);
        }
        let Some((generation, link)) = self.connected_link() else {
            return Outcome::Ignored(Skip::NotConnected);
        };
        if self.is_subscribed(topic) {
            return Outcome::Ignored(Skip::AlreadySubscribed);
        }

        if let Err(e) = link.subscribe(topic, qos).await {
            warn!(topic, error = %e, "subscribe failed");
            return Outcome::Failed(e.to_string());
        }

        let live = self.lock_live();
        if !owns(&live, generation) {
            return Outcome::Failed(MSG_CLOSED.into());
        }
        debug!(topic, %qos, "subscribed");
        self.update(|s| {
            if !s.subscriptions.iter().any(|sub| sub.topic == topic) {
                s.subscriptions.push(Subscription {
                    topic: topic.to_owned(),
                    qos,
                });
            }
        });
        Outcome::Done
    }

    /// Unsubscribe from `topic`. Unknown topics are still sent to the
    /// broker; the subscription list is unchanged for them.
    pub async fn unsubscribe(&self, topic: &str) -> Outcome {
        let topic = topic.trim();
        if topic.is_empty() {
            return Outcome::Ignored(Skip::BlankTopic);
        }
        let Some((generation, link)) = self.connected_link() else {
            return Outcome::Ignored(Skip::NotConnected);
        };

        if let Err(e) = link.unsubscribe(topic).await {
            warn!(topic, error = %e, "unsubscribe failed");
            return Outcome::Failed(e.to_string());
        }

        let live = self.lock_live();
        if !owns(&live, generation) {
            return Outcome::Failed(MSG_CLOSED.into());
        }
        debug!(topic, "unsubscribed");
        self.update(|s| s.subscriptions.retain(|sub| sub.topic != topic));
        Outcome::Done
    }

    /// Publish `payload` to `topic`; logged as outbound once acknowledged.
    pub async fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> Outcome {
        let topic = topic.trim();
        if topic.is_empty() {
            return Outcome::Ignored(Skip::BlankTopic);
        }
        let Some((generation, link)) = self.connected_link() else {
            return Outcome::Ignored(Skip::NotConnected);
        };

        let bytes = Bytes::copy_from_slice(payload.as_bytes());
        if let Err(e) = link.publish(topic, bytes, qos, retain).await {
            warn!(topic, error = %e, "publish failed");
            return Outcome::Failed(e.to_string());
        }

        let live = self.lock_live();
        if !owns(&live, generation) {
            return Outcome::Failed(MSG_CLOSED.into());
        }
        trace!(topic, %qos, retain, "published");
        self.update(|s| {
            s.transcript
                .push(TranscriptEntry::new(Direction::Out, topic, payload));
        });
        Outcome::Done
    }

    pub fn clear_transcript(&self) {
        self.update(|s| s.transcript.clear());
    }

    // ── Background tasks ─────────────────────────────────────────────

    async fn connect_timer(self, generation: u64, timeout: Duration) {
        tokio::time::sleep(timeout).await;

        let mut live = self.lock_live();
        if !owns(&live, generation) || self.status() != ConsoleStatus::Connecting {
            return;
        }
        if let Some(link) = live.take() {
            link.release();
        }
        warn!(timeout_secs = timeout.as_secs(), "broker connect timed out");
        self.update(|s| {
            s.status = ConsoleStatus::Idle;
            s.error = Some(MSG_TIMEOUT.into());
        });
    }

    async fn pump(self, generation: u64, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Connected => self.on_connected(generation),
                LinkEvent::Message { topic, payload } => {
                    self.on_message(generation, topic, &payload);
                }
                LinkEvent::Error(text) => self.on_error(generation, text),
                LinkEvent::Closed => break,
            }
        }
        self.on_closed(generation);
    }

    async fn unload_hook(self, generation: u64) {
        self.inner.unload.cancelled().await;

        let mut live = self.lock_live();
        if !owns(&live, generation) {
            return;
        }
        if let Some(link) = live.take() {
            link.release();
        }
        info!("shutting down: broker link closed");
        self.update(|s| s.status = ConsoleStatus::Idle);
    }

    // ── Link events ──────────────────────────────────────────────────

    fn on_connected(&self, generation: u64) {
        let mut live = self.lock_live();
        let Some(current) = live.as_mut().filter(|l| l.generation == generation) else {
            debug!(generation, "stale connect event ignored");
            return;
        };
        if let Some(timer) = current.timer.take() {
            timer.abort();
        }
        info!(generation, "broker connected");
        self.update(|s| {
            s.status = ConsoleStatus::Connected;
            s.error = None;
        });
    }

    fn on_message(&self, generation: u64, topic: String, payload: &[u8]) {
        let live = self.lock_live();
        if !owns(&live, generation) {
            return;
        }
        trace!(topic = %topic, bytes = payload.len(), "inbound message");
        let text = String::from_utf8_lossy(payload);
        self.update(|s| {
            s.transcript
                .push(TranscriptEntry::new(Direction::In, topic, text));
        });
    }

    fn on_error(&self, generation: u64, text: String) {
        let mut live = self.lock_live();
        if !owns(&live, generation) {
            return;
        }
        warn!(error = %text, "broker transport error");
        let connecting = self.status() == ConsoleStatus::Connecting;
        if connecting {
            if let Some(link) = live.take() {
                link.release();
            }
        }
        self.update(|s| {
            s.error = Some(text);
            if connecting {
                s.status = ConsoleStatus::Idle;
            }
        });
    }

    fn on_closed(&self, generation: u64) {
        let mut live = self.lock_live();
        if !owns(&live, generation) {
            return;
        }
        if let Some(link) = live.take() {
            link.release();
        }
        info!(generation, "broker link closed");
        self.update(|s| {
            s.status = ConsoleStatus::Idle;
            s.subscriptions.clear();
        });
    }

    // ── Internals ────────────────────────────────────────────────────

    fn lock_live(&self) -> MutexGuard<'_, LiveSlot<C::Link>> {
        self.inner.live.lock().expect("console link lock poisoned")
    }

    fn update(&self, modify: impl FnOnce(&mut ConsoleState)) {
        self.inner.state.send_modify(modify);
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.inner
            .state
            .borrow()
            .subscriptions
            .iter()
            .any(|s| s.topic == topic)
    }

    /// The live link, only once the handshake has completed.
    fn connected_link(&self) -> Option<(u64, Arc<C::Link>)> {
        let live = self.lock_live();
        if self.status() != ConsoleStatus::Connected {
            return None;
        }
        live.as_ref().map(|l| (l.generation, Arc::clone(&l.link)))
    }
}
