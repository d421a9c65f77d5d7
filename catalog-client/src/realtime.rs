//! Live collection subscriber.
//!
//! Each subscription owns one connection to the store and one forwarding
//! task. The task pushes [`LiveEvent`]s into the subscription's stream until
//! the subscription is cancelled or the connection fails; failures are
//! terminal, there is no reconnect. A new `subscribe` call opens a new
//! connection.

use crate::config::ClientConfig;
use async_trait::async_trait;
use catalog_core::{sort_newest_first, LiveMessage, LiveRecord, Record, SubscribeRequest, Timestamp};
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SUBSCRIPTION_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveError {
    #[error("Failed to connect to live endpoint: {0}")]
    Connect(String),
    #[error("Live connection failed: {0}")]
    Transport(String),
    #[error("Malformed live message: {0}")]
    Decode(String),
    #[error("Store ended the subscription: {0}")]
    Server(String),
}

/// Frames produced by an open live connection.
pub type SnapshotStream = BoxStream<'static, Result<LiveMessage, LiveError>>;

/// A push-capable store.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Open one connection subscribed with `request`. The first frame is the
    /// full collection; every later frame is the full collection after one
    /// commit.
    async fn open(&self, request: SubscribeRequest) -> Result<SnapshotStream, LiveError>;
}

/// WebSocket connection to the store's live endpoint.
#[derive(Debug, Clone)]
pub struct WsSnapshotSource {
    endpoint: String,
}

impl WsSnapshotSource {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            endpoint: config.live_endpoint.clone(),
        }
    }
}

#[async_trait]
impl SnapshotSource for WsSnapshotSource {
    async fn open(&self, request: SubscribeRequest) -> Result<SnapshotStream, LiveError> {
        let (mut socket, _) = tokio_tungstenite::connect_async(self.endpoint.as_str())
            .await
            .map_err(|err| LiveError::Connect(err.to_string()))?;

        let frame = serde_json::to_string(&request).map_err(|err| LiveError::Decode(err.to_string()))?;
        socket
            .send(Message::Text(frame))
            .await
            .map_err(|err| LiveError::Connect(err.to_string()))?;

        let frames = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(
                    serde_json::from_str::<LiveMessage>(&text)
                        .map_err(|err| LiveError::Decode(err.to_string())),
                ),
                Ok(Message::Close(_)) => Some(Err(LiveError::Transport(
                    "connection closed by store".to_string(),
                ))),
                Ok(_) => None,
                Err(err) => Some(Err(LiveError::Transport(err.to_string()))),
            }
        });
        Ok(Box::pin(frames))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection status of one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No open connection.
    #[default]
    Disconnected,
    /// Connection is being established.
    Connecting,
    /// Connected; snapshots are flowing.
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The whole collection as of one commit, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSnapshot {
    pub subscription: SubscriptionId,
    /// Position of this snapshot within its subscription, starting at 1.
    pub sequence: u64,
    pub received_at: Timestamp,
    pub records: Vec<Record>,
}

impl LiveSnapshot {
    pub fn from_wire(
        subscription: SubscriptionId,
        sequence: u64,
        records: Vec<LiveRecord>,
        received_at: Timestamp,
    ) -> Self {
        let mut records: Vec<Record> = records
            .into_iter()
            .map(|record| record.into_record(received_at))
            .collect();
        sort_newest_first(&mut records);
        Self {
            subscription,
            sequence,
            received_at,
            records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Status(ConnectionStatus),
    Snapshot(LiveSnapshot),
    /// Terminal; the stream ends after it.
    Error(LiveError),
}

/// What a consumer knows about one live subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveState {
    pub status: ConnectionStatus,
    pub snapshot: Option<LiveSnapshot>,
    pub error: Option<LiveError>,
}

impl LiveState {
    /// Fold one event into the state. Each snapshot replaces the previous.
    pub fn apply(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Status(status) => self.status = status,
            LiveEvent::Snapshot(snapshot) => {
                self.status = ConnectionStatus::Connected;
                self.snapshot = Some(snapshot);
            }
            LiveEvent::Error(error) => {
                // a failed subscription no longer vouches for its last snapshot
                self.status = ConnectionStatus::Disconnected;
                self.snapshot = None;
                self.error = Some(error);
            }
        }
    }

    /// Connected and holding at least one snapshot.
    pub fn is_live(&self) -> bool {
        self.status == ConnectionStatus::Connected && self.snapshot.is_some()
    }

    pub fn records(&self) -> Option<&[Record]> {
        self.snapshot.as_ref().map(|snapshot| snapshot.records.as_slice())
    }
}

/// Decrements the open-subscription count when the forwarding task ends.
struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Opens live subscriptions against one collection.
#[derive(Clone)]
pub struct LiveSubscriber {
    source: Arc<dyn SnapshotSource>,
    collection: String,
    open: Arc<AtomicUsize>,
}

impl LiveSubscriber {
    pub fn new(source: Arc<dyn SnapshotSource>, collection: impl Into<String>) -> Self {
        Self {
            source,
            collection: collection.into(),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Forwarding tasks still running.
    pub fn open_subscriptions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Open a subscription with its own connection.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn subscribe(&self) -> LiveSubscription {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (cancel, cancelled) = watch::channel(false);
        let guard = OpenGuard::acquire(&self.open);
        let request = SubscribeRequest::newest_first(self.collection.clone());

        info!(subscription = %id, collection = %self.collection, "Live subscription opened");
        tokio::spawn(forward(
            id,
            Arc::clone(&self.source),
            request,
            tx,
            cancelled,
            guard,
        ));

        LiveSubscription {
            id,
            events: ReceiverStream::new(rx),
            cancel,
            closed: false,
        }
    }

    /// Callback form of [`subscribe`](Self::subscribe).
    ///
    /// `on_error` runs at most once, after which the subscription is
    /// terminal. Once [`SubscriptionHandle::unsubscribe`] returns, no
    /// callback starts. Callbacks may unsubscribe their own handle.
    pub fn subscribe_with<S, E>(&self, on_snapshot: S, on_error: E) -> SubscriptionHandle
    where
        S: FnMut(LiveSnapshot) + Send + 'static,
        E: FnOnce(LiveError) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let id = subscription.id();
        let callbacks = Arc::new(Mutex::new(Some(Callbacks {
            on_snapshot: Box::new(on_snapshot),
            on_error: Box::new(on_error),
        })));
        let released = Arc::new(AtomicBool::new(false));

        let (release, mut release_rx) = watch::channel(false);
        let task_callbacks = Arc::clone(&callbacks);
        let task_released = Arc::clone(&released);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = wait_cancelled(&mut release_rx) => break,
                    event = subscription.next() => event,
                };
                let Some(event) = event else {
                    break;
                };
                let mut slot = task_callbacks.lock().unwrap_or_else(PoisonError::into_inner);
                // checked under the lock so a concurrent unsubscribe either
                // takes the callbacks first or sees this call as running
                if task_released.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    LiveEvent::Snapshot(snapshot) => match slot.as_mut() {
                        Some(callbacks) => (callbacks.on_snapshot)(snapshot),
                        None => break,
                    },
                    LiveEvent::Error(error) => {
                        task_released.store(true, Ordering::SeqCst);
                        let taken = slot.take();
                        drop(slot);
                        if let Some(callbacks) = taken {
                            (callbacks.on_error)(error);
                        }
                        break;
                    }
                    LiveEvent::Status(_) => {}
                }
            }
            task_released.store(true, Ordering::SeqCst);
            task_callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            subscription.unsubscribe();
        });

        SubscriptionHandle {
            id,
            callbacks,
            released,
            release,
        }
    }
}

async fn forward(
    id: SubscriptionId,
    source: Arc<dyn SnapshotSource>,
    request: SubscribeRequest,
    tx: mpsc::Sender<LiveEvent>,
    mut cancelled: watch::Receiver<bool>,
    guard: OpenGuard,
) {
    let _guard = guard;

    if !emit(&tx, &mut cancelled, LiveEvent::Status(ConnectionStatus::Connecting)).await {
        return;
    }

    let opened = tokio::select! {
        biased;
        _ = wait_cancelled(&mut cancelled) => return,
        opened = source.open(request) => opened,
    };
    let mut frames = match opened {
        Ok(frames) => frames,
        Err(error) => {
            warn!(subscription = %id, error = %error, "Live connection failed");
            emit(&tx, &mut cancelled, LiveEvent::Error(error)).await;
            return;
        }
    };

    if !emit(&tx, &mut cancelled, LiveEvent::Status(ConnectionStatus::Connected)).await {
        return;
    }
    debug!(subscription = %id, "Live connection established");

    let mut sequence = 0u64;
    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancelled) => break,
            frame = frames.next() => frame,
        };

        let event = match frame {
            Some(Ok(LiveMessage::Snapshot { records })) => {
                sequence += 1;
                let snapshot = LiveSnapshot::from_wire(id, sequence, records, Utc::now());
                debug!(subscription = %id, sequence, records = snapshot.len(), "Snapshot received");
                LiveEvent::Snapshot(snapshot)
            }
            Some(Ok(LiveMessage::Error { message })) => LiveEvent::Error(LiveError::Server(message)),
            Some(Err(error)) => LiveEvent::Error(error),
            None => LiveEvent::Error(LiveError::Transport("connection closed by store".to_string())),
        };

        let terminal = matches!(event, LiveEvent::Error(_));
        if let LiveEvent::Error(error) = &event {
            warn!(subscription = %id, error = %error, "Live subscription failed");
        }
        if !emit(&tx, &mut cancelled, event).await || terminal {
            break;
        }
    }

    debug!(subscription = %id, "Forwarding task finished");
}

/// Deliver one event unless the subscription is cancelled first.
async fn emit(
    tx: &mpsc::Sender<LiveEvent>,
    cancelled: &mut watch::Receiver<bool>,
    event: LiveEvent,
) -> bool {
    if *cancelled.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        _ = wait_cancelled(cancelled) => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

async fn wait_cancelled(cancelled: &mut watch::Receiver<bool>) {
    // a dropped sender counts as cancellation
    let _ = cancelled.wait_for(|cancelled| *cancelled).await;
}

/// One live subscription, consumed as a stream of [`LiveEvent`]s.
///
/// Dropping it cancels the subscription.
pub struct LiveSubscription {
    id: SubscriptionId,
    events: ReceiverStream<LiveEvent>,
    cancel: watch::Sender<bool>,
    closed: bool,
}

impl LiveSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Cancel the subscription. The stream yields nothing further, including
    /// events already buffered.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.send_replace(true);
        self.events.close();
        info!(subscription = %self.id, "Live subscription closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Stream for LiveSubscription {
    type Item = LiveEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LiveEvent>> {
        if self.closed {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl fmt::Debug for LiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct Callbacks {
    on_snapshot: Box<dyn FnMut(LiveSnapshot) + Send>,
    on_error: Box<dyn FnOnce(LiveError) + Send>,
}

/// Handle returned by [`LiveSubscriber::subscribe_with`].
///
/// Dropping the handle closes the connection but does not release the
/// callbacks until the task observes it; call
/// [`unsubscribe`](Self::unsubscribe) for the no-further-callback guarantee.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    callbacks: Arc<Mutex<Option<Callbacks>>>,
    released: Arc<AtomicBool>,
    release: watch::Sender<bool>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop delivery. No callback starts after this returns. A callback
    /// already running, including the one calling this, finishes normally.
    /// The connection closes once the forwarding task observes the release.
    pub fn unsubscribe(&self) {
        let first = !self.released.swap(true, Ordering::SeqCst);
        self.release.send_replace(true);
        let dropped = match self.callbacks.try_lock() {
            Ok(mut slot) => slot.take().is_some(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take().is_some(),
            // a callback is running; the task drops the callbacks when it exits
            Err(TryLockError::WouldBlock) => false,
        };
        if first {
            debug!(subscription = %self.id, dropped, "Callbacks released");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .finish()
    }
}
