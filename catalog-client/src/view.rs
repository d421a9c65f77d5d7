//! The catalog view: the consumer of both data sources.
//!
//! Mounting subscribes the record-list query and opens one live
//! subscription. The owner drives the view by awaiting
//! [`CatalogView::next_update`] and reads the reconciled list between
//! updates. Unmounting tears both sources down before it returns.

use crate::gateway::{ActionError, ActionKind, Gateway};
use crate::notifications::{Notification, NotificationAction, NotificationLevel, NotificationQueue};
use crate::realtime::{ConnectionStatus, LiveError, LiveEvent, LiveState, LiveSubscriber, LiveSubscription};
use crate::reconcile::{select, ReconcilePolicy, Source};
use catalog_cache::{QueryState, QuerySubscription};
use catalog_core::{CreateRecordInput, Record, RecordId, RecordStatus, UpdateRecordInput, ValidationError};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// What the table should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderState {
    Loading,
    Failed(String),
    Empty,
    Rows(usize),
}

/// One change applied by [`CatalogView::next_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    /// The cached list entry changed (fetch started, finished or failed).
    Cache,
    LiveStatus(ConnectionStatus),
    LiveSnapshot { records: usize },
    LiveFailed(LiveError),
}

#[derive(Default)]
struct ActionState {
    pending: HashMap<ActionKind, usize>,
    last_error: Option<ActionError>,
    notifications: NotificationQueue,
    unmounted: bool,
}

/// Action functions bound to one view. Cheap to clone, so actions can run
/// on other tasks while the owner keeps polling the view.
#[derive(Clone)]
pub struct ViewActions {
    gateway: Gateway,
    state: Arc<Mutex<ActionState>>,
}

/// Keeps an action counted as pending until it finishes or is dropped.
struct PendingGuard {
    state: Arc<Mutex<ActionState>>,
    kind: ActionKind,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = state.pending.get_mut(&self.kind) {
            *count = count.saturating_sub(1);
        }
    }
}

impl ViewActions {
    fn lock(&self) -> MutexGuard<'_, ActionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn track<T>(
        &self,
        kind: ActionKind,
        success: &str,
        action: impl Future<Output = Result<T, ActionError>>,
    ) -> Result<T, ActionError> {
        let _pending = {
            let mut state = self.lock();
            *state.pending.entry(kind).or_default() += 1;
            PendingGuard {
                state: Arc::clone(&self.state),
                kind,
            }
        };

        let result = action.await;

        let mut state = self.lock();
        if state.unmounted {
            debug!(operation = kind.as_str(), "View gone, action result not recorded");
            return result;
        }
        match &result {
            Ok(_) => {
                state.last_error = None;
                state
                    .notifications
                    .push(Notification::new(NotificationLevel::Success, success));
            }
            Err(err) => {
                let mut notice = Notification::new(NotificationLevel::Error, err.user_message());
                if !err.is_validation() {
                    notice = notice.with_action(NotificationAction::Retry);
                }
                state.notifications.push(notice);
                state.last_error = Some(err.clone());
            }
        }
        drop(state);
        result
    }

    pub async fn create_record(&self, input: CreateRecordInput) -> Result<Record, ActionError> {
        self.track(ActionKind::Create, "Record created.", self.gateway.create(input))
            .await
    }

    pub async fn update_record(
        &self,
        id: &RecordId,
        input: UpdateRecordInput,
    ) -> Result<Record, ActionError> {
        self.track(ActionKind::Update, "Record updated.", self.gateway.update(id, input))
            .await
    }

    pub async fn delete_record(&self, id: &RecordId) -> Result<(), ActionError> {
        self.track(ActionKind::Delete, "Record deleted.", self.gateway.delete(id))
            .await
    }

    pub async fn set_status(
        &self,
        id: &RecordId,
        status: RecordStatus,
    ) -> Result<Record, ActionError> {
        self.track(
            ActionKind::SetStatus,
            "Status updated.",
            self.gateway.set_status(id, status),
        )
        .await
    }

    pub fn pending(&self, kind: ActionKind) -> bool {
        self.lock().pending.get(&kind).copied().unwrap_or(0) > 0
    }

    pub fn last_error(&self) -> Option<ActionError> {
        self.lock().last_error.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(Uuid);

impl ViewId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct CatalogView {
    id: ViewId,
    policy: ReconcilePolicy,
    subscriber: LiveSubscriber,
    actions: ViewActions,
    list: QuerySubscription<Vec<Record>>,
    list_open: bool,
    live: LiveSubscription,
    live_open: bool,
    live_state: LiveState,
}

impl CatalogView {
    /// Subscribe the list query and open this view's live subscription.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn mount(gateway: Gateway, subscriber: LiveSubscriber, policy: ReconcilePolicy) -> Self {
        let id = ViewId::new();
        let list = gateway.subscribe_list();
        let live = subscriber.subscribe();
        info!(view = %id, subscription = %live.id(), policy = %policy, "Catalog view mounted");
        Self {
            id,
            policy,
            subscriber,
            actions: ViewActions {
                gateway,
                state: Arc::new(Mutex::new(ActionState::default())),
            },
            list,
            list_open: true,
            live,
            live_open: true,
            live_state: LiveState::default(),
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// Wait for and apply the next change from either source.
    ///
    /// Returns `None` once neither source can change any more.
    pub async fn next_update(&mut self) -> Option<ViewUpdate> {
        tokio::select! {
            changed = self.list.changed(), if self.list_open => {
                if !changed {
                    self.list_open = false;
                }
                Some(ViewUpdate::Cache)
            }
            event = self.live.next(), if self.live_open => match event {
                Some(event) => Some(self.apply_live(event)),
                None => {
                    self.live_open = false;
                    Some(ViewUpdate::LiveStatus(self.live_state.status))
                }
            },
            else => None,
        }
    }

    fn apply_live(&mut self, event: LiveEvent) -> ViewUpdate {
        let update = match &event {
            LiveEvent::Status(status) => ViewUpdate::LiveStatus(*status),
            LiveEvent::Snapshot(snapshot) => ViewUpdate::LiveSnapshot {
                records: snapshot.len(),
            },
            LiveEvent::Error(error) => {
                let notice = Notification::new(
                    NotificationLevel::Warning,
                    format!("Live updates stopped: {error}"),
                )
                .with_action(NotificationAction::Resubscribe);
                self.actions.lock().notifications.push(notice);
                ViewUpdate::LiveFailed(error.clone())
            }
        };
        self.live_state.apply(event);
        update
    }

    /// Replace the live subscription with a fresh one, e.g. after a failure.
    pub fn resubscribe(&mut self) {
        self.live.unsubscribe();
        self.live = self.subscriber.subscribe();
        self.live_open = true;
        self.live_state = LiveState::default();
        info!(view = %self.id, subscription = %self.live.id(), "Live subscription replaced");
    }

    /// Refetch the list now. Returns `false` when a fetch is already running.
    pub fn refresh(&self) -> bool {
        self.list.refetch()
    }

    pub fn list_state(&self) -> QueryState<Vec<Record>> {
        self.list.state()
    }

    pub fn live_state(&self) -> &LiveState {
        &self.live_state
    }

    pub fn live_status(&self) -> ConnectionStatus {
        self.live_state.status
    }

    pub fn live_error(&self) -> Option<&LiveError> {
        self.live_state.error.as_ref()
    }

    /// The source currently rendered and its records.
    pub fn selection(&self) -> (Source, Vec<Record>) {
        let cached = self.list.state().data;
        let cache_list = cached.as_deref().map(Vec::as_slice).unwrap_or(&[]);
        let selection = select(self.policy, cache_list, &self.live_state);
        (selection.source, selection.records.to_vec())
    }

    pub fn records(&self) -> Vec<Record> {
        self.selection().1
    }

    pub fn source(&self) -> Source {
        self.selection().0
    }

    pub fn is_loading(&self) -> bool {
        self.list.state().is_loading
    }

    pub fn is_error(&self) -> bool {
        self.list.state().is_error
    }

    /// Load failure of the list query, mapped for display.
    pub fn list_error(&self) -> Option<ActionError> {
        self.list
            .state()
            .error
            .map(|err| ActionError::from_fetch(ActionKind::Load, &err))
    }

    pub fn render_state(&self) -> RenderState {
        let state = self.list.state();
        let (source, records) = self.selection();
        if source == Source::Live || state.data.is_some() {
            return if records.is_empty() {
                RenderState::Empty
            } else {
                RenderState::Rows(records.len())
            };
        }
        if let Some(err) = &state.error {
            return RenderState::Failed(ActionError::from_fetch(ActionKind::Load, err).user_message());
        }
        RenderState::Loading
    }

    pub fn actions(&self) -> ViewActions {
        self.actions.clone()
    }

    pub async fn create_record(&self, input: CreateRecordInput) -> Result<Record, ActionError> {
        self.actions.create_record(input).await
    }

    pub async fn update_record(
        &self,
        id: &RecordId,
        input: UpdateRecordInput,
    ) -> Result<Record, ActionError> {
        self.actions.update_record(id, input).await
    }

    pub async fn delete_record(&self, id: &RecordId) -> Result<(), ActionError> {
        self.actions.delete_record(id).await
    }

    pub async fn set_status(
        &self,
        id: &RecordId,
        status: RecordStatus,
    ) -> Result<Record, ActionError> {
        self.actions.set_status(id, status).await
    }

    /// Flip the status of a rendered record.
    pub async fn toggle_status(&self, id: &RecordId) -> Result<Record, ActionError> {
        let current = self
            .records()
            .into_iter()
            .find(|record| &record.id == id)
            .map(|record| record.status);
        let Some(current) = current else {
            return Err(ActionError::Validation(ValidationError::invalid(
                "id",
                format!("record {id} is not in the current list"),
            )));
        };
        self.actions.set_status(id, current.toggled()).await
    }

    pub fn pending(&self, kind: ActionKind) -> bool {
        self.actions.pending(kind)
    }

    pub fn last_error(&self) -> Option<ActionError> {
        self.actions.last_error()
    }

    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.actions.lock().notifications.drain()
    }

    /// Close the live subscription and release the list query.
    pub fn unmount(self) {
        info!(view = %self.id, "Catalog view unmounted");
        drop(self);
    }
}

impl fmt::Debug for CatalogView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogView")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("live", &self.live)
            .field("live_status", &self.live_state.status)
            .finish()
    }
}

impl Drop for CatalogView {
    fn drop(&mut self) {
        self.live.unsubscribe();
        self.actions.lock().unmounted = true;
    }
}
