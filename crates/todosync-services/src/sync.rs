//! Local-first sync engine.
//!
//! Every mutation is applied to the item store and persistence first, then
//! pushed to the server in a spawned chain. A clean state syncs the single
//! item with retries; a dirty state (or an exhausted chain) falls back to a
//! full reconciliation that uploads the local set and merges the server's
//! answer back while keeping local categories.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::events::{SyncEvent, SyncOutcome};
use crate::item_store::{Bucket, ItemStore};
use crate::persistence::Persistence;
use crate::preferences::Preferences;
use crate::remote::{RemoteClient, RemoteError};
use crate::retry::{with_retry, RetryConfig, Timer};
use crate::task::{Category, Task, TaskId};
use crate::task_backend::{Filter, SortOrder};
use crate::task_csv::{self, CsvError};

/// Everything the engine needs, built by the caller.
pub struct SyncEngineParts {
    pub persistence: Persistence,
    pub preferences: Preferences,
    pub remote: Arc<RemoteClient>,
    pub retry: RetryConfig,
    pub timer: Arc<dyn Timer>,
    /// Offset used to group deadlines into calendar days.
    pub offset: FixedOffset,
}

/// State confined behind one lock. Never held across an await.
struct LocalState {
    items: ItemStore,
    persistence: Persistence,
    preferences: Preferences,
}

struct Shared {
    state: Mutex<LocalState>,
    remote: Arc<RemoteClient>,
    retry: RetryConfig,
    timer: Arc<dyn Timer>,
    events: mpsc::UnboundedSender<SyncEvent>,
    offline: AtomicBool,
    chains: Mutex<HashMap<TaskId, (u64, CancellationToken)>>,
    next_chain: AtomicU64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

enum Mutation {
    Add(Task),
    Update(Task),
    Delete(TaskId),
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Add(task) => write!(f, "add {}", task.id),
            Mutation::Update(task) => write!(f, "update {}", task.id),
            Mutation::Delete(id) => write!(f, "delete {}", id),
        }
    }
}

/// Entry point for the UI: local mutations, sync triggers and read access.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Shared>,
}

impl SyncEngine {
    /// Build the engine and load the local snapshot from persistence.
    /// Events are delivered on the returned receiver.
    pub fn new(parts: SyncEngineParts) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let mut items = ItemStore::new(parts.offset);
        items.replace_all(parts.persistence.fetch_all());
        let items = items.with_events(events.clone());
        tracing::info!(
            "Loaded {} tasks from {:?} storage",
            items.len(),
            parts.persistence.kind()
        );

        let inner = Shared {
            state: Mutex::new(LocalState {
                items,
                persistence: parts.persistence,
                preferences: parts.preferences,
            }),
            remote: parts.remote,
            retry: parts.retry,
            timer: parts.timer,
            events,
            offline: AtomicBool::new(false),
            chains: Mutex::new(HashMap::new()),
            next_chain: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        (Self { inner: Arc::new(inner) }, rx)
    }

    /// Initial sync: a full reconciliation if the last session left local
    /// state dirty, a plain load otherwise.
    pub fn start(&self) -> JoinHandle<SyncOutcome> {
        if self.is_dirty() {
            tracing::info!("Local state is dirty, reconciling with server");
            self.reconcile()
        } else {
            tracing::info!("Loading tasks from server");
            let engine = self.clone();
            self.spawn_tracked(async move { engine.load_now().await })
        }
    }

    /// Full two-way sync.
    pub fn reconcile(&self) -> JoinHandle<SyncOutcome> {
        let engine = self.clone();
        self.spawn_tracked(async move { engine.reconcile_now().await })
    }

    /// Store a new task locally and push it.
    pub fn add_task(&self, task: Task) -> JoinHandle<SyncOutcome> {
        let dirty = {
            let mut state = self.inner.state.lock();
            state.items.upsert(task.clone());
            state.persistence.insert(&task);
            state.preferences.register_category(&task.category);
            state.preferences.is_dirty()
        };
        self.dispatch(task.id, Mutation::Add(task), dirty)
    }

    /// Replace a task locally and push it. `created_at` is kept from the
    /// stored copy and `changed_at` is refreshed.
    pub fn update_task(&self, mut task: Task) -> JoinHandle<SyncOutcome> {
        let dirty = {
            let mut state = self.inner.state.lock();
            if let Some(existing) = state.items.get(&task.id) {
                task.created_at = existing.created_at;
            }
            task.changed_at = Some(Utc::now());

            state.items.upsert(task.clone());
            state.persistence.upsert(&task);
            state.preferences.register_category(&task.category);
            state.preferences.is_dirty()
        };
        self.dispatch(task.id, Mutation::Update(task), dirty)
    }

    /// Flip a task's completion flag. Returns `None` for an unknown id.
    pub fn toggle_done(&self, id: TaskId) -> Option<JoinHandle<SyncOutcome>> {
        let task = self.inner.state.lock().items.get(&id)?.toggled_done();
        Some(self.update_task(task))
    }

    /// Remove a task locally and push the deletion.
    pub fn delete_task(&self, id: TaskId) -> JoinHandle<SyncOutcome> {
        let dirty = {
            let mut state = self.inner.state.lock();
            state.items.remove(&id);
            state.persistence.delete(&id);
            state.preferences.is_dirty()
        };
        self.dispatch(id, Mutation::Delete(id), dirty)
    }

    /// Write the current snapshot as CSV. Returns the number of tasks written.
    ///
    /// # Errors
    /// Returns `CsvError` if writing fails.
    pub fn export_csv<W: io::Write>(&self, writer: W) -> Result<usize, CsvError> {
        let tasks = self.tasks();
        task_csv::write_tasks(writer, &tasks)?;
        tracing::info!("Exported {} tasks", tasks.len());
        Ok(tasks.len())
    }

    /// Merge tasks read from CSV into local state, then reconcile so the
    /// server receives them. A row whose id is already stored replaces it.
    ///
    /// # Errors
    /// Returns `CsvError` if reading fails. Invalid rows are skipped.
    pub fn import_csv<R: io::Read>(
        &self,
        reader: R,
    ) -> Result<(usize, JoinHandle<SyncOutcome>), CsvError> {
        let tasks = task_csv::read_tasks(reader)?;
        {
            let mut state = self.inner.state.lock();
            for task in &tasks {
                state.items.upsert(task.clone());
                state.persistence.upsert(task);
                state.preferences.register_category(&task.category);
            }
            state.preferences.set_dirty(true);
        }
        tracing::info!("Imported {} tasks", tasks.len());
        Ok((tasks.len(), self.reconcile()))
    }

    /// Cancel all pending chains and wait for spawned work to finish.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down sync engine");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    // Read side

    /// Snapshot ordered by creation time.
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.state.lock().items.snapshot()
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.inner.state.lock().items.get(id).cloned()
    }

    pub fn sorted_tasks(&self, sort: SortOrder, filter: Filter) -> Vec<Task> {
        self.inner.state.lock().persistence.fetch_filtered(sort, filter)
    }

    pub fn sections(&self) -> Vec<NaiveDate> {
        self.inner.state.lock().items.sections_by_deadline()
    }

    pub fn section_at(&self, index: usize) -> Option<Bucket> {
        self.inner.state.lock().items.section_at(index)
    }

    pub fn items_in(&self, bucket: Bucket) -> Vec<Task> {
        self.inner.state.lock().items.items_in(bucket)
    }

    pub fn done_count(&self) -> usize {
        self.inner.state.lock().items.done_count()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.inner.state.lock().preferences.categories()
    }

    pub fn register_category(&self, category: &Category) -> bool {
        self.inner.state.lock().preferences.register_category(category)
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().preferences.is_dirty()
    }

    pub fn revision(&self) -> i64 {
        self.inner.remote.revision()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.remote.in_flight().current()
    }

    pub fn subscribe_in_flight(&self) -> watch::Receiver<usize> {
        self.inner.remote.in_flight().subscribe()
    }

    // Internals

    fn emit(&self, event: SyncEvent) {
        if self.inner.events.send(event).is_err() {
            tracing::debug!("No event subscriber");
        }
    }

    fn report_success(&self) {
        if self.inner.offline.swap(false, Ordering::SeqCst) {
            tracing::info!("Connection to server restored");
            self.emit(SyncEvent::Connectivity { offline: false });
        }
    }

    /// Alert the user. Repeated `NoConnection` failures alert once per streak.
    fn report_failure(&self, error: &RemoteError) {
        if *error == RemoteError::NoConnection {
            if self.inner.offline.swap(true, Ordering::SeqCst) {
                tracing::debug!("Still offline, alert suppressed");
                return;
            }
            self.emit(SyncEvent::Connectivity { offline: true });
        }
        self.emit(SyncEvent::Alert { message: error.user_message() });
    }

    fn spawn_tracked<F>(&self, work: F) -> JoinHandle<SyncOutcome>
    where
        F: std::future::Future<Output = SyncOutcome> + Send + 'static,
    {
        let token = self.inner.shutdown.child_token();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => SyncOutcome::Cancelled,
                outcome = work => outcome,
            }
        })
    }

    fn dispatch(&self, id: TaskId, mutation: Mutation, dirty: bool) -> JoinHandle<SyncOutcome> {
        if dirty {
            self.supersede(id);
            tracing::debug!("Local state dirty, {} goes through reconciliation", mutation);
            return self.reconcile();
        }
        self.spawn_chain(id, mutation)
    }

    fn supersede(&self, id: TaskId) {
        if let Some((_, previous)) = self.inner.chains.lock().remove(&id) {
            tracing::debug!("Cancelling pending sync of {}", id);
            previous.cancel();
        }
    }

    /// Spawn the single-item chain for `id`, cancelling any older chain for
    /// the same id.
    fn spawn_chain(&self, id: TaskId, mutation: Mutation) -> JoinHandle<SyncOutcome> {
        let token = self.inner.shutdown.child_token();
        let generation = self.inner.next_chain.fetch_add(1, Ordering::Relaxed);

        if let Some((_, previous)) = self.inner.chains.lock().insert(id, (generation, token.clone()))
        {
            tracing::debug!("Superseding pending sync of {}", id);
            previous.cancel();
        }

        let engine = self.clone();
        self.inner.tracker.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => SyncOutcome::Cancelled,
                outcome = engine.run_mutation(mutation) => outcome,
            };

            let mut chains = engine.inner.chains.lock();
            if chains.get(&id).map(|(g, _)| *g) == Some(generation) {
                chains.remove(&id);
            }
            outcome
        })
    }

    async fn run_mutation(&self, mutation: Mutation) -> SyncOutcome {
        let guard = self.inner.remote.in_flight().begin();
        let remote = &*self.inner.remote;
        let retry = &self.inner.retry;
        let timer = &*self.inner.timer;

        let result = match &mutation {
            Mutation::Add(task) => with_retry(retry, timer, move || remote.add(task)).await,
            Mutation::Update(task) => with_retry(retry, timer, move || remote.update(task)).await,
            Mutation::Delete(id) => {
                let id = *id;
                with_retry(retry, timer, move || remote.delete(id)).await
            }
        };
        drop(guard);

        match result {
            Ok(_) => {
                tracing::debug!("Server confirmed {}", mutation);
                self.report_success();
                SyncOutcome::Confirmed
            }
            Err(e) => {
                tracing::warn!("Failed to {}: {}, marking local state dirty", mutation, e);
                self.inner.state.lock().preferences.set_dirty(true);
                self.report_failure(&e);

                match self.reconcile().await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!("Reconciliation task failed: {}", e);
                        SyncOutcome::Cancelled
                    }
                }
            }
        }
    }

    /// Plain load: the server list replaces the local set, categories kept.
    async fn load_now(&self) -> SyncOutcome {
        let _guard = self.inner.remote.in_flight().begin();

        match self.inner.remote.list().await {
            Ok(server) => {
                self.apply_authoritative(server);
                self.report_success();
                SyncOutcome::Confirmed
            }
            Err(e) => {
                tracing::error!("Failed to load tasks from server: {}", e);
                self.report_failure(&e);
                SyncOutcome::Failed(e)
            }
        }
    }

    async fn reconcile_now(&self) -> SyncOutcome {
        let _guard = self.inner.remote.in_flight().begin();
        let local = self.inner.state.lock().items.snapshot();

        match self.inner.remote.replace_all(&local).await {
            Ok(server) => {
                self.apply_authoritative(server);
                self.inner.state.lock().preferences.set_dirty(false);
                self.report_success();
                tracing::info!("Reconciliation complete, {} tasks", local.len());
                SyncOutcome::Reconciled
            }
            Err(e) => {
                tracing::error!("Reconciliation failed: {}", e);
                self.inner.state.lock().preferences.set_dirty(true);
                self.report_failure(&e);
                SyncOutcome::Failed(e)
            }
        }
    }

    /// Make persistence match the server list, keep local categories, then
    /// reload the item store.
    fn apply_authoritative(&self, server: Vec<Task>) {
        let mut state = self.inner.state.lock();

        let ids: Vec<TaskId> = server.iter().map(|t| t.id).collect();
        let removed = state.persistence.retain_ids(&ids);
        let count = server.len();
        for task in server {
            state.persistence.upsert_preserving_category(task);
        }

        let tasks = state.persistence.fetch_all();
        state.items.replace_all(tasks);
        tracing::debug!("Merged {} server tasks, removed {} local", count, removed);
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("remote", &self.inner.remote)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::credentials::StaticToken;
    use crate::remote::RemoteSettings;
    use crate::retry::InstantTimer;
    use crate::task::Importance;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine_for(server: &MockServer) -> (SyncEngine, mpsc::UnboundedReceiver<SyncEvent>) {
        let remote = RemoteClient::new(
            RemoteSettings {
                base_url: server.uri(),
                device_id: "test-device".to_string(),
                request_timeout: Duration::from_secs(5),
            },
            Arc::new(StaticToken::new("secret")),
        )
        .unwrap();

        SyncEngine::new(SyncEngineParts {
            persistence: Persistence::in_memory().unwrap(),
            preferences: Preferences::in_memory(),
            remote: Arc::new(remote),
            retry: RetryConfig::new(2, 1.5, 0.05, 4),
            timer: Arc::new(InstantTimer::new()),
            offset: FixedOffset::east_opt(0).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_add_confirmed_keeps_clean() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/list"))
            .respond_with(|req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ok", "element": body["element"], "revision": 1}))
            })
            .expect(1)
            .mount(&server)
            .await;

        let (engine, mut events) = engine_for(&server);
        let task = Task::new("New", Importance::Normal).unwrap();
        let outcome = engine.add_task(task.clone()).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Confirmed);
        assert!(!engine.is_dirty());
        assert_eq!(engine.revision(), 1);
        assert_eq!(engine.task(&task.id), Some(task));
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(events.try_recv().unwrap(), SyncEvent::StoreChanged);
    }

    #[tokio::test]
    async fn test_non_retryable_error_goes_dirty_then_reconciles() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/list"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "list": [], "revision": 3})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (engine, _events) = engine_for(&server);
        let outcome = engine.delete_task(TaskId::new()).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Reconciled);
        assert!(!engine.is_dirty());
        assert_eq!(engine.revision(), 3);
    }

    #[tokio::test]
    async fn test_toggle_unknown_id() {
        let server = MockServer::start().await;
        let (engine, _events) = engine_for(&server);
        assert!(engine.toggle_done(TaskId::new()).is_none());
    }

    #[tokio::test]
    async fn test_no_connection_alerts_once_per_streak() {
        let server = MockServer::start().await;
        let (engine, mut events) = engine_for(&server);

        engine.report_failure(&RemoteError::NoConnection);
        engine.report_failure(&RemoteError::NoConnection);
        engine.report_success();
        engine.report_failure(&RemoteError::NoConnection);

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        let alert = SyncEvent::Alert { message: "No internet connection".to_string() };
        assert_eq!(
            received,
            vec![
                SyncEvent::Connectivity { offline: true },
                alert.clone(),
                SyncEvent::Connectivity { offline: false },
                SyncEvent::Connectivity { offline: true },
                alert,
            ]
        );
    }
}
