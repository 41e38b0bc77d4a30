//! Durable task persistence with a degrading error policy.
//!
//! `Persistence` wraps one `TaskBackend` chosen at construction. Backend
//! errors are logged and swallowed here so callers only ever see empty
//! results or a `false` return.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::document_store::DocumentTaskStore;
use crate::task::{Task, TaskId};
use crate::task_backend::{Filter, SortOrder, StorageError, TaskBackend};
use crate::task_store::SqliteTaskStore;

/// Which durable store backs the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// `tasks.db` SQLite database (default).
    #[default]
    Sqlite,
    /// `tasks.json` JSON document.
    Document,
}

impl StorageBackend {
    /// File name used inside the data directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            StorageBackend::Sqlite => "tasks.db",
            StorageBackend::Document => "tasks.json",
        }
    }

    /// Open the backend inside `data_dir`.
    pub fn open(&self, data_dir: &Path) -> anyhow::Result<Persistence> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(self.file_name());
        tracing::info!("Opening {:?} task storage at {:?}", self, path);

        let backend: Box<dyn TaskBackend> = match self {
            StorageBackend::Sqlite => Box::new(SqliteTaskStore::new(&path)?),
            StorageBackend::Document => Box::new(DocumentTaskStore::new(&path)?),
        };
        Ok(Persistence::new(*self, backend))
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "document" => Ok(StorageBackend::Document),
            other => Err(format!("Unknown storage backend: {}", other)),
        }
    }
}

/// Sole writer to durable task storage.
pub struct Persistence {
    kind: StorageBackend,
    backend: Box<dyn TaskBackend>,
}

impl Persistence {
    pub fn new(kind: StorageBackend, backend: Box<dyn TaskBackend>) -> Self {
        Self { kind, backend }
    }

    /// In-memory SQLite persistence (for testing).
    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(StorageBackend::Sqlite, Box::new(SqliteTaskStore::in_memory()?)))
    }

    pub fn kind(&self) -> StorageBackend {
        self.kind
    }

    pub fn insert(&mut self, task: &Task) {
        if let Err(e) = self.backend.insert(task) {
            tracing::error!("Failed to insert task {}: {}", task.id, e);
        }
    }

    /// Replace a stored task. Returns `false` if the id is absent or the
    /// write failed.
    pub fn update(&mut self, task: &Task) -> bool {
        match self.backend.update(task) {
            Ok(()) => true,
            Err(StorageError::NotFound(_)) => {
                tracing::debug!("Task {} not stored, nothing to update", task.id);
                false
            }
            Err(e) => {
                tracing::error!("Failed to update task {}: {}", task.id, e);
                false
            }
        }
    }

    /// Replace the task if it is stored, insert it otherwise.
    pub fn upsert(&mut self, task: &Task) {
        if self.get(&task.id).is_some() {
            self.update(task);
        } else {
            self.insert(task);
        }
    }

    pub fn delete(&mut self, id: &TaskId) {
        match self.backend.delete(id) {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => tracing::debug!("Task {} not stored, nothing to delete", id),
            Err(e) => tracing::error!("Failed to delete task {}: {}", id, e),
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.backend.get(id).unwrap_or_else(|e| {
            tracing::error!("Failed to read task {}: {}", id, e);
            None
        })
    }

    pub fn fetch_all(&self) -> Vec<Task> {
        self.backend.fetch_all().unwrap_or_else(|e| {
            tracing::error!("Failed to read tasks: {}", e);
            Vec::new()
        })
    }

    pub fn fetch_filtered(&self, sort: SortOrder, filter: Filter) -> Vec<Task> {
        self.backend.fetch_filtered(sort, filter).unwrap_or_else(|e| {
            tracing::error!("Failed to read filtered tasks: {}", e);
            Vec::new()
        })
    }

    /// Store a server copy of a task. An existing local task keeps its
    /// category; an unknown id is inserted with the default category.
    pub fn upsert_preserving_category(&mut self, server: Task) {
        let local = self.get(&server.id);
        let task = server.keep_local_category(local.as_ref());
        self.upsert(&task);
    }

    /// Delete every stored task whose id is not in `keep`. Returns the number
    /// of tasks removed.
    pub fn retain_ids(&mut self, keep: &[TaskId]) -> usize {
        let stale: Vec<TaskId> =
            self.fetch_all().into_iter().map(|t| t.id).filter(|id| !keep.contains(id)).collect();
        for id in &stale {
            self.delete(id);
        }
        stale.len()
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence").field("kind", &self.kind).finish_non_exhaustive()
    }
}
