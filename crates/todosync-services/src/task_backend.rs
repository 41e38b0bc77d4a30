//! Task storage backend trait and error types.
//!
//! This module defines the `TaskBackend` trait that abstracts over the durable
//! task stores (SQLite table, JSON document file).

use std::cmp::Ordering;

use thiserror::Error;

use crate::task::{Task, TaskId};

/// Errors that can occur during task backend operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Task was not found.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// A task with the same id is already stored.
    #[error("Task already exists: {0}")]
    Duplicate(String),

    /// Storage error (database, file system, encoding).
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StorageError {
    /// Create a not found error.
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound(id.to_string())
    }

    /// Create a duplicate id error.
    pub fn duplicate(id: impl ToString) -> Self {
        Self::Duplicate(id.to_string())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// Result type for task backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Ordering applied by `TaskBackend::fetch_filtered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Creation time ascending.
    #[default]
    CreatedAsc,
    /// Importance descending, ties broken by creation time ascending.
    ImportanceDesc,
}

impl SortOrder {
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self {
            SortOrder::CreatedAsc => a.created_at.cmp(&b.created_at),
            SortOrder::ImportanceDesc => b
                .importance
                .cmp(&a.importance)
                .then_with(|| a.created_at.cmp(&b.created_at)),
        }
    }
}

/// Visibility filter applied by `TaskBackend::fetch_filtered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    ShowAll,
    HideCompleted,
}

impl Filter {
    pub fn accepts(&self, task: &Task) -> bool {
        match self {
            Filter::ShowAll => true,
            Filter::HideCompleted => !task.done,
        }
    }
}

/// Trait for durable task storage backends.
///
/// Implementations don't need to be Sync - `Persistence` keeps the backend
/// behind the engine's state lock.
pub trait TaskBackend: Send {
    /// Store a new task.
    ///
    /// # Errors
    /// Returns `StorageError::Duplicate` if the id is already stored.
    fn insert(&mut self, task: &Task) -> StorageResult<()>;

    /// Replace a stored task by id.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the task doesn't exist.
    fn update(&mut self, task: &Task) -> StorageResult<()>;

    /// Delete a task.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the task doesn't exist.
    fn delete(&mut self, id: &TaskId) -> StorageResult<()>;

    /// Get a task by id. Returns `None` if it doesn't exist.
    fn get(&self, id: &TaskId) -> StorageResult<Option<Task>>;

    /// All stored tasks, ordered by creation time ascending.
    fn fetch_all(&self) -> StorageResult<Vec<Task>>;

    /// Stored tasks passing `filter`, ordered by `sort`.
    ///
    /// Default implementation filters and sorts the result of `fetch_all`.
    fn fetch_filtered(&self, sort: SortOrder, filter: Filter) -> StorageResult<Vec<Task>> {
        let mut tasks: Vec<Task> =
            self.fetch_all()?.into_iter().filter(|t| filter.accepts(t)).collect();
        tasks.sort_by(|a, b| sort.compare(a, b));
        Ok(tasks)
    }
}
