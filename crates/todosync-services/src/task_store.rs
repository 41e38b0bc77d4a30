//! SQLite-based task storage implementation.
//!
//! This module provides `SqliteTaskStore`, a local SQLite implementation of
//! the `TaskBackend` trait. Categories are stored denormalized on each row.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::task::{Category, Importance, Task, TaskId};
use crate::task_backend::{StorageError, StorageResult, TaskBackend};

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

const SELECT_COLUMNS: &str = "SELECT id, text, importance, deadline, is_done, created_at, changed_at, color, category_name, category_color FROM tasks";

/// SQLite-based task storage.
pub struct SqliteTaskStore {
    conn: Connection,
}

impl SqliteTaskStore {
    /// Open (or create) a task store at the given path.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory task store (for testing).
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        self.conn
            .execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)", [])?;

        let version: i32 = self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            anyhow::bail!(
                "Task database schema version {} is newer than supported version {}",
                version,
                SCHEMA_VERSION
            );
        }

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                importance INTEGER NOT NULL DEFAULT 1,
                deadline TEXT NULL,
                is_done INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                changed_at TEXT NULL,
                color TEXT NULL,
                category_name TEXT NOT NULL,
                category_color TEXT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);
            "#,
        )?;

        if version < SCHEMA_VERSION {
            self.conn.execute("DELETE FROM schema_version", [])?;
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    /// Convert a database row to a Task.
    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let id_str: String = row.get(0)?;
        let text: String = row.get(1)?;
        let importance_rank: i64 = row.get(2)?;
        let deadline_str: Option<String> = row.get(3)?;
        let is_done: i32 = row.get(4)?;
        let created_at_str: String = row.get(5)?;
        let changed_at_str: Option<String> = row.get(6)?;
        let color: Option<String> = row.get(7)?;
        let category_name: String = row.get(8)?;
        let category_color: Option<String> = row.get(9)?;

        let id: TaskId = id_str
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
        let importance = Importance::from_rank(importance_rank)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, importance_rank))?;

        Ok(Task {
            id,
            text,
            importance,
            deadline: deadline_str.map(|s| parse_timestamp(3, &s)).transpose()?,
            done: is_done != 0,
            created_at: parse_timestamp(5, &created_at_str)?,
            changed_at: changed_at_str.map(|s| parse_timestamp(6, &s)).transpose()?,
            color,
            category: Category {
                name: category_name,
                color: category_color,
            },
        })
    }

    /// Check if a task exists by id.
    pub fn exists(&self, id: &TaskId) -> anyhow::Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get the task count.
    pub fn count(&self) -> anyhow::Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

impl TaskBackend for SqliteTaskStore {
    fn insert(&mut self, task: &Task) -> StorageResult<()> {
        if self.exists(&task.id).map_err(|e| StorageError::storage(e.to_string()))? {
            return Err(StorageError::duplicate(task.id));
        }

        self.conn
            .execute(
                r#"
                INSERT INTO tasks (id, text, importance, deadline, is_done, created_at, changed_at, color, category_name, category_color)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    task.id.to_string(),
                    task.text,
                    task.importance.rank(),
                    task.deadline.map(|dt| dt.to_rfc3339()),
                    task.done as i32,
                    task.created_at.to_rfc3339(),
                    task.changed_at.map(|dt| dt.to_rfc3339()),
                    task.color,
                    task.category.name,
                    task.category.color,
                ],
            )
            .map_err(|e| StorageError::storage(e.to_string()))?;

        tracing::debug!("Inserted task: {}", task.id);
        Ok(())
    }

    fn update(&mut self, task: &Task) -> StorageResult<()> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE tasks
                SET text = ?1, importance = ?2, deadline = ?3, is_done = ?4, created_at = ?5, changed_at = ?6, color = ?7, category_name = ?8, category_color = ?9
                WHERE id = ?10
                "#,
                params![
                    task.text,
                    task.importance.rank(),
                    task.deadline.map(|dt| dt.to_rfc3339()),
                    task.done as i32,
                    task.created_at.to_rfc3339(),
                    task.changed_at.map(|dt| dt.to_rfc3339()),
                    task.color,
                    task.category.name,
                    task.category.color,
                    task.id.to_string(),
                ],
            )
            .map_err(|e| StorageError::storage(e.to_string()))?;

        if changed == 0 {
            return Err(StorageError::not_found(task.id));
        }

        tracing::debug!("Updated task: {}", task.id);
        Ok(())
    }

    fn delete(&mut self, id: &TaskId) -> StorageResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
            .map_err(|e| StorageError::storage(e.to_string()))?;

        if changed == 0 {
            return Err(StorageError::not_found(id));
        }

        tracing::debug!("Deleted task: {}", id);
        Ok(())
    }

    fn get(&self, id: &TaskId) -> StorageResult<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .map_err(|e| StorageError::storage(e.to_string()))?;

        stmt.query_row(params![id.to_string()], Self::row_to_task)
            .optional()
            .map_err(|e| StorageError::storage(e.to_string()))
    }

    fn fetch_all(&self) -> StorageResult<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY created_at ASC", SELECT_COLUMNS))
            .map_err(|e| StorageError::storage(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_task)
            .map_err(|e| StorageError::storage(e.to_string()))?;

        let mut tasks =
            rows.collect::<Result<Vec<_>, _>>().map_err(|e| StorageError::storage(e.to_string()))?;
        // RFC 3339 text with differing offsets does not sort lexically.
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}
