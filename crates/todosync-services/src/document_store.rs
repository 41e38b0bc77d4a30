//! JSON document task storage.
//!
//! `DocumentTaskStore` keeps every task in a single JSON array file. The file
//! is rewritten in full on each change, through a temporary file and a rename.
//! A document that fails to parse is moved to `<name>.corrupt` and the store
//! starts empty.

use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::task::{Task, TaskId};
use crate::task_backend::{StorageError, StorageResult, TaskBackend};

/// File-backed task storage holding one JSON document.
pub struct DocumentTaskStore {
    path: PathBuf,
    tasks: Vec<Task>,
}

impl DocumentTaskStore {
    /// Open the document at `path`, creating parent directories as needed.
    /// A missing file is an empty store.
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create task document directory")?;
        }

        let tasks = if path.exists() {
            let json = fs::read_to_string(&path).context("Failed to read task document")?;
            match serde_json::from_str(&json) {
                Ok(tasks) => tasks,
                Err(e) => {
                    tracing::error!("Corrupt task document {:?}, starting empty: {}", path, e);
                    set_aside(&path)?;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        tracing::debug!("Opened task document {:?} ({} tasks)", path, tasks.len());
        Ok(Self { path, tasks })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == *id)
    }

    fn persist(&self) -> StorageResult<()> {
        write_json_atomic(&self.path, &self.tasks)
            .map_err(|e| StorageError::storage(format!("{:#}", e)))
    }
}

/// Path a corrupt document is moved to.
pub fn corrupt_path(path: &Path) -> PathBuf {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    PathBuf::from(aside)
}

fn set_aside(path: &Path) -> anyhow::Result<()> {
    let aside = corrupt_path(path);
    fs::rename(path, &aside)
        .with_context(|| format!("Failed to move corrupt task document to {:?}", aside))?;
    tracing::warn!("Kept corrupt task document as {:?}", aside);
    Ok(())
}

/// Serialize `value` to `path` by writing a sibling temporary file and
/// renaming it over the target.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize document")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

impl TaskBackend for DocumentTaskStore {
    fn insert(&mut self, task: &Task) -> StorageResult<()> {
        if self.position(&task.id).is_some() {
            return Err(StorageError::duplicate(task.id));
        }

        self.tasks.push(task.clone());
        if let Err(e) = self.persist() {
            self.tasks.pop();
            return Err(e);
        }

        tracing::debug!("Inserted task: {}", task.id);
        Ok(())
    }

    fn update(&mut self, task: &Task) -> StorageResult<()> {
        let index = self.position(&task.id).ok_or_else(|| StorageError::not_found(task.id))?;

        let previous = std::mem::replace(&mut self.tasks[index], task.clone());
        if let Err(e) = self.persist() {
            self.tasks[index] = previous;
            return Err(e);
        }

        tracing::debug!("Updated task: {}", task.id);
        Ok(())
    }

    fn delete(&mut self, id: &TaskId) -> StorageResult<()> {
        let index = self.position(id).ok_or_else(|| StorageError::not_found(id))?;

        let removed = self.tasks.remove(index);
        if let Err(e) = self.persist() {
            self.tasks.insert(index, removed);
            return Err(e);
        }

        tracing::debug!("Deleted task: {}", id);
        Ok(())
    }

    fn get(&self, id: &TaskId) -> StorageResult<Option<Task>> {
        Ok(self.tasks.iter().find(|t| t.id == *id).cloned())
    }

    fn fetch_all(&self) -> StorageResult<Vec<Task>> {
        let mut tasks = self.tasks.clone();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}
