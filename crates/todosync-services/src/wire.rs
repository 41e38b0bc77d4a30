//! JSON wire format of the remote task list API.
//!
//! Elements are decoded in two steps: serde maps the JSON onto `Element`, then
//! `Element::into_task` checks the values a `Task` requires. List responses
//! keep the raw JSON per element so one bad element doesn't sink the rest.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::task::{Category, Importance, Task, TaskId};

/// Why a wire element could not become a task.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed element: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("empty text")]
    EmptyText,

    #[error("unknown importance: {0}")]
    UnknownImportance(String),

    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}

/// A task as sent to and received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub text: String,
    /// `None` means "basic" (normal importance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<i64>,
    #[serde(default)]
    pub last_updated_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

impl Element {
    /// Encode a task. `changed_at` falls back to `created_at` for tasks that
    /// were never modified.
    pub fn from_task(task: &Task, device_id: &str) -> Self {
        let importance = match task.importance {
            Importance::Normal => None,
            other => Some(other.as_wire().to_string()),
        };

        Self {
            id: task.id.to_string(),
            text: task.text.clone(),
            importance,
            deadline: task.deadline.map(|d| d.timestamp()),
            done: task.done,
            color: task.color.clone(),
            created_at: task.created_at.timestamp(),
            changed_at: Some(task.changed_at.unwrap_or(task.created_at).timestamp()),
            last_updated_by: device_id.to_string(),
            files: None,
        }
    }

    /// Validate and convert into a task with the default category.
    pub fn into_task(self) -> Result<Task, DecodeError> {
        let id: TaskId = self.id.parse().map_err(|_| DecodeError::InvalidId(self.id.clone()))?;

        if self.text.trim().is_empty() {
            return Err(DecodeError::EmptyText);
        }

        let importance = match self.importance.as_deref() {
            None => Importance::Normal,
            Some(name) => Importance::from_wire(name)
                .ok_or_else(|| DecodeError::UnknownImportance(name.to_string()))?,
        };

        Ok(Task {
            id,
            text: self.text,
            importance,
            deadline: self.deadline.map(from_epoch).transpose()?,
            done: self.done,
            created_at: from_epoch(self.created_at)?,
            changed_at: self.changed_at.map(from_epoch).transpose()?,
            color: self.color,
            category: Category::default(),
        })
    }
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>, DecodeError> {
    Utc.timestamp_opt(secs, 0).single().ok_or(DecodeError::InvalidTimestamp(secs))
}

/// Decode one raw JSON element into a task.
pub fn decode_element(value: Value) -> Result<Task, DecodeError> {
    serde_json::from_value::<Element>(value)?.into_task()
}

/// Body of `GET /list`, `PATCH /list`.
#[derive(Debug, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub status: Option<String>,
    pub list: Vec<Value>,
    #[serde(default)]
    pub revision: Option<i64>,
}

impl ListResponse {
    /// Decode every element, dropping (and logging) the invalid ones.
    pub fn into_tasks(self) -> Vec<Task> {
        self.list
            .into_iter()
            .filter_map(|value| match decode_element(value) {
                Ok(task) => Some(task),
                Err(e) => {
                    tracing::warn!("Dropping invalid element from list response: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// Body of the single-element endpoints.
#[derive(Debug, Deserialize)]
pub struct ItemResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub element: Value,
    #[serde(default)]
    pub revision: Option<i64>,
}

impl ItemResponse {
    /// Decode the element; an invalid element yields `None`.
    pub fn into_task(self) -> Option<Task> {
        match decode_element(self.element) {
            Ok(task) => Some(task),
            Err(e) => {
                tracing::warn!("Ignoring invalid element in response: {}", e);
                None
            }
        }
    }
}

/// Request body of `PATCH /list`.
#[derive(Debug, Serialize)]
pub struct ListRequest {
    pub list: Vec<Element>,
}

/// Request body of `POST /list` and `PUT /list/{id}`.
#[derive(Debug, Serialize)]
pub struct ItemRequest {
    pub element: Element,
}
