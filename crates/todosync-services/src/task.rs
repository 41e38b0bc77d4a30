//! Task types shared by the item store, the persistence backends and the
//! remote codec.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of the category every task falls back to.
pub const UNCATEGORIZED: &str = "No category";

/// Errors raised while building or editing a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Validation error (e.g., empty text).
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Stable identifier of a task. Never changes for the lifetime of the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Task importance, ordered `Low < Normal < High`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

impl Importance {
    /// Name used by the remote API.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Normal => "basic",
            Importance::High => "important",
        }
    }

    /// Parse the remote API name. Unknown names yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Importance::Low),
            "basic" => Some(Importance::Normal),
            "important" => Some(Importance::High),
            _ => None,
        }
    }

    /// Numeric rank used for storage and sorting.
    pub fn rank(&self) -> i64 {
        match self {
            Importance::Low => 0,
            Importance::Normal => 1,
            Importance::High => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Importance::Low),
            1 => Some(Importance::Normal),
            2 => Some(Importance::High),
            _ => None,
        }
    }
}

/// A client-only grouping. Tasks embed a copy of the category by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>, color: Option<&str>) -> Self {
        Self {
            name: name.into(),
            color: color.map(str::to_string),
        }
    }

    pub fn uncategorized() -> Self {
        Self::new(UNCATEGORIZED, None)
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::uncategorized()
    }
}

/// A single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub done: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub category: Category,
}

impl Task {
    /// Create a new, not yet done task.
    ///
    /// # Errors
    /// Returns `TaskError::Validation` if the text is empty.
    pub fn new(text: impl Into<String>, importance: Importance) -> Result<Self, TaskError> {
        let text = text.into();
        validate_text(&text)?;

        Ok(Self {
            id: TaskId::new(),
            text,
            importance,
            deadline: None,
            done: false,
            created_at: Utc::now(),
            changed_at: None,
            color: None,
            category: Category::default(),
        })
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Apply a partial edit. Keeps `id` and `created_at`, refreshes `changed_at`.
    ///
    /// # Errors
    /// Returns `TaskError::Validation` if the new text is empty.
    pub fn edited(&self, edit: TaskEdit) -> Result<Self, TaskError> {
        let mut task = self.clone();

        if let Some(text) = edit.text {
            validate_text(&text)?;
            task.text = text;
        }
        if let Some(importance) = edit.importance {
            task.importance = importance;
        }
        if let Some(deadline) = edit.deadline {
            task.deadline = deadline;
        }
        if let Some(color) = edit.color {
            task.color = color;
        }
        if let Some(category) = edit.category {
            task.category = category;
        }
        if let Some(done) = edit.done {
            task.done = done;
        }

        task.changed_at = Some(Utc::now());
        Ok(task)
    }

    /// Flip the completion flag.
    pub fn toggled_done(&self) -> Self {
        let mut task = self.clone();
        task.done = !task.done;
        task.changed_at = Some(Utc::now());
        task
    }

    /// Take a server copy of this task while keeping the locally-owned
    /// category. The server has no notion of categories.
    pub fn keep_local_category(mut self, local: Option<&Task>) -> Self {
        self.category = local.map(|t| t.category.clone()).unwrap_or_default();
        self
    }
}

/// Partial edit of a task; only `Some` fields are applied.
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub text: Option<String>,
    pub importance: Option<Importance>,
    pub deadline: Option<Option<DateTime<Utc>>>,
    pub color: Option<Option<String>>,
    pub category: Option<Category>,
    pub done: Option<bool>,
}

/// Validate task text.
///
/// # Errors
/// Returns `TaskError::Validation` if the text is empty or whitespace-only.
pub fn validate_text(text: &str) -> Result<(), TaskError> {
    if text.trim().is_empty() {
        return Err(TaskError::Validation("Text cannot be empty".to_string()));
    }
    Ok(())
}
