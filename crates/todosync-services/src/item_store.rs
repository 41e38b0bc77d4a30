//! In-memory task snapshot with deadline grouping.

use std::collections::{BTreeSet, HashMap};

use chrono::{FixedOffset, NaiveDate};
use tokio::sync::mpsc::UnboundedSender;

use crate::events::SyncEvent;
use crate::task::{Task, TaskId};

/// A group of tasks sharing a deadline day, or the tasks with no deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Day(NaiveDate),
    NoDeadline,
}

/// Current task snapshot keyed by id.
#[derive(Debug)]
pub struct ItemStore {
    items: HashMap<TaskId, Task>,
    offset: FixedOffset,
    events: Option<UnboundedSender<SyncEvent>>,
}

impl ItemStore {
    /// Create an empty store grouping deadlines in `offset`.
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            items: HashMap::new(),
            offset,
            events: None,
        }
    }

    /// Publish `StoreChanged` on `events` after every mutation.
    pub fn with_events(mut self, events: UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn notify(&self) {
        if let Some(events) = &self.events {
            // Receiver gone means nobody is listening; nothing to do.
            let _ = events.send(SyncEvent::StoreChanged);
        }
    }

    /// Insert or replace a task by id.
    pub fn upsert(&mut self, task: Task) {
        self.items.insert(task.id, task);
        self.notify();
    }

    /// Remove a task, returning its previous value.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        let removed = self.items.remove(id);
        self.notify();
        removed
    }

    /// Replace the whole snapshot.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.items = tasks.into_iter().map(|t| (t.id, t)).collect();
        self.notify();
    }

    pub fn all(&self) -> &HashMap<TaskId, Task> {
        &self.items
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn done_count(&self) -> usize {
        self.items.values().filter(|t| t.done).count()
    }

    /// Every task, ordered by creation time.
    pub fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.items.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    fn day_of(&self, task: &Task) -> Option<NaiveDate> {
        task.deadline.map(|d| d.with_timezone(&self.offset).date_naive())
    }

    /// Distinct deadline days, ascending.
    pub fn sections_by_deadline(&self) -> Vec<NaiveDate> {
        self.items
            .values()
            .filter_map(|t| self.day_of(t))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Map a section index to its bucket. `sections.len()` is the
    /// "no deadline" bucket; anything past it is `None`.
    pub fn section_at(&self, index: usize) -> Option<Bucket> {
        let sections = self.sections_by_deadline();
        match index.cmp(&sections.len()) {
            std::cmp::Ordering::Less => Some(Bucket::Day(sections[index])),
            std::cmp::Ordering::Equal => Some(Bucket::NoDeadline),
            std::cmp::Ordering::Greater => None,
        }
    }

    /// Tasks in `bucket`, ordered by creation time.
    pub fn items_in(&self, bucket: Bucket) -> Vec<Task> {
        let wanted = match bucket {
            Bucket::Day(day) => Some(day),
            Bucket::NoDeadline => None,
        };
        self.snapshot().into_iter().filter(|t| self.day_of(t) == wanted).collect()
    }
}
