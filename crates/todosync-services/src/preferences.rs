//! Local preferences: the persisted dirty flag and the category list.
//!
//! Both live in one small JSON file (`preferences.json`). Read failures fall
//! back to defaults and write failures are logged; neither reaches callers.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::document_store::write_json_atomic;
use crate::task::Category;

/// Categories seeded on first use.
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::uncategorized(),
        Category::new("Work", Some("#FB5E5E")),
        Category::new("Study", Some("#5F82FF")),
        Category::new("Hobby", Some("#8CE555")),
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PreferenceData {
    #[serde(default)]
    is_dirty: bool,
    #[serde(default)]
    categories: Option<Vec<Category>>,
}

/// Persisted local preferences.
#[derive(Debug)]
pub struct Preferences {
    path: Option<PathBuf>,
    data: PreferenceData,
}

impl Preferences {
    /// Load preferences from `path`. Missing or unreadable files yield the
    /// defaults (clean flag, default categories).
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::error!("Corrupt preferences file {:?}, using defaults: {}", path, e);
                PreferenceData::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PreferenceData::default(),
            Err(e) => {
                tracing::error!("Failed to read preferences {:?}, using defaults: {}", path, e);
                PreferenceData::default()
            }
        };

        let mut prefs = Self { path: Some(path), data };
        prefs.seed_categories();
        prefs
    }

    /// Preferences that are never written to disk.
    pub fn in_memory() -> Self {
        let mut prefs = Self { path: None, data: PreferenceData::default() };
        prefs.seed_categories();
        prefs
    }

    fn seed_categories(&mut self) {
        if self.data.categories.is_none() {
            self.data.categories = Some(default_categories());
            self.save();
        }
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::error!("Failed to create preferences directory {:?}: {}", parent, e);
                return;
            }
        }
        if let Err(e) = write_json_atomic(path, &self.data) {
            tracing::error!("Failed to save preferences: {:#}", e);
        }
    }

    /// Whether local state may diverge from the server.
    pub fn is_dirty(&self) -> bool {
        self.data.is_dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        if self.data.is_dirty != dirty {
            tracing::debug!("Dirty flag -> {}", dirty);
            self.data.is_dirty = dirty;
            self.save();
        }
    }

    pub fn categories(&self) -> Vec<Category> {
        self.data.categories.clone().unwrap_or_default()
    }

    /// Append a category unless one with the same name exists.
    /// Returns `true` if the list changed.
    pub fn register_category(&mut self, category: &Category) -> bool {
        let categories = self.data.categories.get_or_insert_with(default_categories);
        if categories.iter().any(|c| c.name == category.name) {
            return false;
        }

        categories.push(category.clone());
        self.save();
        true
    }
}
