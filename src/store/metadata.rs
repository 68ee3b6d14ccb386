//! Side metadata (tags, favorites) keyed by identifier.
//!
//! The whole document is read on every access and rewritten on every
//! mutation. Writers go through [`MetadataStore::transaction`], which holds a
//! lock for the full load-modify-save sequence.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};

use crate::protocol::{StoreError, TagInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    pub color: String,
}

/// Persisted aggregate. Absent fields read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataDocument {
    pub tags: BTreeMap<String, TagDefinition>,
    pub item_tags: BTreeMap<String, Vec<String>>,
    pub favorites: Vec<String>,
}

impl MetadataDocument {
    pub fn tags_of(&self, id: &str) -> Vec<String> {
        self.item_tags.get(id).cloned().unwrap_or_default()
    }

    /// Replace the tag set of `id`. Names need not have a definition.
    pub fn set_tags(&mut self, id: &str, tags: Vec<String>) {
        let mut unique: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !unique.contains(&tag) {
                unique.push(tag);
            }
        }
        self.item_tags.insert(id.to_string(), unique);
    }

    /// Make sure a definition exists for `name`; returns true if one was added.
    pub fn ensure_tag(&mut self, name: &str, color: &str) -> bool {
        if self.tags.contains_key(name) {
            return false;
        }
        self.tags.insert(
            name.to_string(),
            TagDefinition {
                color: color.to_string(),
            },
        );
        true
    }

    /// Attach `tag` to `id`; returns true if it was not attached yet.
    pub fn attach_tag(&mut self, id: &str, tag: &str) -> bool {
        let tags = self.item_tags.entry(id.to_string()).or_default();
        if tags.iter().any(|t| t == tag) {
            return false;
        }
        tags.push(tag.to_string());
        true
    }

    pub fn detach_tag(&mut self, id: &str, tag: &str) -> bool {
        match self.item_tags.get_mut(id) {
            Some(tags) => {
                let before = tags.len();
                tags.retain(|t| t != tag);
                tags.len() != before
            }
            None => false,
        }
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorites.iter().any(|f| f == id)
    }

    pub fn add_favorite(&mut self, id: &str) -> bool {
        if self.is_favorite(id) {
            return false;
        }
        self.favorites.push(id.to_string());
        true
    }

    pub fn remove_favorite(&mut self, id: &str) -> bool {
        let before = self.favorites.len();
        self.favorites.retain(|f| f != id);
        self.favorites.len() != before
    }

    /// Move the tag set and favorite membership of `old_id` to `new_id`.
    ///
    /// The favorite keeps its position in the ordered favorites list.
    pub fn rekey(&mut self, old_id: &str, new_id: &str) -> bool {
        let mut changed = false;
        if let Some(tags) = self.item_tags.remove(old_id) {
            self.item_tags.insert(new_id.to_string(), tags);
            changed = true;
        }
        if self.is_favorite(old_id) {
            if self.is_favorite(new_id) {
                self.remove_favorite(old_id);
            } else if let Some(slot) = self.favorites.iter_mut().find(|f| f.as_str() == old_id) {
                *slot = new_id.to_string();
            }
            changed = true;
        }
        changed
    }

    /// Drop every entry for `id`.
    pub fn forget(&mut self, id: &str) -> bool {
        let had_tags = self.item_tags.remove(id).is_some();
        let was_favorite = self.remove_favorite(id);
        had_tags || was_favorite
    }

    /// Drop every entry whose identifier satisfies `doomed`.
    pub fn forget_where(&mut self, doomed: impl Fn(&str) -> bool) -> bool {
        let tags_before = self.item_tags.len();
        let favorites_before = self.favorites.len();
        self.item_tags.retain(|id, _| !doomed(id));
        self.favorites.retain(|id| !doomed(id));
        self.item_tags.len() != tags_before || self.favorites.len() != favorites_before
    }

    pub fn create_tag(&mut self, name: &str, color: &str) -> Result<TagInfo, StoreError> {
        if self.tags.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                path: format!("tag:{name}"),
            });
        }
        self.ensure_tag(name, color);
        Ok(TagInfo {
            name: name.to_string(),
            color: color.to_string(),
            count: self.tag_count(name),
        })
    }

    /// Remove a definition and strip it from every item.
    pub fn delete_tag(&mut self, name: &str) -> Result<(), StoreError> {
        if self.tags.remove(name).is_none() {
            return Err(StoreError::NotFound {
                path: format!("tag:{name}"),
            });
        }
        for tags in self.item_tags.values_mut() {
            tags.retain(|t| t != name);
        }
        Ok(())
    }

    fn tag_count(&self, name: &str) -> usize {
        self.item_tags
            .values()
            .filter(|tags| tags.iter().any(|t| t == name))
            .count()
    }

    /// Tag catalog with usage counts, sorted by name ignoring case.
    pub fn tag_catalog(&self) -> Vec<TagInfo> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for tags in self.item_tags.values() {
            for tag in tags {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        let mut catalog: Vec<TagInfo> = self
            .tags
            .iter()
            .map(|(name, def)| TagInfo {
                name: name.clone(),
                color: def.color.clone(),
                count: counts.get(name.as_str()).copied().unwrap_or(0),
            })
            .collect();
        catalog.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });
        catalog
    }

    pub fn items_with_tag(&self, tag: &str) -> Vec<String> {
        self.item_tags
            .iter()
            .filter(|(_, tags)| tags.iter().any(|t| t == tag))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Owner of the persisted metadata document.
pub struct MetadataStore {
    path: PathBuf,
    last_good: std::sync::Mutex<MetadataDocument>,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_good: std::sync::Mutex::new(MetadataDocument::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Read the persisted document.
    ///
    /// Never fails: a missing file reads as empty, and an unreadable or
    /// corrupt one falls back to the last document successfully read or
    /// written.
    pub async fn load(&self) -> MetadataDocument {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return MetadataDocument::default();
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read metadata {}: {}; using last known good state",
                    self.path.display(),
                    e
                );
                return self.last_good();
            }
        };

        match serde_json::from_slice::<MetadataDocument>(&data) {
            Ok(doc) => {
                self.remember(&doc);
                doc
            }
            Err(e) => {
                tracing::warn!(
                    "Corrupt metadata {}: {}; using last known good state",
                    self.path.display(),
                    e
                );
                self.last_good()
            }
        }
    }

    /// Persist the full document. Written to a sibling temp file first and
    /// renamed over the target, so readers see either the old or the new
    /// document.
    pub async fn save(&self, doc: &MetadataDocument) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(doc).map_err(|e| StoreError::IoError {
            message: e.to_string(),
        })?;
        let temp_path = sibling_with_suffix(&self.path, &format!("tmp-{}", uuid::Uuid::new_v4()));

        if let Err(e) = fs::write(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::IoError {
                message: format!("Failed to write metadata: {}", e),
            });
        }
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::IoError {
                message: format!("Failed to replace metadata: {}", e),
            });
        }

        self.remember(doc);
        Ok(())
    }

    /// Lock the document for a load-modify-save sequence. Dropping the
    /// transaction without [`MetadataTxn::commit`] discards the changes.
    pub async fn transaction(&self) -> MetadataTxn<'_> {
        let guard = self.write_lock.lock().await;
        let doc = self.load().await;
        MetadataTxn {
            store: self,
            _guard: guard,
            doc,
        }
    }

    pub async fn tags_of(&self, id: &str) -> Vec<String> {
        self.load().await.tags_of(id)
    }

    pub async fn set_tags(&self, id: &str, tags: Vec<String>) -> Result<Vec<String>, StoreError> {
        let mut txn = self.transaction().await;
        txn.doc.set_tags(id, tags);
        let tags = txn.doc.tags_of(id);
        txn.commit().await?;
        Ok(tags)
    }

    pub async fn is_favorite(&self, id: &str) -> bool {
        self.load().await.is_favorite(id)
    }

    /// Keep only the favorites `resolves` accepts, persisting the pruned list
    /// when anything was dropped. Returns the surviving identifiers in order.
    pub async fn retain_favorites(
        &self,
        resolves: impl Fn(&str) -> bool,
    ) -> Result<Vec<String>, StoreError> {
        let mut txn = self.transaction().await;
        let before = txn.doc.favorites.len();
        txn.doc.favorites.retain(|id| resolves(id));
        let kept = txn.doc.favorites.clone();
        if kept.len() != before {
            tracing::info!("Pruned {} stale favorite(s)", before - kept.len());
            txn.commit().await?;
        }
        Ok(kept)
    }

    fn last_good(&self) -> MetadataDocument {
        self.last_good
            .lock()
            .map(|doc| doc.clone())
            .unwrap_or_default()
    }

    fn remember(&self, doc: &MetadataDocument) {
        if let Ok(mut last) = self.last_good.lock() {
            *last = doc.clone();
        }
    }
}

/// Exclusive view of the metadata document.
pub struct MetadataTxn<'a> {
    store: &'a MetadataStore,
    _guard: MutexGuard<'a, ()>,
    pub doc: MetadataDocument,
}

impl MetadataTxn<'_> {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.store.save(&self.doc).await
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("metadata"));
    file_name.push(".");
    file_name.push(suffix);
    path.with_file_name(file_name)
}
