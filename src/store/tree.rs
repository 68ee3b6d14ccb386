use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::protocol::{ItemEntry, StoreError, StoreStats, TreeNode};

use super::classify::{classify, level_of, SemanticType};
use super::codec;
use super::config::StoreConfig;
use super::metadata::{MetadataDocument, MetadataStore};
use super::mime;
use super::resolve::PathResolver;
use super::{blocking, io_error};

/// Stats key for documents without an extension
pub const NO_EXTENSION: &str = "(none)";

struct Child {
    relative: PathBuf,
    name: String,
    is_dir: bool,
}

struct SearchHit {
    relative: PathBuf,
    sort_key: String,
    is_dir: bool,
}

/// Read-only views over the physical hierarchy
#[derive(Clone)]
pub struct TreeOperations {
    config: Arc<StoreConfig>,
    resolver: Arc<PathResolver>,
    metadata: Arc<MetadataStore>,
}

impl TreeOperations {
    pub fn new(
        config: Arc<StoreConfig>,
        resolver: Arc<PathResolver>,
        metadata: Arc<MetadataStore>,
    ) -> Self {
        Self {
            config,
            resolver,
            metadata,
        }
    }

    /// Top-level directories (cabinets), sorted by name ignoring case
    pub async fn list_root(&self) -> Result<Vec<ItemEntry>, StoreError> {
        self.ensure_root()?;
        let meta = self.metadata.load().await;
        let this = self.clone();
        blocking(move || {
            let mut children = this
                .visible_children(Path::new(""))
                .map_err(|e| io_error(Path::new(""), e))?;
            children.retain(|c| c.is_dir);
            children.sort_by_key(|c| c.name.to_lowercase());
            this.build_entries(children.iter().map(|c| c.relative.as_path()), &meta)
        })
        .await
    }

    /// Children of a directory: directories first, then files, each by name
    /// ignoring case.
    pub async fn list(&self, dir_id: &str) -> Result<Vec<ItemEntry>, StoreError> {
        let dir = self.resolver.resolve_existing(dir_id)?;
        if !dir.is_dir {
            return Err(StoreError::NotFound {
                path: codec::to_protocol_path(&dir.relative),
            });
        }
        let meta = self.metadata.load().await;
        let this = self.clone();
        blocking(move || {
            let mut children = this
                .visible_children(&dir.relative)
                .map_err(|e| io_error(&dir.relative, e))?;
            children.sort_by(|a, b| {
                a.is_dir
                    .cmp(&b.is_dir)
                    .reverse()
                    .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            });
            this.build_entries(children.iter().map(|c| c.relative.as_path()), &meta)
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<ItemEntry, StoreError> {
        let resolved = self.resolver.resolve_existing(id)?;
        self.entry_for(&resolved.relative).await
    }

    /// Entry for a relative path that is known to exist
    pub async fn entry_for(&self, relative: &Path) -> Result<ItemEntry, StoreError> {
        let meta = self.metadata.load().await;
        self.build_entry(relative, &meta)
    }

    /// Entries for many relative paths against a single metadata snapshot.
    /// Paths that vanished in the meantime are skipped.
    pub async fn entries_for(&self, relatives: Vec<PathBuf>) -> Result<Vec<ItemEntry>, StoreError> {
        let meta = self.metadata.load().await;
        let this = self.clone();
        blocking(move || this.build_entries(relatives.iter().map(|p| p.as_path()), &meta)).await
    }

    /// Directory skeleton, `max_depth` levels below the cabinets.
    pub async fn build_tree(&self, max_depth: Option<u32>) -> Result<Vec<TreeNode>, StoreError> {
        let max_depth = max_depth.unwrap_or(self.config.default_tree_depth);
        if max_depth == 0 || max_depth > self.config.max_tree_depth {
            return Err(StoreError::invalid_argument(format!(
                "max_depth must be between 1 and {}",
                self.config.max_tree_depth
            )));
        }
        self.ensure_root()?;

        let this = self.clone();
        blocking(move || Ok(this.tree_level(Path::new(""), 0, max_depth as usize))).await
    }

    /// Case-insensitive substring search on entry names over the whole tree.
    ///
    /// Filters only decide whether an entry is reported; directories are
    /// always descended into.
    pub async fn search(
        &self,
        query: &str,
        item_type: Option<&str>,
        extension: Option<&str>,
    ) -> Result<Vec<ItemEntry>, StoreError> {
        if query.trim().is_empty() {
            return Err(StoreError::invalid_argument("search query must not be empty"));
        }
        let query = query.to_lowercase();
        let type_filter = item_type
            .filter(|t| !t.trim().is_empty())
            .map(str::parse::<SemanticType>)
            .transpose()?;
        let extension_filter = extension
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty());
        self.ensure_root()?;

        let meta = self.metadata.load().await;
        let this = self.clone();
        blocking(move || {
            let mut hits = Vec::new();
            for entry in this.walk() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!("Skipping unreadable subtree during search: {}", e);
                        continue;
                    }
                };
                if entry.path_is_symlink() && !this.config.follow_symlinks {
                    continue;
                }

                let name = entry.file_name().to_string_lossy().to_string();
                if !name.to_lowercase().contains(&query) {
                    continue;
                }

                let is_dir = entry.file_type().is_dir();
                let item_type = classify(entry.depth().saturating_sub(1), !is_dir);
                if type_filter.is_some_and(|t| t != item_type) {
                    continue;
                }
                if let Some(ref wanted) = extension_filter {
                    if is_dir || extension_of(&name).as_deref() != Some(wanted.as_str()) {
                        continue;
                    }
                }

                let Ok(relative) = entry.path().strip_prefix(&this.config.root) else {
                    continue;
                };
                hits.push(SearchHit {
                    relative: relative.to_path_buf(),
                    sort_key: name.to_lowercase(),
                    is_dir,
                });
            }

            hits.sort_by(|a, b| {
                a.is_dir
                    .cmp(&b.is_dir)
                    .reverse()
                    .then_with(|| a.sort_key.cmp(&b.sort_key))
            });
            hits.truncate(this.config.max_search_results);

            this.build_entries(hits.iter().map(|h| h.relative.as_path()), &meta)
        })
        .await
    }

    /// Counts per semantic type, document total, byte total and extension
    /// histogram, in one walk.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.ensure_root()?;
        let this = self.clone();
        blocking(move || {
            let mut stats = StoreStats::default();
            for entry in this.walk() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!("Skipping unreadable subtree during stats: {}", e);
                        continue;
                    }
                };
                if entry.path_is_symlink() && !this.config.follow_symlinks {
                    continue;
                }

                if entry.file_type().is_dir() {
                    match classify(entry.depth().saturating_sub(1), false) {
                        SemanticType::Cabinet => stats.total_cabinets += 1,
                        SemanticType::Shelf => stats.total_shelves += 1,
                        SemanticType::Binder => stats.total_binders += 1,
                        SemanticType::Folder => stats.total_folders += 1,
                        _ => stats.total_sub_items += 1,
                    }
                    continue;
                }

                stats.total_documents += 1;
                stats.total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
                let name = entry.file_name().to_string_lossy();
                let ext = extension_of(&name).unwrap_or_else(|| NO_EXTENSION.to_string());
                *stats.extensions.entry(ext).or_default() += 1;
            }
            Ok(stats)
        })
        .await
    }

    pub fn build_entry(
        &self,
        relative: &Path,
        meta: &MetadataDocument,
    ) -> Result<ItemEntry, StoreError> {
        let absolute = self.config.root.join(relative);
        let metadata = std::fs::metadata(&absolute).map_err(|e| io_error(relative, e))?;
        let is_dir = metadata.is_dir();
        let id = codec::encode(relative);
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut entry = ItemEntry {
            item_type: classify(level_of(relative), !is_dir),
            path: codec::to_protocol_path(relative),
            created_at: metadata.created().ok().map(format_timestamp),
            modified_at: metadata.modified().ok().map(format_timestamp),
            size: None,
            extension: None,
            mime_type: None,
            tags: None,
            children_count: None,
            id,
            name,
        };

        if is_dir {
            entry.children_count = Some(self.visible_children(relative).map(|c| c.len()).unwrap_or(0));
        } else {
            entry.size = Some(metadata.len());
            entry.extension = Path::new(&entry.name)
                .extension()
                .map(|e| e.to_string_lossy().into_owned());
            entry.mime_type = Some(mime::guess_mime_from_extension(&entry.name));
            entry.tags = Some(meta.tags_of(&entry.id));
        }

        Ok(entry)
    }

    fn build_entries<'a>(
        &self,
        relatives: impl Iterator<Item = &'a Path>,
        meta: &MetadataDocument,
    ) -> Result<Vec<ItemEntry>, StoreError> {
        let mut entries = Vec::new();
        for relative in relatives {
            match self.build_entry(relative, meta) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!("Skipping {}: {}", relative.display(), e),
            }
        }
        Ok(entries)
    }

    fn tree_level(&self, relative: &Path, level: usize, max_depth: usize) -> Vec<TreeNode> {
        let mut dirs = match self.visible_children(relative) {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!("Skipping unreadable directory {}: {}", relative.display(), e);
                return Vec::new();
            }
        };
        dirs.retain(|c| c.is_dir);
        dirs.sort_by_key(|c| c.name.to_lowercase());

        dirs.into_iter()
            .map(|child| {
                let children = if level < max_depth {
                    self.tree_level(&child.relative, level + 1, max_depth)
                } else {
                    Vec::new()
                };
                TreeNode {
                    id: codec::encode(&child.relative),
                    item_type: classify(level, false),
                    path: codec::to_protocol_path(&child.relative),
                    name: child.name,
                    children,
                }
            })
            .collect()
    }

    fn visible_children(&self, relative: &Path) -> std::io::Result<Vec<Child>> {
        let dir = self.config.root.join(relative);
        let mut children = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::debug!("Skipping non-UTF-8 name {:?}", entry.file_name());
                continue;
            };
            if self.config.is_hidden(&name) {
                continue;
            }
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            let is_dir = if file_type.is_symlink() {
                if !self.config.follow_symlinks {
                    continue;
                }
                entry.path().is_dir()
            } else {
                file_type.is_dir()
            };
            children.push(Child {
                relative: relative.join(&name),
                name,
                is_dir,
            });
        }
        Ok(children)
    }

    fn walk(&self) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
        let config = self.config.clone();
        WalkDir::new(&self.config.root)
            .min_depth(1)
            .follow_links(self.config.follow_symlinks)
            .into_iter()
            .filter_entry(move |e| {
                e.depth() == 0
                    || e
                        .file_name()
                        .to_str()
                        .is_some_and(|name| !config.is_hidden(name))
            })
    }

    fn ensure_root(&self) -> Result<(), StoreError> {
        if !self.config.root.is_dir() {
            return Err(StoreError::Unavailable {
                message: format!("store root {} is missing", self.config.root.display()),
            });
        }
        Ok(())
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

fn format_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}
