//! Document store: a directory tree presented as cabinets, shelves, binders
//! and folders, with tags and favorites kept beside it.

pub mod classify;
pub mod codec;
pub mod config;
pub mod metadata;
pub mod mime;
pub mod mutations;
pub mod resolve;
pub mod tags;
pub mod tree;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::protocol::{FileContent, HealthReport, StoreError};

use config::StoreConfig;
use metadata::MetadataStore;
use mutations::Mutations;
use resolve::PathResolver;
use tags::TagOperations;
use tree::TreeOperations;

pub struct DocumentStore {
    config: Arc<StoreConfig>,
    resolver: Arc<PathResolver>,
    tree: TreeOperations,
    mutations: Mutations,
    tags: TagOperations,
}

impl DocumentStore {
    pub fn new(config: StoreConfig) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(PathResolver::new(config.clone()));
        let metadata = Arc::new(MetadataStore::new(config.metadata_path()));
        let tree = TreeOperations::new(config.clone(), resolver.clone(), metadata.clone());
        let mutations = Mutations::new(
            config.clone(),
            resolver.clone(),
            metadata.clone(),
            tree.clone(),
        );
        let tags = TagOperations::new(
            config.clone(),
            resolver.clone(),
            metadata.clone(),
            tree.clone(),
        );
        Self {
            config,
            resolver,
            tree,
            mutations,
            tags,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        self.config.as_ref()
    }

    pub fn tree(&self) -> &TreeOperations {
        &self.tree
    }

    pub fn mutations(&self) -> &Mutations {
        &self.mutations
    }

    pub fn tags(&self) -> &TagOperations {
        &self.tags
    }

    /// Fails with `Unavailable` when the root is missing or not a directory.
    pub fn health(&self) -> Result<HealthReport, StoreError> {
        let root = self.config.root.display().to_string();
        if !self.config.root.is_dir() {
            return Err(StoreError::Unavailable {
                message: format!("store root {} is missing", root),
            });
        }
        Ok(HealthReport {
            status: "ok".to_string(),
            root,
            root_exists: true,
        })
    }

    /// Full content of a document, base64-encoded. Downloads report the
    /// extension-derived MIME type, previews sniff the content.
    pub async fn read_document(&self, id: &str, inline: bool) -> Result<FileContent, StoreError> {
        let item = self.resolver.resolve_existing(id)?;
        if item.is_dir {
            return Err(StoreError::NotAFile {
                path: codec::to_protocol_path(&item.relative),
            });
        }

        let size = tokio::fs::metadata(&item.absolute)
            .await
            .map_err(|e| io_error(&item.relative, e))?
            .len();
        if size > self.config.max_read_size {
            return Err(StoreError::FileTooLarge {
                path: codec::to_protocol_path(&item.relative),
                size,
                max_size: self.config.max_read_size,
            });
        }

        let bytes = tokio::fs::read(&item.absolute)
            .await
            .map_err(|e| io_error(&item.relative, e))?;
        let name = item.name();
        let mime_type = if inline {
            mime::detect_mime_type(&bytes, &name)
        } else {
            mime::guess_mime_from_extension(&name)
        };

        Ok(FileContent {
            id: item.id,
            name,
            mime_type,
            size: bytes.len() as u64,
            disposition: if inline { "inline" } else { "attachment" }.to_string(),
            checksum: format!("{:x}", md5::compute(&bytes)),
            content_base64: BASE64.encode(&bytes),
        })
    }
}

/// Map an I/O failure on `relative` into the store's error classes.
pub(crate) fn io_error(relative: &Path, e: std::io::Error) -> StoreError {
    let path = codec::to_protocol_path(relative);
    match e.kind() {
        std::io::ErrorKind::NotFound => StoreError::NotFound { path },
        std::io::ErrorKind::AlreadyExists => StoreError::AlreadyExists { path },
        _ => StoreError::IoError {
            message: format!("{}: {}", path, e),
        },
    }
}

/// Run a directory walk off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::IoError {
            message: format!("walk task failed: {}", e),
        })?
}
