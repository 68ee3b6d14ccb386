//! Structural changes to the hierarchy.
//!
//! Identifiers are path-derived, so every rename or move of a document
//! re-keys its metadata from the old identifier to the new one. The metadata
//! transaction is held across the physical operation and only committed once
//! that operation succeeded.
//!
//! Metadata orphaned under an identifier (for instance by renaming the
//! directory above it) is dropped whenever a new node takes that path, so a
//! created, uploaded or relocated node carries exactly its own metadata.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::protocol::{ItemEntry, StoreError};

use super::codec;
use super::config::StoreConfig;
use super::io_error;
use super::metadata::MetadataStore;
use super::resolve::{entry_exists, PathResolver, Resolved};
use super::tree::TreeOperations;

/// Upload name collisions tolerated before giving up
const MAX_NAME_ATTEMPTS: u32 = 10_000;

#[derive(Clone)]
pub struct Mutations {
    config: Arc<StoreConfig>,
    resolver: Arc<PathResolver>,
    metadata: Arc<MetadataStore>,
    tree: TreeOperations,
}

impl Mutations {
    pub fn new(
        config: Arc<StoreConfig>,
        resolver: Arc<PathResolver>,
        metadata: Arc<MetadataStore>,
        tree: TreeOperations,
    ) -> Self {
        Self {
            config,
            resolver,
            metadata,
            tree,
        }
    }

    /// Create a cabinet directly under the root
    pub async fn create_root(&self, name: &str) -> Result<ItemEntry, StoreError> {
        if !self.config.root.is_dir() {
            return Err(StoreError::Unavailable {
                message: format!("store root {} is missing", self.config.root.display()),
            });
        }
        self.create_dir(PathBuf::new(), name).await
    }

    /// Create a directory inside `parent_id`
    pub async fn create(&self, parent_id: &str, name: &str) -> Result<ItemEntry, StoreError> {
        let parent = self.resolver.resolve_dir(parent_id)?;
        self.create_dir(parent.relative, name).await
    }

    async fn create_dir(&self, parent: PathBuf, name: &str) -> Result<ItemEntry, StoreError> {
        self.validate_name(name)?;
        let relative = parent.join(name);
        let absolute = self.resolver.absolute(&relative);
        if entry_exists(&absolute) {
            return Err(StoreError::AlreadyExists {
                path: codec::to_protocol_path(&relative),
            });
        }

        fs::create_dir(&absolute)
            .await
            .map_err(|e| io_error(&relative, e))?;
        tracing::info!("Created directory {}", relative.display());
        self.forget_stale(&relative).await?;

        self.tree.entry_for(&relative).await
    }

    /// Rename in place, keeping the parent directory
    pub async fn rename(&self, id: &str, new_name: &str) -> Result<ItemEntry, StoreError> {
        let source = self.resolver.resolve_existing(id)?;
        self.validate_name(new_name)?;
        let target = source
            .relative
            .parent()
            .map(|p| p.join(new_name))
            .unwrap_or_else(|| PathBuf::from(new_name));

        if entry_exists(&self.resolver.absolute(&target)) {
            return Err(StoreError::AlreadyExists {
                path: codec::to_protocol_path(&target),
            });
        }

        self.relocate(&source, &target).await?;
        tracing::info!(
            "Renamed {} -> {}",
            source.relative.display(),
            target.display()
        );
        self.tree.entry_for(&target).await
    }

    /// Move into another directory, keeping the name
    pub async fn move_item(&self, id: &str, destination_id: &str) -> Result<ItemEntry, StoreError> {
        let source = self.resolver.resolve_existing(id)?;
        let destination = self.resolver.resolve_existing(destination_id)?;

        if !destination.is_dir {
            return Err(StoreError::invalid_argument(
                "destination must be a directory",
            ));
        }
        if destination.relative == source.relative {
            return Err(StoreError::invalid_argument(
                "cannot move an item into itself",
            ));
        }
        if destination
            .relative
            .ancestors()
            .any(|ancestor| ancestor == source.relative)
        {
            return Err(StoreError::invalid_argument(
                "cannot move a directory into one of its descendants",
            ));
        }

        let target = destination.relative.join(source.name());
        if entry_exists(&self.resolver.absolute(&target)) {
            return Err(StoreError::AlreadyExists {
                path: codec::to_protocol_path(&target),
            });
        }

        self.relocate(&source, &target).await?;
        tracing::info!(
            "Moved {} -> {}",
            source.relative.display(),
            target.display()
        );
        self.tree.entry_for(&target).await
    }

    /// Physically move `source` to `target` and carry a document's metadata
    /// over to the new identifier. Directories are moved without re-keying.
    /// Whatever was left under the target identifier is dropped either way.
    async fn relocate(&self, source: &Resolved, target: &Path) -> Result<(), StoreError> {
        let target_abs = self.resolver.absolute(target);
        let new_id = codec::encode(target);

        let mut txn = self.metadata.transaction().await;
        let mut changed = txn.doc.forget(&new_id);
        if !source.is_dir {
            changed |= txn.doc.rekey(&source.id, &new_id);
        }

        fs::rename(&source.absolute, &target_abs)
            .await
            .map_err(|e| io_error(&source.relative, e))?;

        if changed {
            if let Err(e) = txn.commit().await {
                tracing::error!(
                    "Moved {} but failed to re-key its metadata: {}",
                    source.relative.display(),
                    e
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Delete a node; directories are removed recursively. Metadata is
    /// dropped before the physical removal.
    pub async fn delete(&self, id: &str) -> Result<String, StoreError> {
        let target = self.resolver.resolve_existing(id)?;

        {
            let mut txn = self.metadata.transaction().await;
            let mut changed = txn.doc.forget(&target.id);
            if target.is_dir {
                let prefix = target.relative.clone();
                changed |= txn.doc.forget_where(|key| {
                    codec::decode(key)
                        .map(|path| path.starts_with(&prefix))
                        .unwrap_or(false)
                });
            }
            if changed {
                txn.commit().await?;
            }
        }

        if target.is_dir {
            fs::remove_dir_all(&target.absolute).await
        } else {
            fs::remove_file(&target.absolute).await
        }
        .map_err(|e| io_error(&target.relative, e))?;

        tracing::info!("Deleted {}", target.relative.display());
        Ok(codec::to_protocol_path(&target.relative))
    }

    /// Store `bytes` as a new document in `parent_id`. A colliding name gets
    /// `_1`, `_2`, ... inserted before its extension.
    pub async fn upload(
        &self,
        parent_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<ItemEntry, StoreError> {
        let parent = self.resolver.resolve_dir(parent_id)?;
        let name = sanitize_upload_file_name(file_name);
        if self.config.is_hidden(&name) {
            return Err(StoreError::invalid_argument(format!(
                "{name} is a reserved name"
            )));
        }

        if bytes.len() as u64 > self.config.max_upload_size {
            return Err(StoreError::FileTooLarge {
                path: codec::to_protocol_path(&parent.relative.join(&name)),
                size: bytes.len() as u64,
                max_size: self.config.max_upload_size,
            });
        }

        let mut attempt = 0;
        loop {
            let candidate = unique_name(&parent.absolute, &name, attempt)?;
            let relative = parent.relative.join(&candidate);
            let absolute = self.resolver.absolute(&relative);

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&absolute)
                .await
            {
                Ok(mut file) => {
                    let written = async {
                        file.write_all(bytes).await?;
                        file.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        let _ = fs::remove_file(&absolute).await;
                        return Err(io_error(&relative, e));
                    }
                    tracing::info!("Uploaded {} ({} bytes)", relative.display(), bytes.len());
                    self.forget_stale(&relative).await?;
                    return self.tree.entry_for(&relative).await;
                }
                // Lost a race for the name; look for the next free one.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                }
                Err(e) => return Err(io_error(&relative, e)),
            }
        }
    }

    /// Upload several base64 payloads; failures are logged and skipped.
    pub async fn upload_many(
        &self,
        parent_id: &str,
        files: &[(String, String)],
    ) -> Result<Vec<ItemEntry>, StoreError> {
        self.resolver.resolve_dir(parent_id)?;

        let mut uploaded = Vec::with_capacity(files.len());
        for (file_name, content_base64) in files {
            let bytes = match BASE64.decode(content_base64) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Skipping upload {}: invalid base64 ({})", file_name, e);
                    continue;
                }
            };
            match self.upload(parent_id, file_name, &bytes).await {
                Ok(entry) => uploaded.push(entry),
                Err(e) => tracing::warn!("Skipping upload {}: {}", file_name, e),
            }
        }
        Ok(uploaded)
    }

    /// Drop metadata a previous occupant of `relative` left behind.
    async fn forget_stale(&self, relative: &Path) -> Result<(), StoreError> {
        let mut txn = self.metadata.transaction().await;
        if txn.doc.forget(&codec::encode(relative)) {
            tracing::debug!("Dropped stale metadata for {}", relative.display());
            txn.commit().await?;
        }
        Ok(())
    }

    fn validate_name(&self, name: &str) -> Result<(), StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::invalid_argument("name must not be empty"));
        }
        if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
            return Err(StoreError::invalid_argument(format!(
                "{name:?} is not a valid name"
            )));
        }
        if self.config.is_hidden(name) {
            return Err(StoreError::invalid_argument(format!(
                "{name} is a reserved name"
            )));
        }
        Ok(())
    }
}

/// First free name in `dir` at or after `start` collisions:
/// `report.pdf`, `report_1.pdf`, `report_2.pdf`, ...
pub fn unique_name(dir: &Path, name: &str, start: u32) -> Result<String, StoreError> {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for counter in start..MAX_NAME_ATTEMPTS {
        let candidate = if counter == 0 {
            name.to_string()
        } else {
            format!("{stem}_{counter}{suffix}")
        };
        if !entry_exists(&dir.join(&candidate)) {
            return Ok(candidate);
        }
    }
    Err(StoreError::AlreadyExists {
        path: name.to_string(),
    })
}

/// Make a client-supplied file name safe to store as a single path segment.
pub fn sanitize_upload_file_name(file_name: &str) -> String {
    // Browsers on Windows may send the full client path.
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);

    let sanitized: String = base
        .trim()
        .chars()
        .map(|ch| match ch {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();

    let sanitized = sanitized.trim().to_string();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return "attachment.bin".to_string();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unique_name_appends_counter_before_extension() {
        let temp = TempDir::new().unwrap();
        assert_eq!(unique_name(temp.path(), "report.pdf", 0).unwrap(), "report.pdf");

        std::fs::write(temp.path().join("report.pdf"), "a").unwrap();
        assert_eq!(unique_name(temp.path(), "report.pdf", 0).unwrap(), "report_1.pdf");

        std::fs::write(temp.path().join("report_1.pdf"), "b").unwrap();
        assert_eq!(unique_name(temp.path(), "report.pdf", 0).unwrap(), "report_2.pdf");
    }

    #[test]
    fn unique_name_handles_missing_extension() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("README"), "a").unwrap();
        assert_eq!(unique_name(temp.path(), "README", 0).unwrap(), "README_1");
    }

    #[test]
    fn sanitize_strips_client_paths_and_reserved_chars() {
        assert_eq!(sanitize_upload_file_name(r"C:\Users\me\scan?.pdf"), "scan_.pdf");
        assert_eq!(sanitize_upload_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_upload_file_name("  facture mars.pdf "), "facture mars.pdf");
        assert_eq!(sanitize_upload_file_name(".."), "attachment.bin");
        assert_eq!(sanitize_upload_file_name("   "), "attachment.bin");
    }
}
