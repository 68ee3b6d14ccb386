use std::path::{Path, PathBuf};
use std::sync::Arc;

use path_jail::Jail;

use crate::protocol::StoreError;

use super::codec;
use super::config::StoreConfig;

/// An identifier that names an existing, visible node under the root.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Canonical identifier, re-encoded from `relative`
    pub id: String,
    pub relative: PathBuf,
    pub absolute: PathBuf,
    pub is_dir: bool,
}

impl Resolved {
    pub fn name(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Turns identifiers into paths and refuses anything that escapes the root
pub struct PathResolver {
    config: Arc<StoreConfig>,
}

impl PathResolver {
    pub fn new(config: Arc<StoreConfig>) -> Self {
        Self { config }
    }

    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.config.root.join(relative)
    }

    /// Resolve an identifier that must name an existing node.
    pub fn resolve_existing(&self, id: &str) -> Result<Resolved, StoreError> {
        let relative = codec::decode(id)?;
        self.resolve_relative(relative)
    }

    pub fn resolve_relative(&self, relative: PathBuf) -> Result<Resolved, StoreError> {
        let absolute = self.absolute(&relative);
        let not_found = || StoreError::NotFound {
            path: codec::to_protocol_path(&relative),
        };

        if relative
            .components()
            .any(|c| self.config.is_hidden(&c.as_os_str().to_string_lossy()))
        {
            return Err(not_found());
        }

        match std::fs::symlink_metadata(&absolute) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        }

        let id = codec::encode(&relative);
        self.ensure_contained(&id, &relative, &absolute)?;

        let is_dir = std::fs::metadata(&absolute)
            .map(|m| m.is_dir())
            .map_err(|_| not_found())?;

        Ok(Resolved {
            id,
            relative,
            absolute,
            is_dir,
        })
    }

    /// Resolve an identifier that must name an existing directory.
    pub fn resolve_dir(&self, id: &str) -> Result<Resolved, StoreError> {
        let resolved = self.resolve_existing(id)?;
        if !resolved.is_dir {
            return Err(StoreError::NotADirectory {
                path: codec::to_protocol_path(&resolved.relative),
            });
        }
        Ok(resolved)
    }

    /// Cheap existence test used for favorites and tag lookups.
    pub fn resolves_to_file(&self, id: &str) -> bool {
        self.resolve_existing(id)
            .map(|r| !r.is_dir)
            .unwrap_or(false)
    }

    fn ensure_contained(&self, id: &str, relative: &Path, absolute: &Path) -> Result<(), StoreError> {
        let escape = |reason: &str| StoreError::InvalidIdentifier {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let jail = Jail::new(&self.config.root).map_err(|e| StoreError::Unavailable {
            message: format!("store root {}: {}", self.config.root.display(), e),
        })?;

        if !self.config.follow_symlinks && self.contains_symlink(relative) {
            return Err(escape("symlinked paths are not allowed"));
        }

        let canonical = absolute
            .canonicalize()
            .map_err(|_| escape("path does not resolve"))?;
        if jail.contains(&canonical).is_err() {
            return Err(escape("path is outside the store root"));
        }

        Ok(())
    }

    fn contains_symlink(&self, relative: &Path) -> bool {
        let mut current = self.config.root.clone();
        for component in relative.components() {
            current.push(component.as_os_str());
            let is_symlink = std::fs::symlink_metadata(&current)
                .map(|meta| meta.file_type().is_symlink())
                .unwrap_or(false);
            if is_symlink {
                return true;
            }
        }
        false
    }
}

/// True if anything, including a dangling symlink, occupies `path`.
pub fn entry_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}
