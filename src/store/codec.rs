//! Identifier codec.
//!
//! An identifier is the store-relative path, `/`-joined, in unpadded URL-safe
//! base64. It is a pure function of the path: renaming or moving a node mints
//! a new identifier and the old one never resolves again.

use std::path::{Component, Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::protocol::StoreError;

/// Encode a path relative to the store root.
pub fn encode(relative: &Path) -> String {
    URL_SAFE_NO_PAD.encode(to_protocol_path(relative))
}

/// Decode an identifier back to a relative path. Only the shape of the path
/// is checked here, existence is up to the caller.
pub fn decode(id: &str) -> Result<PathBuf, StoreError> {
    let invalid = |reason: &str| StoreError::InvalidIdentifier {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(id)
        .map_err(|e| invalid(&e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|_| invalid("not valid UTF-8"))?;

    if text.is_empty() {
        return Err(invalid("empty path"));
    }
    if text.starts_with('/') {
        return Err(invalid("absolute path"));
    }
    if text.contains('\0') {
        return Err(invalid("NUL byte in path"));
    }

    let mut path = PathBuf::new();
    for segment in text.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid("malformed path segment"));
        }
        path.push(segment);
    }

    // Windows prefixes and roots slip through `split('/')` as plain segments.
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(invalid("malformed path segment"));
    }

    Ok(path)
}

/// `/`-joined form of a relative path, as shown to clients.
pub fn to_protocol_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
