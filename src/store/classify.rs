use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::StoreError;

/// Depth-derived label of a node. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Cabinet,
    Shelf,
    Binder,
    Folder,
    SubItem,
    Document,
}

/// `level` counts directories below the root: a top-level directory is 0.
pub fn classify(level: usize, is_leaf: bool) -> SemanticType {
    if is_leaf {
        return SemanticType::Document;
    }
    match level {
        0 => SemanticType::Cabinet,
        1 => SemanticType::Shelf,
        2 => SemanticType::Binder,
        3 => SemanticType::Folder,
        _ => SemanticType::SubItem,
    }
}

/// Level of a store-relative path, i.e. its segment count minus one.
pub fn level_of(relative: &Path) -> usize {
    relative.components().count().saturating_sub(1)
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Cabinet => "cabinet",
            SemanticType::Shelf => "shelf",
            SemanticType::Binder => "binder",
            SemanticType::Folder => "folder",
            SemanticType::SubItem => "sub_item",
            SemanticType::Document => "document",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cabinet" => Ok(SemanticType::Cabinet),
            "shelf" => Ok(SemanticType::Shelf),
            "binder" => Ok(SemanticType::Binder),
            "folder" => Ok(SemanticType::Folder),
            "sub_item" | "sub-item" | "subitem" => Ok(SemanticType::SubItem),
            "document" => Ok(SemanticType::Document),
            other => Err(StoreError::invalid_argument(format!(
                "unknown item type: {other}"
            ))),
        }
    }
}
