//! WebSocket protocol messages
//!
//! Every request carries a client-chosen `request_id` which is echoed back on
//! the matching reply, so clients may pipeline requests over one socket.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::classify::SemanticType;

/// Messages sent from a client to the server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat ping
    Ping,
    Health {
        request_id: String,
    },
    // ---- Navigation ----
    ListRoot {
        request_id: String,
    },
    Browse {
        request_id: String,
        item_id: String,
    },
    GetItem {
        request_id: String,
        item_id: String,
    },
    GetTree {
        request_id: String,
        #[serde(default)]
        max_depth: Option<u32>,
    },
    GetStats {
        request_id: String,
    },
    Search {
        request_id: String,
        query: String,
        #[serde(default)]
        item_type: Option<String>,
        #[serde(default)]
        extension: Option<String>,
    },
    // ---- Mutations ----
    CreateRoot {
        request_id: String,
        name: String,
    },
    CreateChild {
        request_id: String,
        parent_id: String,
        name: String,
    },
    Rename {
        request_id: String,
        item_id: String,
        new_name: String,
    },
    MoveItem {
        request_id: String,
        item_id: String,
        destination_id: String,
    },
    Delete {
        request_id: String,
        item_id: String,
    },
    Upload {
        request_id: String,
        parent_id: String,
        file_name: String,
        content_base64: String,
    },
    UploadMultiple {
        request_id: String,
        parent_id: String,
        files: Vec<UploadFile>,
    },
    Download {
        request_id: String,
        item_id: String,
    },
    Preview {
        request_id: String,
        item_id: String,
    },
    // ---- Tags ----
    ListTags {
        request_id: String,
    },
    CreateTag {
        request_id: String,
        name: String,
        #[serde(default)]
        color: Option<String>,
    },
    DeleteTag {
        request_id: String,
        name: String,
    },
    GetItemTags {
        request_id: String,
        item_id: String,
    },
    SetItemTags {
        request_id: String,
        item_id: String,
        tags: Vec<String>,
    },
    AddItemTag {
        request_id: String,
        item_id: String,
        tag: String,
    },
    RemoveItemTag {
        request_id: String,
        item_id: String,
        tag: String,
    },
    ItemsByTag {
        request_id: String,
        name: String,
    },
    // ---- Favorites ----
    ListFavorites {
        request_id: String,
    },
    AddFavorite {
        request_id: String,
        item_id: String,
    },
    RemoveFavorite {
        request_id: String,
        item_id: String,
    },
}

impl ClientMessage {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Ping => None,
            ClientMessage::Health { request_id }
            | ClientMessage::ListRoot { request_id }
            | ClientMessage::Browse { request_id, .. }
            | ClientMessage::GetItem { request_id, .. }
            | ClientMessage::GetTree { request_id, .. }
            | ClientMessage::GetStats { request_id }
            | ClientMessage::Search { request_id, .. }
            | ClientMessage::CreateRoot { request_id, .. }
            | ClientMessage::CreateChild { request_id, .. }
            | ClientMessage::Rename { request_id, .. }
            | ClientMessage::MoveItem { request_id, .. }
            | ClientMessage::Delete { request_id, .. }
            | ClientMessage::Upload { request_id, .. }
            | ClientMessage::UploadMultiple { request_id, .. }
            | ClientMessage::Download { request_id, .. }
            | ClientMessage::Preview { request_id, .. }
            | ClientMessage::ListTags { request_id }
            | ClientMessage::CreateTag { request_id, .. }
            | ClientMessage::DeleteTag { request_id, .. }
            | ClientMessage::GetItemTags { request_id, .. }
            | ClientMessage::SetItemTags { request_id, .. }
            | ClientMessage::AddItemTag { request_id, .. }
            | ClientMessage::RemoveItemTag { request_id, .. }
            | ClientMessage::ItemsByTag { request_id, .. }
            | ClientMessage::ListFavorites { request_id }
            | ClientMessage::AddFavorite { request_id, .. }
            | ClientMessage::RemoveFavorite { request_id, .. } => Some(request_id),
        }
    }

    /// Operation name reported back in `operation_error` replies
    pub fn operation(&self) -> &'static str {
        match self {
            ClientMessage::Ping => "ping",
            ClientMessage::Health { .. } => "health",
            ClientMessage::ListRoot { .. } => "list_root",
            ClientMessage::Browse { .. } => "browse",
            ClientMessage::GetItem { .. } => "get_item",
            ClientMessage::GetTree { .. } => "get_tree",
            ClientMessage::GetStats { .. } => "get_stats",
            ClientMessage::Search { .. } => "search",
            ClientMessage::CreateRoot { .. } => "create_root",
            ClientMessage::CreateChild { .. } => "create_child",
            ClientMessage::Rename { .. } => "rename",
            ClientMessage::MoveItem { .. } => "move_item",
            ClientMessage::Delete { .. } => "delete",
            ClientMessage::Upload { .. } => "upload",
            ClientMessage::UploadMultiple { .. } => "upload_multiple",
            ClientMessage::Download { .. } => "download",
            ClientMessage::Preview { .. } => "preview",
            ClientMessage::ListTags { .. } => "list_tags",
            ClientMessage::CreateTag { .. } => "create_tag",
            ClientMessage::DeleteTag { .. } => "delete_tag",
            ClientMessage::GetItemTags { .. } => "get_item_tags",
            ClientMessage::SetItemTags { .. } => "set_item_tags",
            ClientMessage::AddItemTag { .. } => "add_item_tag",
            ClientMessage::RemoveItemTag { .. } => "remove_item_tag",
            ClientMessage::ItemsByTag { .. } => "items_by_tag",
            ClientMessage::ListFavorites { .. } => "list_favorites",
            ClientMessage::AddFavorite { .. } => "add_favorite",
            ClientMessage::RemoveFavorite { .. } => "remove_favorite",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        server_version: String,
        root: String,
    },
    /// Heartbeat pong
    Pong,
    Health {
        request_id: String,
        report: HealthReport,
    },
    /// Ordered list of nodes (listing, search, favorites, items by tag, uploads)
    Items {
        request_id: String,
        items: Vec<ItemEntry>,
    },
    Item {
        request_id: String,
        item: ItemEntry,
    },
    Tree {
        request_id: String,
        tree: Vec<TreeNode>,
    },
    Stats {
        request_id: String,
        stats: StoreStats,
    },
    Deleted {
        request_id: String,
        path: String,
    },
    FileContent {
        request_id: String,
        content: FileContent,
    },
    Tags {
        request_id: String,
        tags: Vec<TagInfo>,
    },
    Tag {
        request_id: String,
        tag: TagInfo,
    },
    ItemTags {
        request_id: String,
        item_id: String,
        tags: Vec<String>,
    },
    Favorites {
        request_id: String,
        favorites: Vec<ItemEntry>,
    },
    OperationSuccess {
        request_id: String,
        operation: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    OperationError {
        request_id: String,
        operation: String,
        kind: ErrorKind,
        error: StoreError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFile {
    pub file_name: String,
    pub content_base64: String,
}

/// A node of the store as presented to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: SemanticType,
    /// Path relative to the store root, `/`-separated
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_count: Option<usize>,
}

/// Directory-only skeleton used for navigation rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: SemanticType,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_cabinets: u64,
    pub total_shelves: u64,
    pub total_binders: u64,
    pub total_folders: u64,
    pub total_sub_items: u64,
    pub total_documents: u64,
    pub total_size: u64,
    /// Lowercase extension to document count
    pub extensions: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub color: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub root: String,
    pub root_exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// `attachment` for downloads, `inline` for previews
    pub disposition: String,
    pub checksum: String,
    pub content_base64: String,
}

/// Coarse error classes every [`StoreError`] falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Unavailable,
    IoFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum StoreError {
    #[error("not found: {path}")]
    NotFound { path: String },
    #[error("already exists: {path}")]
    AlreadyExists { path: String },
    #[error("invalid identifier {id:?}: {reason}")]
    InvalidIdentifier { id: String, reason: String },
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("not a directory: {path}")]
    NotADirectory { path: String },
    #[error("not a file: {path}")]
    NotAFile { path: String },
    #[error("file too large: {path} ({size} bytes, max {max_size})")]
    FileTooLarge { path: String, size: u64, max_size: u64 },
    #[error("unavailable: {message}")]
    Unavailable { message: String },
    #[error("i/o error: {message}")]
    IoError { message: String },
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StoreError::InvalidIdentifier { .. }
            | StoreError::InvalidArgument { .. }
            | StoreError::NotADirectory { .. }
            | StoreError::NotAFile { .. }
            | StoreError::FileTooLarge { .. } => ErrorKind::InvalidArgument,
            StoreError::Unavailable { .. } | StoreError::RateLimited { .. } => {
                ErrorKind::Unavailable
            }
            StoreError::IoError { .. } => ErrorKind::IoFailure,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        StoreError::InvalidArgument {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::IoError {
            message: e.to_string(),
        }
    }
}
