use std::path::PathBuf;

/// Name of the side metadata document kept at the store root
pub const METADATA_FILE_NAME: &str = ".ged_metadata.json";

/// Configuration for the document store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory every identifier is relative to
    pub root: PathBuf,

    /// Metadata document name, created directly under `root`
    pub metadata_file_name: String,

    /// Entry name prefixes (case-insensitive) excluded from every listing and walk
    pub hidden_patterns: Vec<String>,

    /// Maximum search results returned after sorting
    pub max_search_results: usize,

    /// Tree depth used when a client does not ask for one
    pub default_tree_depth: u32,

    /// Upper bound accepted for tree depth requests
    pub max_tree_depth: u32,

    /// Maximum file size for download/preview (bytes)
    pub max_read_size: u64,

    /// Maximum file size for uploads (bytes)
    pub max_upload_size: u64,

    /// Color given to tags created implicitly
    pub default_tag_color: String,

    /// Whether identifiers may resolve through symlinks
    pub follow_symlinks: bool,
}

impl StoreConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(&self.metadata_file_name)
    }

    /// A name is hidden when it equals or starts with one of the patterns,
    /// ignoring case. The metadata document is always hidden.
    pub fn is_hidden(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        if name.starts_with(&self.metadata_file_name.to_lowercase()) {
            return true;
        }
        self.hidden_patterns
            .iter()
            .any(|pattern| name.starts_with(&pattern.to_lowercase()))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let root = std::env::var_os("DOCSHELF_ROOT")
            .map(PathBuf::from)
            .or_else(|| dirs_next::document_dir().map(|d| d.join("docshelf")))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            root,
            metadata_file_name: METADATA_FILE_NAME.to_string(),
            hidden_patterns: vec![
                "@eaDir".to_string(),
                "#recycle".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "@tmp".to_string(),
                "#snapshot".to_string(),
            ],
            max_search_results: 100,
            default_tree_depth: 4,
            max_tree_depth: 10,
            max_read_size: 50 * 1024 * 1024,
            max_upload_size: 50 * 1024 * 1024,
            default_tag_color: "#3b82f6".to_string(),
            follow_symlinks: false,
        }
    }
}
