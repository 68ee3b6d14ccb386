use std::sync::Arc;

use crate::protocol::{ItemEntry, StoreError, TagInfo};

use super::codec;
use super::config::StoreConfig;
use super::metadata::MetadataStore;
use super::resolve::PathResolver;
use super::tree::TreeOperations;

/// Tag catalog, item tags and favorites
#[derive(Clone)]
pub struct TagOperations {
    config: Arc<StoreConfig>,
    resolver: Arc<PathResolver>,
    metadata: Arc<MetadataStore>,
    tree: TreeOperations,
}

impl TagOperations {
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

    pub async fn list_tags(&self) -> Vec<TagInfo> {
        self.metadata.load().await.tag_catalog()
    }

    pub async fn create_tag(&self, name: &str, color: Option<&str>) -> Result<TagInfo, StoreError> {
        let name = validate_tag_name(name)?;
        let color = color
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.config.default_tag_color.as_str());

        let mut txn = self.metadata.transaction().await;
        let tag = txn.doc.create_tag(name, color)?;
        txn.commit().await?;
        tracing::info!("Created tag {}", name);
        Ok(tag)
    }

    pub async fn delete_tag(&self, name: &str) -> Result<(), StoreError> {
        let mut txn = self.metadata.transaction().await;
        txn.doc.delete_tag(name)?;
        txn.commit().await?;
        tracing::info!("Deleted tag {}", name);
        Ok(())
    }

    /// Tags of an item. The item need not exist any more.
    pub async fn item_tags(&self, id: &str) -> Result<Vec<String>, StoreError> {
        codec::decode(id)?;
        Ok(self.metadata.tags_of(id).await)
    }

    /// Replace the tags of an existing item. Undefined names are accepted as is.
    pub async fn set_item_tags(&self, id: &str, tags: Vec<String>) -> Result<Vec<String>, StoreError> {
        let item = self.resolver.resolve_existing(id)?;
        let tags = tags
            .iter()
            .map(|t| validate_tag_name(t).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        self.metadata.set_tags(&item.id, tags).await
    }

    /// Attach a tag, defining it first with the default color if needed.
    pub async fn add_item_tag(&self, id: &str, tag: &str) -> Result<Vec<String>, StoreError> {
        let item = self.resolver.resolve_existing(id)?;
        let tag = validate_tag_name(tag)?;

        let mut txn = self.metadata.transaction().await;
        let defined = txn.doc.ensure_tag(tag, &self.config.default_tag_color);
        let attached = txn.doc.attach_tag(&item.id, tag);
        let tags = txn.doc.tags_of(&item.id);
        if defined || attached {
            txn.commit().await?;
        }
        Ok(tags)
    }

    /// Detach a tag. Works for identifiers whose node is already gone.
    pub async fn remove_item_tag(&self, id: &str, tag: &str) -> Result<Vec<String>, StoreError> {
        codec::decode(id)?;
        let mut txn = self.metadata.transaction().await;
        let detached = txn.doc.detach_tag(id, tag);
        let tags = txn.doc.tags_of(id);
        if detached {
            txn.commit().await?;
        }
        Ok(tags)
    }

    /// Items carrying `tag` that still exist
    pub async fn items_by_tag(&self, tag: &str) -> Result<Vec<ItemEntry>, StoreError> {
        let ids = self.metadata.load().await.items_with_tag(tag);
        let relatives = ids
            .iter()
            .filter_map(|id| self.resolver.resolve_existing(id).ok())
            .map(|r| r.relative)
            .collect();
        self.tree.entries_for(relatives).await
    }

    /// Favorite documents in insertion order. Favorites that no longer
    /// resolve to a document are dropped and the pruned list is persisted.
    pub async fn list_favorites(&self) -> Result<Vec<ItemEntry>, StoreError> {
        let resolver = &self.resolver;
        let kept = self
            .metadata
            .retain_favorites(|id| resolver.resolves_to_file(id))
            .await?;
        let relatives = kept
            .iter()
            .filter_map(|id| codec::decode(id).ok())
            .collect();
        self.tree.entries_for(relatives).await
    }

    pub async fn add_favorite(&self, id: &str) -> Result<Vec<ItemEntry>, StoreError> {
        let item = self.resolver.resolve_existing(id)?;
        if item.is_dir {
            return Err(StoreError::NotAFile {
                path: codec::to_protocol_path(&item.relative),
            });
        }

        let mut txn = self.metadata.transaction().await;
        if txn.doc.add_favorite(&item.id) {
            txn.commit().await?;
        } else {
            drop(txn);
        }
        self.list_favorites().await
    }

    pub async fn remove_favorite(&self, id: &str) -> Result<Vec<ItemEntry>, StoreError> {
        if self.metadata.is_favorite(id).await {
            let mut txn = self.metadata.transaction().await;
            if txn.doc.remove_favorite(id) {
                txn.commit().await?;
            }
        }
        self.list_favorites().await
    }
}

fn validate_tag_name(name: &str) -> Result<&str, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::invalid_argument("tag name must not be empty"));
    }
    Ok(trimmed)
}
