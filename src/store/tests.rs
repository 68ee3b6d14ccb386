use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tempfile::TempDir;

use crate::protocol::{ErrorKind, StoreError};

use super::classify::SemanticType;
use super::codec;
use super::config::{StoreConfig, METADATA_FILE_NAME};
use super::metadata::{MetadataDocument, MetadataStore};
use super::DocumentStore;

fn store_in(temp: &TempDir) -> DocumentStore {
    DocumentStore::new(StoreConfig::with_root(temp.path()))
}

fn id(path: &str) -> String {
    codec::encode(Path::new(path))
}

fn mkdirs(temp: &TempDir, path: &str) {
    std::fs::create_dir_all(temp.path().join(path)).unwrap();
}

fn touch(temp: &TempDir, path: &str, content: &str) {
    let full = temp.path().join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
}

/// What is on disk right now, read through a fresh store.
async fn persisted(temp: &TempDir) -> MetadataDocument {
    MetadataStore::new(temp.path().join(METADATA_FILE_NAME)).load().await
}

fn names(items: &[crate::protocol::ItemEntry]) -> Vec<&str> {
    items.iter().map(|i| i.name.as_str()).collect()
}

#[tokio::test]
async fn test_list_root_returns_visible_cabinets_only() {
    let temp = TempDir::new().unwrap();
    mkdirs(&temp, "Taxes");
    mkdirs(&temp, "archive");
    mkdirs(&temp, "@eaDir");
    mkdirs(&temp, "#recycle");
    touch(&temp, "loose.txt", "x");
    touch(&temp, ".DS_Store", "x");
    touch(&temp, ".ged_metadata.json", "{}");

    let store = store_in(&temp);
    let roots = store.tree().list_root().await.unwrap();

    assert_eq!(names(&roots), vec!["archive", "Taxes"]);
    assert!(roots.iter().all(|r| r.item_type == SemanticType::Cabinet));
}

#[tokio::test]
async fn test_browse_sorts_directories_first_and_classifies_by_depth() {
    let temp = TempDir::new().unwrap();
    mkdirs(&temp, "Cabinet/Shelf");
    touch(&temp, "Cabinet/b.pdf", "b");
    touch(&temp, "Cabinet/A.txt", "a");
    touch(&temp, "Cabinet/Thumbs.db", "x");

    let store = store_in(&temp);
    let items = store.tree().list(&id("Cabinet")).await.unwrap();

    assert_eq!(names(&items), vec!["Shelf", "A.txt", "b.pdf"]);
    assert_eq!(items[0].item_type, SemanticType::Shelf);
    assert_eq!(items[0].children_count, Some(0));
    assert_eq!(items[1].item_type, SemanticType::Document);
    assert_eq!(items[2].size, Some(1));
    assert_eq!(items[2].extension.as_deref(), Some("pdf"));
    assert_eq!(items[2].mime_type.as_deref(), Some("application/pdf"));
    assert_eq!(items[2].path, "Cabinet/b.pdf");
    assert_eq!(items[2].id, id("Cabinet/b.pdf"));
}

#[tokio::test]
async fn test_browse_rejects_documents_and_hidden_paths() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/note.txt", "x");
    touch(&temp, "Cabinet/@eaDir/thumb.jpg", "x");

    let store = store_in(&temp);

    let err = store.tree().list(&id("Cabinet/note.txt")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store.tree().list(&id("Cabinet/@eaDir")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store.tree().get(&id("Cabinet/@eaDir/thumb.jpg")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_traversal_identifiers_are_rejected() {
    let temp = TempDir::new().unwrap();
    mkdirs(&temp, "Cabinet");
    let store = store_in(&temp);

    for raw in ["../outside", "Cabinet/../../etc", "/etc/passwd", ""] {
        let token = URL_SAFE_NO_PAD.encode(raw);
        let err = store.tree().get(&token).await.unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidIdentifier { .. }),
            "{raw:?} gave {err:?}"
        );
    }

    let err = store.tree().get("not base64!").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_escaping_root_is_rejected() {
    let temp = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
    mkdirs(&temp, "Cabinet");
    std::os::unix::fs::symlink(outside.path(), temp.path().join("Cabinet/link")).unwrap();

    let store = store_in(&temp);
    let err = store.tree().get(&id("Cabinet/link/secret.txt")).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidIdentifier { .. }));

    let items = store.tree().list(&id("Cabinet")).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_get_reports_tags_on_documents() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Shelf/report.pdf", "pdf");
    let store = store_in(&temp);
    let doc = id("Cabinet/Shelf/report.pdf");

    store.tags().add_item_tag(&doc, "tax").await.unwrap();
    let item = store.tree().get(&doc).await.unwrap();

    assert_eq!(item.tags, Some(vec!["tax".to_string()]));
    assert_eq!(item.item_type, SemanticType::Document);

    let shelf = store.tree().get(&id("Cabinet/Shelf")).await.unwrap();
    assert!(shelf.tags.is_none());
    assert_eq!(shelf.children_count, Some(1));
}

#[tokio::test]
async fn test_tree_respects_depth_and_skips_documents() {
    let temp = TempDir::new().unwrap();
    mkdirs(&temp, "Cabinet/Shelf/Binder/Folder");
    touch(&temp, "Cabinet/top.pdf", "x");
    mkdirs(&temp, "Other");

    let store = store_in(&temp);

    let shallow = store.tree().build_tree(Some(1)).await.unwrap();
    assert_eq!(shallow.len(), 2);
    assert_eq!(shallow[0].name, "Cabinet");
    assert_eq!(shallow[0].item_type, SemanticType::Cabinet);
    assert_eq!(shallow[0].children.len(), 1);
    assert_eq!(shallow[0].children[0].name, "Shelf");
    assert_eq!(shallow[0].children[0].item_type, SemanticType::Shelf);
    assert!(shallow[0].children[0].children.is_empty());

    let full = store.tree().build_tree(None).await.unwrap();
    let binder = &full[0].children[0].children[0];
    assert_eq!(binder.item_type, SemanticType::Binder);
    assert_eq!(binder.children[0].item_type, SemanticType::Folder);
    assert_eq!(binder.children[0].path, "Cabinet/Shelf/Binder/Folder");
}

#[tokio::test]
async fn test_tree_depth_out_of_range_is_invalid() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    for depth in [0, 11] {
        let err = store.tree().build_tree(Some(depth)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

#[tokio::test]
async fn test_search_descends_into_non_matching_and_matching_directories() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/2023/invoice_march.pdf", "m");
    touch(&temp, "Cabinet/Invoices/april.pdf", "a");
    touch(&temp, "Cabinet/Invoices/Invoice_may.PDF", "m");
    touch(&temp, "Cabinet/@eaDir/invoice_thumb.pdf", "t");
    touch(&temp, "Cabinet/2023/receipt.pdf", "r");

    let store = store_in(&temp);

    let documents = store
        .tree()
        .search("INVOICE", Some("document"), None)
        .await
        .unwrap();
    let paths: Vec<&str> = documents.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "Cabinet/2023/invoice_march.pdf",
            "Cabinet/Invoices/Invoice_may.PDF"
        ]
    );

    let everything = store.tree().search("invoice", None, None).await.unwrap();
    assert_eq!(everything[0].path, "Cabinet/Invoices");
    assert_eq!(everything[0].item_type, SemanticType::Shelf);
    assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn test_search_filters_by_extension_and_type() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/notes/plan.txt", "x");
    touch(&temp, "Cabinet/notes/plan.pdf", "x");
    mkdirs(&temp, "Cabinet/planning");

    let store = store_in(&temp);

    let pdfs = store.tree().search("plan", None, Some(".PDF")).await.unwrap();
    assert_eq!(names(&pdfs), vec!["plan.pdf"]);

    let shelves = store.tree().search("plan", Some("shelf"), None).await.unwrap();
    assert_eq!(names(&shelves), vec!["planning"]);

    let err = store.tree().search("plan", Some("drawer"), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = store.tree().search("   ", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_search_truncates_after_sorting() {
    let temp = TempDir::new().unwrap();
    for i in 0..5 {
        touch(&temp, &format!("Cabinet/scan_{i}.pdf"), "x");
    }
    let store = DocumentStore::new(StoreConfig {
        max_search_results: 3,
        ..StoreConfig::with_root(temp.path())
    });

    let hits = store.tree().search("scan", None, None).await.unwrap();
    assert_eq!(names(&hits), vec!["scan_0.pdf", "scan_1.pdf", "scan_2.pdf"]);
}

#[tokio::test]
async fn test_search_keeps_surrounding_spaces_in_query() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/2023.pdf", "x");
    touch(&temp, "Cabinet/Report 2023.pdf", "x");
    let store = store_in(&temp);

    let hits = store.tree().search(" 2023", None, None).await.unwrap();
    assert_eq!(names(&hits), vec!["Report 2023.pdf"]);

    let hits = store.tree().search("2023", None, None).await.unwrap();
    assert_eq!(names(&hits), vec!["2023.pdf", "Report 2023.pdf"]);

    let err = store.tree().search("", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_directories_are_skipped_by_walks() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Locked/secret_invoice.pdf", "s");
    touch(&temp, "Cabinet/Open/invoice.pdf", "o");
    let locked = temp.path().join("Cabinet/Locked");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    if std::fs::read_dir(&locked).is_ok() {
        // Permission bits do not apply to this user (root).
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let store = store_in(&temp);
    let hits = store.tree().search("invoice", None, None).await;
    let stats = store.tree().stats().await;
    let tree = store.tree().build_tree(None).await;
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

    let hits = hits.unwrap();
    let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
    assert_eq!(paths, vec!["Cabinet/Open/invoice.pdf"]);

    let stats = stats.unwrap();
    assert_eq!(stats.total_shelves, 2);
    assert_eq!(stats.total_documents, 1);

    let tree = tree.unwrap();
    assert_eq!(tree.len(), 1);
    let shelves: Vec<&str> = tree[0].children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(shelves, vec!["Locked", "Open"]);
    assert!(tree[0].children[0].children.is_empty());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_non_utf8_names_are_not_listed() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/good.pdf", "g");
    std::fs::write(
        temp.path().join("Cabinet").join(OsStr::from_bytes(b"bad\xff.pdf")),
        "b",
    )
    .unwrap();
    let store = store_in(&temp);

    let items = store.tree().list(&id("Cabinet")).await.unwrap();
    assert_eq!(names(&items), vec!["good.pdf"]);

    let hits = store.tree().search("pdf", None, None).await.unwrap();
    assert_eq!(names(&hits), vec!["good.pdf"]);

    let stats = store.tree().stats().await.unwrap();
    assert_eq!(stats.total_documents, 1);
}

#[tokio::test]
async fn test_stats_counts_every_level() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Shelf/Binder/Folder/Sub/deep.txt", "12345");
    touch(&temp, "Cabinet/a.PDF", "12");
    touch(&temp, "Cabinet/README", "1");
    touch(&temp, "Cabinet/@eaDir/ignored.jpg", "ignored");
    touch(&temp, ".ged_metadata.json", "{}");

    let store = store_in(&temp);
    let stats = store.tree().stats().await.unwrap();

    assert_eq!(stats.total_cabinets, 1);
    assert_eq!(stats.total_shelves, 1);
    assert_eq!(stats.total_binders, 1);
    assert_eq!(stats.total_folders, 1);
    assert_eq!(stats.total_sub_items, 1);
    assert_eq!(stats.total_documents, 3);
    assert_eq!(stats.total_size, 8);
    assert_eq!(stats.extensions.get("pdf"), Some(&1));
    assert_eq!(stats.extensions.get("txt"), Some(&1));
    assert_eq!(stats.extensions.get("(none)"), Some(&1));
    assert!(!stats.extensions.contains_key("jpg"));
}

#[tokio::test]
async fn test_missing_root_is_unavailable() {
    let temp = TempDir::new().unwrap();
    let store = DocumentStore::new(StoreConfig::with_root(temp.path().join("gone")));

    assert_eq!(store.health().unwrap_err().kind(), ErrorKind::Unavailable);
    assert_eq!(
        store.tree().list_root().await.unwrap_err().kind(),
        ErrorKind::Unavailable
    );
    assert_eq!(
        store.tree().stats().await.unwrap_err().kind(),
        ErrorKind::Unavailable
    );
    assert_eq!(
        store.mutations().create_root("Cabinet").await.unwrap_err().kind(),
        ErrorKind::Unavailable
    );
}

#[tokio::test]
async fn test_create_root_and_child() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    let cabinet = store.mutations().create_root("Household").await.unwrap();
    assert_eq!(cabinet.item_type, SemanticType::Cabinet);
    assert_eq!(cabinet.id, id("Household"));

    let shelf = store.mutations().create(&cabinet.id, "Insurance").await.unwrap();
    assert_eq!(shelf.item_type, SemanticType::Shelf);
    assert!(temp.path().join("Household/Insurance").is_dir());

    let err = store.mutations().create_root("Household").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn test_create_validates_names_and_parents() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/file.txt", "x");
    let store = store_in(&temp);

    for bad in ["", "  ", "a/b", "..", "@eaDir"] {
        let err = store.mutations().create(&id("Cabinet"), bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{bad:?}");
    }

    let err = store.mutations().create(&id("Missing"), "x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store
        .mutations()
        .create(&id("Cabinet/file.txt"), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotADirectory { .. }));
}

#[tokio::test]
async fn test_rename_carries_tags_and_favorite() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Shelf/report.pdf", "pdf");
    let store = store_in(&temp);
    let old_id = id("Cabinet/Shelf/report.pdf");

    store.tags().add_item_tag(&old_id, "tax").await.unwrap();
    store.tags().add_favorite(&old_id).await.unwrap();

    let renamed = store
        .mutations()
        .rename(&old_id, "report-2023.pdf")
        .await
        .unwrap();
    let new_id = id("Cabinet/Shelf/report-2023.pdf");

    assert_eq!(renamed.id, new_id);
    assert_eq!(renamed.tags, Some(vec!["tax".to_string()]));
    assert!(store.tags().item_tags(&old_id).await.unwrap().is_empty());
    let meta = persisted(&temp).await;
    assert!(!meta.is_favorite(&old_id));
    assert!(meta.is_favorite(&new_id));

    let err = store.tree().get(&old_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_rename_checks_existence_before_conflicts() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/a.pdf", "a");
    touch(&temp, "Cabinet/b.pdf", "b");
    let store = store_in(&temp);

    let err = store
        .mutations()
        .rename(&id("Cabinet/missing.pdf"), "b.pdf")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    store.tags().add_item_tag(&id("Cabinet/a.pdf"), "keep").await.unwrap();
    let err = store
        .mutations()
        .rename(&id("Cabinet/a.pdf"), "b.pdf")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    assert_eq!(std::fs::read_to_string(temp.path().join("Cabinet/b.pdf")).unwrap(), "b");
    assert_eq!(
        store.tags().item_tags(&id("Cabinet/a.pdf")).await.unwrap(),
        vec!["keep".to_string()]
    );
}

#[tokio::test]
async fn test_rename_directory_keeps_descendant_metadata_keys() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Old/doc.pdf", "x");
    let store = store_in(&temp);
    store
        .tags()
        .add_item_tag(&id("Cabinet/Old/doc.pdf"), "tax")
        .await
        .unwrap();

    let renamed = store.mutations().rename(&id("Cabinet/Old"), "New").await.unwrap();
    assert_eq!(renamed.path, "Cabinet/New");
    assert!(temp.path().join("Cabinet/New/doc.pdf").is_file());

    // Descendant identifiers are not re-keyed; the old key stays orphaned.
    let doc = store.tree().get(&id("Cabinet/New/doc.pdf")).await.unwrap();
    assert_eq!(doc.tags, Some(Vec::new()));
    assert_eq!(
        store.tags().item_tags(&id("Cabinet/Old/doc.pdf")).await.unwrap(),
        vec!["tax".to_string()]
    );
}

#[tokio::test]
async fn test_new_nodes_do_not_inherit_orphaned_metadata() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Old/doc.pdf", "x");
    let store = store_in(&temp);
    let old_doc = id("Cabinet/Old/doc.pdf");
    let old_dir = id("Cabinet/Old");

    store.tags().add_item_tag(&old_doc, "secret").await.unwrap();
    store.tags().add_favorite(&old_doc).await.unwrap();
    store.tags().add_item_tag(&old_dir, "archive").await.unwrap();
    store.mutations().rename(&old_dir, "New").await.unwrap();

    let recreated = store.mutations().create(&id("Cabinet"), "Old").await.unwrap();
    assert_eq!(recreated.id, old_dir);
    assert!(store.tags().item_tags(&old_dir).await.unwrap().is_empty());

    let uploaded = store
        .mutations()
        .upload(&old_dir, "doc.pdf", b"fresh")
        .await
        .unwrap();
    assert_eq!(uploaded.id, old_doc);
    assert_eq!(uploaded.tags, Some(Vec::new()));

    let meta = persisted(&temp).await;
    assert!(!meta.item_tags.contains_key(&old_doc));
    assert!(!meta.is_favorite(&old_doc));
    assert!(store.tags().list_favorites().await.unwrap().is_empty());
    assert!(store.tags().items_by_tag("secret").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_relocated_document_drops_orphaned_metadata_at_target() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Old/doc.pdf", "x");
    touch(&temp, "Cabinet/plain.pdf", "p");
    touch(&temp, "Cabinet/Inbox/doc.pdf", "i");
    let store = store_in(&temp);

    store
        .tags()
        .add_item_tag(&id("Cabinet/Old/doc.pdf"), "secret")
        .await
        .unwrap();
    store.mutations().rename(&id("Cabinet/Old"), "New").await.unwrap();
    store.mutations().create(&id("Cabinet"), "Old").await.unwrap();

    // An untagged document renamed onto the orphaned identifier.
    std::fs::rename(
        temp.path().join("Cabinet/plain.pdf"),
        temp.path().join("Cabinet/Old/plain.pdf"),
    )
    .unwrap();
    let renamed = store
        .mutations()
        .rename(&id("Cabinet/Old/plain.pdf"), "doc.pdf")
        .await
        .unwrap();
    assert_eq!(renamed.id, id("Cabinet/Old/doc.pdf"));
    assert_eq!(renamed.tags, Some(Vec::new()));

    // And an untagged document moved onto it.
    store
        .tags()
        .add_item_tag(&id("Cabinet/Old/doc.pdf"), "secret")
        .await
        .unwrap();
    store.mutations().rename(&id("Cabinet/Old"), "Older").await.unwrap();
    store.mutations().create(&id("Cabinet"), "Old").await.unwrap();
    let moved = store
        .mutations()
        .move_item(&id("Cabinet/Inbox/doc.pdf"), &id("Cabinet/Old"))
        .await
        .unwrap();
    assert_eq!(moved.id, id("Cabinet/Old/doc.pdf"));
    assert_eq!(moved.tags, Some(Vec::new()));
    assert!(!persisted(&temp)
        .await
        .item_tags
        .contains_key(&id("Cabinet/Old/doc.pdf")));
}

#[tokio::test]
async fn test_failed_rename_leaves_metadata_untouched() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/a.pdf", "a");
    let store = store_in(&temp);
    let doc = id("Cabinet/a.pdf");

    store.tags().add_item_tag(&doc, "tax").await.unwrap();
    store.tags().add_favorite(&doc).await.unwrap();

    let too_long = format!("{}.pdf", "x".repeat(300));
    let err = store.mutations().rename(&doc, &too_long).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);

    assert!(temp.path().join("Cabinet/a.pdf").is_file());
    assert_eq!(
        store.tags().item_tags(&doc).await.unwrap(),
        vec!["tax".to_string()]
    );
    let meta = persisted(&temp).await;
    assert_eq!(meta.favorites, vec![doc.clone()]);
    assert!(!meta.item_tags.contains_key(&id(&format!("Cabinet/{too_long}"))));
}

#[tokio::test]
async fn test_move_carries_tags_and_favorite() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Inbox/scan.pdf", "s");
    mkdirs(&temp, "Cabinet/Filed");
    let store = store_in(&temp);
    let old_id = id("Cabinet/Inbox/scan.pdf");

    store
        .tags()
        .set_item_tags(&old_id, vec!["bank".into(), "2024".into()])
        .await
        .unwrap();
    store.tags().add_favorite(&old_id).await.unwrap();

    let moved = store
        .mutations()
        .move_item(&old_id, &id("Cabinet/Filed"))
        .await
        .unwrap();
    let new_id = id("Cabinet/Filed/scan.pdf");

    assert_eq!(moved.id, new_id);
    assert_eq!(
        store.tags().item_tags(&new_id).await.unwrap(),
        vec!["bank".to_string(), "2024".to_string()]
    );
    assert!(store.tags().item_tags(&old_id).await.unwrap().is_empty());

    let favorites = store.tags().list_favorites().await.unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].id, new_id);
}

#[tokio::test]
async fn test_move_rejects_cycles_and_non_directory_destinations() {
    let temp = TempDir::new().unwrap();
    mkdirs(&temp, "Cabinet/A/Sub");
    touch(&temp, "Cabinet/file.pdf", "x");
    let store = store_in(&temp);

    let err = store
        .mutations()
        .move_item(&id("Cabinet/A"), &id("Cabinet/A"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = store
        .mutations()
        .move_item(&id("Cabinet/A"), &id("Cabinet/A/Sub"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = store
        .mutations()
        .move_item(&id("Cabinet/A"), &id("Cabinet/file.pdf"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = store
        .mutations()
        .move_item(&id("Cabinet/A"), &id("Nowhere"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(temp.path().join("Cabinet/A/Sub").is_dir());
}

#[tokio::test]
async fn test_move_into_occupied_name_conflicts() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/A/doc.pdf", "a");
    touch(&temp, "Cabinet/B/doc.pdf", "b");
    let store = store_in(&temp);

    let err = store
        .mutations()
        .move_item(&id("Cabinet/A/doc.pdf"), &id("Cabinet/B"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(temp.path().join("Cabinet/A/doc.pdf").exists());
}

#[tokio::test]
async fn test_delete_directory_forgets_descendant_metadata() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/Old/doc.pdf", "x");
    touch(&temp, "Cabinet/Oldies/keep.pdf", "x");
    let store = store_in(&temp);
    let doc = id("Cabinet/Old/doc.pdf");
    let keep = id("Cabinet/Oldies/keep.pdf");

    store.tags().add_item_tag(&doc, "tax").await.unwrap();
    store.tags().add_favorite(&doc).await.unwrap();
    store.tags().add_item_tag(&keep, "tax").await.unwrap();

    let deleted = store.mutations().delete(&id("Cabinet/Old")).await.unwrap();
    assert_eq!(deleted, "Cabinet/Old");
    assert!(!temp.path().join("Cabinet/Old").exists());

    let meta = persisted(&temp).await;
    assert!(!meta.item_tags.contains_key(&doc));
    assert!(meta.item_tags.contains_key(&keep));
    assert!(meta.favorites.is_empty());
    // Tag definitions survive their last item.
    assert!(meta.tags.contains_key("tax"));
}

#[tokio::test]
async fn test_delete_document_and_missing() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/doc.pdf", "x");
    let store = store_in(&temp);
    let doc = id("Cabinet/doc.pdf");
    store.tags().add_item_tag(&doc, "tax").await.unwrap();

    store.mutations().delete(&doc).await.unwrap();
    assert!(store.tags().item_tags(&doc).await.unwrap().is_empty());

    let err = store.mutations().delete(&doc).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_upload_appends_counter_on_collision() {
    let temp = TempDir::new().unwrap();
    mkdirs(&temp, "Cabinet/Inbox");
    let store = store_in(&temp);
    let inbox = id("Cabinet/Inbox");

    let mut names = Vec::new();
    for content in ["one", "two", "three"] {
        let entry = store
            .mutations()
            .upload(&inbox, "report.pdf", content.as_bytes())
            .await
            .unwrap();
        names.push(entry.name);
    }
    assert_eq!(names, vec!["report.pdf", "report_1.pdf", "report_2.pdf"]);
    assert_eq!(
        std::fs::read_to_string(temp.path().join("Cabinet/Inbox/report_1.pdf")).unwrap(),
        "two"
    );
}

#[tokio::test]
async fn test_upload_validates_parent_name_and_size() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/doc.pdf", "x");
    let store = DocumentStore::new(StoreConfig {
        max_upload_size: 4,
        ..StoreConfig::with_root(temp.path())
    });

    let err = store
        .mutations()
        .upload(&id("Cabinet/doc.pdf"), "a.txt", b"x")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotADirectory { .. }));

    let err = store
        .mutations()
        .upload(&id("Cabinet"), "big.bin", b"12345")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::FileTooLarge { .. }));

    let err = store
        .mutations()
        .upload(&id("Cabinet"), ".ged_metadata.json", b"{}")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let entry = store
        .mutations()
        .upload(&id("Cabinet"), "../../escape.txt", b"x")
        .await
        .unwrap();
    assert_eq!(entry.path, "Cabinet/escape.txt");
}

#[tokio::test]
async fn test_upload_many_skips_bad_payloads() {
    let temp = TempDir::new().unwrap();
    mkdirs(&temp, "Cabinet");
    let store = store_in(&temp);

    let files = vec![
        ("a.txt".to_string(), BASE64.encode("alpha")),
        ("broken.txt".to_string(), "%%%".to_string()),
        ("a.txt".to_string(), BASE64.encode("again")),
    ];
    let uploaded = store
        .mutations()
        .upload_many(&id("Cabinet"), &files)
        .await
        .unwrap();

    assert_eq!(names(&uploaded), vec!["a.txt", "a_1.txt"]);
    assert!(!temp.path().join("Cabinet/broken.txt").exists());
}

#[tokio::test]
async fn test_download_and_preview_carry_checksum() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/notes", "hello world");
    mkdirs(&temp, "Cabinet/Dir");
    let store = store_in(&temp);
    let doc = id("Cabinet/notes");

    let download = store.read_document(&doc, false).await.unwrap();
    assert_eq!(download.disposition, "attachment");
    assert_eq!(download.mime_type, "application/octet-stream");
    assert_eq!(download.checksum, format!("{:x}", md5::compute(b"hello world")));
    assert_eq!(BASE64.decode(&download.content_base64).unwrap(), b"hello world");

    let preview = store.read_document(&doc, true).await.unwrap();
    assert_eq!(preview.disposition, "inline");
    assert_eq!(preview.mime_type, "text/plain");

    let err = store.read_document(&id("Cabinet/Dir"), false).await.unwrap_err();
    assert!(matches!(err, StoreError::NotAFile { .. }));
}

#[tokio::test]
async fn test_tag_catalog_lifecycle() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/a.pdf", "a");
    touch(&temp, "Cabinet/b.pdf", "b");
    let store = store_in(&temp);

    let created = store.tags().create_tag("Bank", Some("#ff0000")).await.unwrap();
    assert_eq!(created.count, 0);
    let err = store.tags().create_tag("Bank", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    store.tags().add_item_tag(&id("Cabinet/a.pdf"), "Bank").await.unwrap();
    store.tags().add_item_tag(&id("Cabinet/b.pdf"), "Bank").await.unwrap();
    store.tags().add_item_tag(&id("Cabinet/b.pdf"), "auto").await.unwrap();

    let tags = store.tags().list_tags().await;
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].name, "auto");
    assert_eq!(tags[0].color, "#3b82f6");
    assert_eq!(tags[0].count, 1);
    assert_eq!(tags[1].name, "Bank");
    assert_eq!(tags[1].count, 2);

    store.tags().delete_tag("Bank").await.unwrap();
    assert_eq!(
        store.tags().item_tags(&id("Cabinet/b.pdf")).await.unwrap(),
        vec!["auto".to_string()]
    );
    let err = store.tags().delete_tag("Bank").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_item_tag_edits() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/a.pdf", "a");
    let store = store_in(&temp);
    let doc = id("Cabinet/a.pdf");

    let tags = store
        .tags()
        .set_item_tags(&doc, vec!["x".into(), "y".into(), "x".into()])
        .await
        .unwrap();
    assert_eq!(tags, vec!["x".to_string(), "y".to_string()]);

    let tags = store.tags().add_item_tag(&doc, "x").await.unwrap();
    assert_eq!(tags.len(), 2);

    let tags = store.tags().remove_item_tag(&doc, "x").await.unwrap();
    assert_eq!(tags, vec!["y".to_string()]);

    let err = store
        .tags()
        .set_item_tags(&id("Cabinet/missing.pdf"), vec!["x".into()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_items_by_tag_skips_vanished_nodes() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/a.pdf", "a");
    touch(&temp, "Cabinet/b.pdf", "b");
    let store = store_in(&temp);

    store.tags().add_item_tag(&id("Cabinet/a.pdf"), "tax").await.unwrap();
    store.tags().add_item_tag(&id("Cabinet/b.pdf"), "tax").await.unwrap();
    std::fs::remove_file(temp.path().join("Cabinet/a.pdf")).unwrap();

    let items = store.tags().items_by_tag("tax").await.unwrap();
    assert_eq!(names(&items), vec!["b.pdf"]);
}

#[tokio::test]
async fn test_favorites_are_idempotent_and_self_heal() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/a.pdf", "a");
    touch(&temp, "Cabinet/b.pdf", "b");
    let store = store_in(&temp);

    store.tags().add_favorite(&id("Cabinet/b.pdf")).await.unwrap();
    store.tags().add_favorite(&id("Cabinet/a.pdf")).await.unwrap();
    let favorites = store.tags().add_favorite(&id("Cabinet/b.pdf")).await.unwrap();
    assert_eq!(names(&favorites), vec!["b.pdf", "a.pdf"]);

    std::fs::remove_file(temp.path().join("Cabinet/b.pdf")).unwrap();
    let favorites = store.tags().list_favorites().await.unwrap();
    assert_eq!(names(&favorites), vec!["a.pdf"]);
    assert_eq!(persisted(&temp).await.favorites, vec![id("Cabinet/a.pdf")]);

    // The pruned list was written back, so a second listing is stable.
    let again = store.tags().list_favorites().await.unwrap();
    assert_eq!(names(&again), vec!["a.pdf"]);
    assert_eq!(persisted(&temp).await.favorites, vec![id("Cabinet/a.pdf")]);

    let favorites = store.tags().remove_favorite(&id("Cabinet/a.pdf")).await.unwrap();
    assert!(favorites.is_empty());
    let favorites = store.tags().remove_favorite(&id("Cabinet/a.pdf")).await.unwrap();
    assert!(favorites.is_empty());
}

#[tokio::test]
async fn test_directories_cannot_be_favorites() {
    let temp = TempDir::new().unwrap();
    mkdirs(&temp, "Cabinet");
    let store = store_in(&temp);

    let err = store.tags().add_favorite(&id("Cabinet")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotAFile { .. }));
    assert!(persisted(&temp).await.favorites.is_empty());
}

#[tokio::test]
async fn test_concurrent_tag_writes_are_not_lost() {
    let temp = TempDir::new().unwrap();
    touch(&temp, "Cabinet/a.pdf", "a");
    let store = Arc::new(store_in(&temp));
    let doc = id("Cabinet/a.pdf");

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let doc = doc.clone();
        handles.push(tokio::spawn(async move {
            store.tags().add_item_tag(&doc, &format!("t{i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.tags().item_tags(&doc).await.unwrap().len(), 16);
    assert_eq!(store.tags().list_tags().await.len(), 16);
}
