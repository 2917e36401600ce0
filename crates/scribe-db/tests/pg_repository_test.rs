//! PostgreSQL repository tests.
//!
//! Require a migrated database at DATABASE_URL (defaults to
//! [`DEFAULT_TEST_DATABASE_URL`]). Run with `--ignored`.

use std::sync::Arc;

use scribe_db::test_fixtures::{
    create_request, img, DEFAULT_TEST_DATABASE_URL, IMAGE_A, IMAGE_A_DIGEST, IMAGE_B,
};
use scribe_db::{
    ContentAddressedStore, Database, Digest, Error, FilesystemBackend, NoteImageCatalog,
    NoteImageLifecycle, ReclaimGate,
};
use tempfile::TempDir;
use uuid::Uuid;

async fn setup_test_db() -> Database {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    Database::connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

fn setup_lifecycle(db: &Database, temp_dir: &TempDir) -> NoteImageLifecycle {
    let store = ContentAddressedStore::new(FilesystemBackend::new(temp_dir.path()));
    db.lifecycle(Arc::new(store))
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_create_update_delete() {
    let db = setup_test_db().await;
    let temp_dir = TempDir::new().unwrap();
    let lifecycle = setup_lifecycle(&db, &temp_dir);

    let note = lifecycle
        .create(create_request(format!("{}{}", img(IMAGE_A), img(IMAGE_A))))
        .await
        .unwrap();
    let refs = lifecycle.images(note.id).await.unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].digest.as_str(), IMAGE_A_DIGEST);

    lifecycle
        .update_content(note.id, &img(IMAGE_B))
        .await
        .unwrap();
    let refs = lifecycle.images(note.id).await.unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].digest, Digest::of(IMAGE_B.as_bytes()));
    assert_eq!(lifecycle.content(note.id).await.unwrap(), img(IMAGE_B));

    lifecycle.delete_note(note.id).await.unwrap();
    assert!(lifecycle.images(note.id).await.unwrap().is_empty());
    assert!(matches!(
        lifecycle.content(note.id).await,
        Err(Error::NoteNotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_shared_digest_counts() {
    let db = setup_test_db().await;
    let temp_dir = TempDir::new().unwrap();
    let lifecycle = setup_lifecycle(&db, &temp_dir);
    // Unique payload so counts are not polluted by other runs.
    let image = scribe_db::EmbeddedImage::from_bytes(
        "image/png",
        Uuid::new_v4().as_bytes(),
    )
    .to_data_url();
    let digest = Digest::of(image.as_bytes());

    let first = lifecycle.create(create_request(img(&image))).await.unwrap();
    let second = lifecycle.duplicate(first.id).await.unwrap();
    assert_eq!(db.images.count_references(&digest).await.unwrap(), 2);

    lifecycle.delete_note(first.id).await.unwrap();
    assert_eq!(db.images.count_references(&digest).await.unwrap(), 1);
    assert!(lifecycle.store().exists(&digest).await.unwrap());

    lifecycle.delete_note(second.id).await.unwrap();
    assert_eq!(db.images.count_references(&digest).await.unwrap(), 0);
    assert!(!lifecycle.store().exists(&digest).await.unwrap());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_replace_reports_removed() {
    let db = setup_test_db().await;
    let temp_dir = TempDir::new().unwrap();
    let lifecycle = setup_lifecycle(&db, &temp_dir);
    let note = lifecycle.create(create_request("plain")).await.unwrap();

    let a = Digest::of(b"a");
    let b = Digest::of(b"b");
    let removed = db
        .images
        .replace_for_note(note.id, &[b.clone(), a.clone(), b.clone()])
        .await
        .unwrap();
    assert!(removed.is_empty());

    let refs = db.images.list_for_note(note.id).await.unwrap();
    assert_eq!(
        refs.iter().map(|r| (r.digest.clone(), r.position)).collect::<Vec<_>>(),
        vec![(b.clone(), 0), (a.clone(), 1)]
    );

    let removed = db.images.replace_for_note(note.id, &[a]).await.unwrap();
    assert_eq!(removed, vec![b]);

    let removed = db.images.replace_for_note(note.id, &[]).await.unwrap();
    assert_eq!(removed.len(), 1);

    lifecycle.delete_note(note.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_lifecycles_share_reclaim_gate() {
    let db = setup_test_db().await;

    let writer = db.catalog.begin(ReclaimGate::Shared).await.unwrap();

    let other = Database::new(db.pool().clone());
    let sweeper = tokio::spawn(async move {
        let tx = other.catalog.begin(ReclaimGate::Exclusive).await?;
        tx.commit().await
    });
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!sweeper.is_finished(), "exclusive gate granted while a writer holds it");

    writer.commit().await.unwrap();
    sweeper.await.unwrap().unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_dropped_transaction_rolls_back() {
    let db = setup_test_db().await;
    let temp_dir = TempDir::new().unwrap();
    let lifecycle = setup_lifecycle(&db, &temp_dir);
    let note = lifecycle.create(create_request(img(IMAGE_A))).await.unwrap();

    {
        let mut tx = db.catalog.begin(ReclaimGate::Shared).await.unwrap();
        tx.update_stored_content(note.id, "discarded").await.unwrap();
        assert_eq!(
            tx.replace_for_note(note.id, &[]).await.unwrap(),
            vec![Digest::parse(IMAGE_A_DIGEST).unwrap()]
        );
    }

    assert_eq!(lifecycle.content(note.id).await.unwrap(), img(IMAGE_A));
    assert_eq!(db.images.list_for_note(note.id).await.unwrap().len(), 1);
    assert_eq!(db.notes.fetch(note.id).await.unwrap().id, note.id);

    lifecycle.delete_note(note.id).await.unwrap();
}
