//! # scribe-db
//!
//! Embedded-image storage for scribe notes.
//!
//! This crate provides:
//! - A content-addressed payload store over pluggable backends
//! - The content codec that moves inline images in and out of note text
//! - The note image lifecycle (create, update, duplicate, teardown, sweep)
//! - PostgreSQL and in-memory catalogs of notes and image references, with
//!   the reclaim gate shared by every lifecycle on the same catalog
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scribe_db::{ContentAddressedStore, CreateNoteRequest, Database, FilesystemBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/scribe").await?;
//!     let store = Arc::new(ContentAddressedStore::new(FilesystemBackend::new("/var/lib/scribe/images")));
//!     let lifecycle = db.lifecycle(store);
//!
//!     let note = lifecycle.create(CreateNoteRequest {
//!         content: r#"<p>hi</p><img src="data:image/png;base64,iVBORw0KGgo=" />"#.to_string(),
//!         ..Default::default()
//!     }).await?;
//!
//!     println!("Created note: {}", note.id);
//!     Ok(())
//! }
//! ```
pub mod catalog;
pub mod content_codec;
pub mod file_storage;
pub mod image_refs;
pub mod lifecycle;
pub mod memory;
pub mod notes;
pub mod pool;

// Always compiled so integration tests (in tests/) can use the fixtures.
pub mod test_fixtures;

use std::sync::Arc;

// Re-export core types
pub use scribe_core::*;

pub use catalog::{PgCatalogTransaction, PgNoteImageCatalog};
pub use content_codec::{scan_image_tags, ContentCodec, EncodedContent, ImageSource, ImageTag};
pub use file_storage::{
    generate_storage_path, ContentAddressedStore, FilesystemBackend, MemoryBackend,
    StorageBackend, StoredObject,
};
pub use image_refs::PgImageReferenceRepository;
pub use lifecycle::NoteImageLifecycle;
pub use memory::{MemoryCatalogTransaction, MemoryNoteImageCatalog};
pub use notes::PgNoteRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Note rows.
    pub notes: PgNoteRepository,
    /// Note → digest references.
    pub images: PgImageReferenceRepository,
    /// Transactional view over both tables, shared by every lifecycle.
    pub catalog: Arc<PgNoteImageCatalog>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notes: PgNoteRepository::new(pool.clone()),
            images: PgImageReferenceRepository::new(pool.clone()),
            catalog: Arc::new(PgNoteImageCatalog::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Note image lifecycle backed by this database and the given store.
    ///
    /// Every lifecycle shares this database's catalog, and with it the
    /// reclaim gate.
    pub fn lifecycle(&self, store: Arc<ContentAddressedStore>) -> NoteImageLifecycle {
        NoteImageLifecycle::new(self.catalog.clone(), store)
    }
}
