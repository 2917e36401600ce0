//! PostgreSQL note image catalog.
//!
//! Each catalog transaction is one database transaction. The reclaim gate is
//! a transaction-scoped advisory lock on [`defaults::RECLAIM_LOCK_KEY`], so
//! it is shared by every process using the same database and is released by
//! commit or rollback.

use async_trait::async_trait;
use scribe_core::{
    defaults, CatalogTransaction, Digest, ImageReference, Note, NoteImageCatalog, ReclaimGate,
    Result,
};
use sqlx::{Pool, Postgres, Transaction};
use tracing::trace;
use uuid::Uuid;

use crate::image_refs::PgImageReferenceRepository;
use crate::notes::PgNoteRepository;

/// Notes and image references in PostgreSQL.
#[derive(Clone)]
pub struct PgNoteImageCatalog {
    pool: Pool<Postgres>,
    notes: PgNoteRepository,
    images: PgImageReferenceRepository,
}

impl PgNoteImageCatalog {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            notes: PgNoteRepository::new(pool.clone()),
            images: PgImageReferenceRepository::new(pool.clone()),
            pool,
        }
    }
}

async fn acquire_gate(tx: &mut Transaction<'_, Postgres>, gate: ReclaimGate) -> Result<()> {
    let sql = match gate {
        ReclaimGate::Open => return Ok(()),
        ReclaimGate::Shared => "SELECT pg_advisory_xact_lock_shared($1)",
        ReclaimGate::Exclusive => "SELECT pg_advisory_xact_lock($1)",
    };
    sqlx::query(sql)
        .bind(defaults::RECLAIM_LOCK_KEY)
        .execute(&mut **tx)
        .await?;
    trace!(subsystem = "db", op = "gate", gate = ?gate, "Reclaim gate acquired");
    Ok(())
}

#[async_trait]
impl NoteImageCatalog for PgNoteImageCatalog {
    async fn begin(&self, gate: ReclaimGate) -> Result<Box<dyn CatalogTransaction>> {
        let mut tx = self.pool.begin().await?;
        acquire_gate(&mut tx, gate).await?;
        Ok(Box::new(PgCatalogTransaction {
            tx,
            notes: self.notes.clone(),
            images: self.images.clone(),
        }))
    }
}

/// An open PostgreSQL transaction; rolled back when dropped uncommitted.
pub struct PgCatalogTransaction {
    tx: Transaction<'static, Postgres>,
    notes: PgNoteRepository,
    images: PgImageReferenceRepository,
}

#[async_trait]
impl CatalogTransaction for PgCatalogTransaction {
    async fn fetch_note(&mut self, id: Uuid) -> Result<Note> {
        self.notes.fetch_tx(&mut self.tx, id).await
    }

    async fn note_exists(&mut self, id: Uuid) -> Result<bool> {
        self.notes.exists_tx(&mut self.tx, id).await
    }

    async fn insert_note(&mut self, note: &Note) -> Result<()> {
        self.notes.insert_tx(&mut self.tx, note).await
    }

    async fn update_stored_content(&mut self, id: Uuid, stored_content: &str) -> Result<()> {
        self.notes
            .update_stored_content_tx(&mut self.tx, id, stored_content)
            .await
    }

    async fn delete_note(&mut self, id: Uuid) -> Result<()> {
        self.notes.delete_tx(&mut self.tx, id).await
    }

    async fn list_for_note(&mut self, note_id: Uuid) -> Result<Vec<ImageReference>> {
        self.images.list_for_note_tx(&mut self.tx, note_id).await
    }

    async fn replace_for_note(&mut self, note_id: Uuid, digests: &[Digest]) -> Result<Vec<Digest>> {
        self.images
            .replace_for_note_tx(&mut self.tx, note_id, digests)
            .await
    }

    async fn delete_for_note(&mut self, note_id: Uuid) -> Result<Vec<Digest>> {
        self.images.delete_for_note_tx(&mut self.tx, note_id).await
    }

    async fn count_references(&mut self, digest: &Digest) -> Result<i64> {
        self.images.count_references_tx(&mut self.tx, digest).await
    }

    async fn referenced_digests(&mut self) -> Result<Vec<Digest>> {
        self.images.referenced_digests_tx(&mut self.tx).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
