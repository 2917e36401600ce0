//! Image reference repository: the note → digest ownership table.
//!
//! `note_image` rows are unique per `(note_id, digest)` and cascade with their
//! note. The global reference count of a digest is a plain `COUNT(*)` over the
//! table.

use scribe_core::{distinct_digests, Digest, ImageReference, Result};
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

/// PostgreSQL access to the `note_image` table.
#[derive(Clone)]
pub struct PgImageReferenceRepository {
    pool: Pool<Postgres>,
}

impl PgImageReferenceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn list_for_note(&self, note_id: Uuid) -> Result<Vec<ImageReference>> {
        let mut tx = self.pool.begin().await?;
        let refs = self.list_for_note_tx(&mut tx, note_id).await?;
        tx.commit().await?;
        Ok(refs)
    }

    /// Replace a note's references in a transaction of its own.
    pub async fn replace_for_note(&self, note_id: Uuid, digests: &[Digest]) -> Result<Vec<Digest>> {
        let mut tx = self.pool.begin().await?;
        let removed = self.replace_for_note_tx(&mut tx, note_id, digests).await?;
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn count_references(&self, digest: &Digest) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let count = self.count_references_tx(&mut tx, digest).await?;
        tx.commit().await?;
        Ok(count)
    }
}

fn reference_from_row(row: &sqlx::postgres::PgRow) -> Result<ImageReference> {
    Ok(ImageReference {
        note_id: row.try_get("note_id")?,
        digest: Digest::parse(row.try_get::<&str, _>("digest")?)?,
        position: row.try_get("position")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn digests_from_rows(rows: &[sqlx::postgres::PgRow]) -> Result<Vec<Digest>> {
    rows.iter()
        .map(|row| Digest::parse(row.try_get::<&str, _>("digest")?))
        .collect()
}

/// Transaction-aware operations.
impl PgImageReferenceRepository {
    pub async fn list_for_note_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        note_id: Uuid,
    ) -> Result<Vec<ImageReference>> {
        let rows = sqlx::query(
            r#"SELECT note_id, digest, position, created_at_utc
               FROM note_image
               WHERE note_id = $1
               ORDER BY position"#,
        )
        .bind(note_id)
        .fetch_all(&mut **tx)
        .await?;

        rows.iter().map(reference_from_row).collect()
    }

    /// Make the note's references equal to the distinct digests, positioned
    /// by first appearance. Returns the digests dropped from the note.
    pub async fn replace_for_note_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        note_id: Uuid,
        digests: &[Digest],
    ) -> Result<Vec<Digest>> {
        let wanted = distinct_digests(digests);
        let keys: Vec<String> = wanted.iter().map(|d| d.to_string()).collect();
        let positions: Vec<i32> = (0..wanted.len() as i32).collect();

        let removed_rows = sqlx::query(
            r#"DELETE FROM note_image
               WHERE note_id = $1 AND NOT (digest = ANY($2))
               RETURNING digest"#,
        )
        .bind(note_id)
        .bind(&keys)
        .fetch_all(&mut **tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO note_image (note_id, digest, position)
               SELECT $1, d.digest, d.position
               FROM UNNEST($2::text[], $3::int4[]) AS d(digest, position)
               ON CONFLICT (note_id, digest) DO UPDATE SET position = EXCLUDED.position"#,
        )
        .bind(note_id)
        .bind(&keys)
        .bind(&positions)
        .execute(&mut **tx)
        .await?;

        let removed = digests_from_rows(&removed_rows)?;
        debug!(
            subsystem = "db",
            op = "replace_images",
            note_id = %note_id,
            kept = wanted.len(),
            removed = removed.len(),
            "Image references replaced"
        );
        Ok(removed)
    }

    pub async fn delete_for_note_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        note_id: Uuid,
    ) -> Result<Vec<Digest>> {
        let rows = sqlx::query("DELETE FROM note_image WHERE note_id = $1 RETURNING digest")
            .bind(note_id)
            .fetch_all(&mut **tx)
            .await?;
        digests_from_rows(&rows)
    }

    pub async fn count_references_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        digest: &Digest,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM note_image WHERE digest = $1")
            .bind(digest.as_str())
            .fetch_one(&mut **tx)
            .await?;
        Ok(count)
    }

    pub async fn referenced_digests_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Vec<Digest>> {
        let rows = sqlx::query("SELECT DISTINCT digest FROM note_image ORDER BY digest")
            .fetch_all(&mut **tx)
            .await?;
        digests_from_rows(&rows)
    }
}
