//! Note repository implementation.
//!
//! Every write runs inside a caller-owned transaction so a note row and its
//! image references change together.

use scribe_core::{Error, Note, Result};
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

/// PostgreSQL access to the `note` table.
#[derive(Clone)]
pub struct PgNoteRepository {
    pool: Pool<Postgres>,
}

impl PgNoteRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Fetch a note outside any transaction.
    pub async fn fetch(&self, id: Uuid) -> Result<Note> {
        let mut tx = self.pool.begin().await?;
        let note = self.fetch_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(note)
    }
}

fn note_from_row(row: &sqlx::postgres::PgRow) -> Result<Note> {
    Ok(Note {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        title: row.try_get("title")?,
        stored_content: row.try_get("stored_content")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

/// Transaction-aware operations.
impl PgNoteRepository {
    pub async fn insert_tx(&self, tx: &mut Transaction<'_, Postgres>, note: &Note) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO note (id, owner_id, title, stored_content, created_at_utc, updated_at_utc)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(note.id)
        .bind(note.owner_id)
        .bind(&note.title)
        .bind(&note.stored_content)
        .bind(note.created_at_utc)
        .bind(note.updated_at_utc)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn fetch_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Note> {
        let row = sqlx::query(
            r#"SELECT id, owner_id, title, stored_content, created_at_utc, updated_at_utc
               FROM note WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(Error::NoteNotFound(id))?;

        note_from_row(&row)
    }

    pub async fn update_stored_content_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        stored_content: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE note SET stored_content = $2, updated_at_utc = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(stored_content)
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NoteNotFound(id));
        }
        Ok(())
    }

    pub async fn delete_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM note WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NoteNotFound(id));
        }
        Ok(())
    }

    pub async fn exists_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM note WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(exists)
    }
}
