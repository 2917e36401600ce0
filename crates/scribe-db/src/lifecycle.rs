//! Note image lifecycle: create, update, duplicate, teardown.
//!
//! Keeps three things consistent:
//! - a note's stored content,
//! - its [`ImageReference`] set (exactly the distinct digests in that content),
//! - the payload store (no payload without a reference, no reference without
//!   a payload).
//!
//! Payloads are shared across notes, so a digest dropped by one note is only
//! deleted once the global reference count reaches zero.
//!
//! ## Concurrency
//!
//! Callers serialize writes to the same note. Every write is one catalog
//! transaction: the note row and its references commit together or not at
//! all. Writers store payloads and record references while holding the
//! catalog's reclaim gate shared; reclamation and the orphan sweep (count,
//! then delete) hold it exclusively. Because the gate lives in the catalog,
//! a reclaimer in any lifecycle or process never sees a payload that was just
//! stored but not yet referenced.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use scribe_core::{
    CatalogTransaction, CreateNoteRequest, Digest, Error, ImageReference, IntegrityReport, Note,
    NoteImageCatalog, ReclaimGate, Result,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::content_codec::ContentCodec;
use crate::file_storage::ContentAddressedStore;

/// Orchestrates the codec, the catalog, and the store.
pub struct NoteImageLifecycle {
    catalog: Arc<dyn NoteImageCatalog>,
    store: Arc<ContentAddressedStore>,
    codec: ContentCodec,
}

impl NoteImageLifecycle {
    pub fn new(catalog: Arc<dyn NoteImageCatalog>, store: Arc<ContentAddressedStore>) -> Self {
        Self {
            catalog,
            codec: ContentCodec::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<ContentAddressedStore> {
        &self.store
    }

    pub fn codec(&self) -> &ContentCodec {
        &self.codec
    }

    /// Create a note from authoring-form content.
    pub async fn create(&self, req: CreateNoteRequest) -> Result<Note> {
        let mut tx = self.catalog.begin(ReclaimGate::Shared).await?;

        let encoded = self.codec.encode(&req.content).await?;
        let now = Utc::now();
        let note = Note {
            id: Uuid::now_v7(),
            owner_id: req.owner_id,
            title: req.title,
            stored_content: encoded.stored_text,
            created_at_utc: now,
            updated_at_utc: now,
        };

        tx.insert_note(&note).await?;
        tx.replace_for_note(note.id, &encoded.digests).await?;
        tx.commit().await?;

        info!(
            subsystem = "lifecycle",
            op = "create",
            note_id = %note.id,
            image_count = encoded.digests.len(),
            "Note created"
        );
        Ok(note)
    }

    /// Replace a note's content and reconcile its image references.
    ///
    /// Digests the note no longer uses are reclaimed when no other note
    /// references them. On error nothing about the note changes.
    pub async fn update_content(&self, id: Uuid, content: &str) -> Result<Note> {
        let start = Instant::now();

        let mut tx = self.catalog.begin(ReclaimGate::Shared).await?;
        let current = tx.fetch_note(id).await?;
        let encoded = self.codec.encode(content).await?;

        if encoded.stored_text != current.stored_content {
            tx.update_stored_content(id, &encoded.stored_text).await?;
        } else {
            debug!(subsystem = "lifecycle", op = "update", note_id = %id, "Content unchanged");
        }
        let removed = tx.replace_for_note(id, &encoded.digests).await?;
        let updated = tx.fetch_note(id).await?;
        tx.commit().await?;

        let reclaimed = self.reclaim(&removed).await;

        info!(
            subsystem = "lifecycle",
            op = "update",
            note_id = %id,
            removed = removed.len(),
            reclaimed = reclaimed.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Note content updated"
        );
        Ok(updated)
    }

    /// Copy a note under a fresh identifier.
    ///
    /// References are duplicated as-is; no payload is read, hashed, or written.
    pub async fn duplicate(&self, id: Uuid) -> Result<Note> {
        let mut tx = self.catalog.begin(ReclaimGate::Shared).await?;

        let source = tx.fetch_note(id).await?;
        let digests: Vec<Digest> = tx
            .list_for_note(id)
            .await?
            .into_iter()
            .map(|r| r.digest)
            .collect();

        let now = Utc::now();
        let copy = Note {
            id: Uuid::now_v7(),
            created_at_utc: now,
            updated_at_utc: now,
            ..source
        };

        tx.insert_note(&copy).await?;
        tx.replace_for_note(copy.id, &digests).await?;
        tx.commit().await?;

        info!(
            subsystem = "lifecycle",
            op = "duplicate",
            note_id = %copy.id,
            source_id = %id,
            image_count = digests.len(),
            "Note duplicated"
        );
        Ok(copy)
    }

    /// Authoring-form content of a note.
    ///
    /// # Errors
    ///
    /// `Error::MissingPayload` if the stored content references a payload the
    /// store no longer has.
    pub async fn content(&self, id: Uuid) -> Result<String> {
        let mut tx = self.catalog.begin(ReclaimGate::Open).await?;
        let note = tx.fetch_note(id).await?;
        tx.commit().await?;
        self.codec.decode(&note.stored_content).await
    }

    /// The note's image references ordered by position.
    pub async fn images(&self, id: Uuid) -> Result<Vec<ImageReference>> {
        let mut tx = self.catalog.begin(ReclaimGate::Open).await?;
        let refs = tx.list_for_note(id).await?;
        tx.commit().await?;
        Ok(refs)
    }

    /// Drop every image reference the note holds and reclaim payloads no
    /// other note uses. The note itself is left in place.
    pub async fn remove_images(&self, id: Uuid) -> Result<()> {
        let mut tx = self.catalog.begin(ReclaimGate::Shared).await?;
        let removed = tx.delete_for_note(id).await?;
        tx.commit().await?;

        let reclaimed = self.reclaim(&removed).await;
        info!(
            subsystem = "lifecycle",
            op = "remove_images",
            note_id = %id,
            removed = removed.len(),
            reclaimed = reclaimed.len(),
            "Note images removed"
        );
        Ok(())
    }

    /// Delete a note together with its image references.
    pub async fn delete_note(&self, id: Uuid) -> Result<()> {
        let mut tx = self.catalog.begin(ReclaimGate::Shared).await?;
        if !tx.note_exists(id).await? {
            return Err(Error::NoteNotFound(id));
        }
        let removed = tx.delete_for_note(id).await?;
        tx.delete_note(id).await?;
        tx.commit().await?;

        let reclaimed = self.reclaim(&removed).await;
        info!(
            subsystem = "lifecycle",
            op = "delete",
            note_id = %id,
            reclaimed = reclaimed.len(),
            "Note deleted"
        );
        Ok(())
    }

    /// Unreferenced payloads last written at least `min_age` ago.
    ///
    /// What [`Self::sweep_orphans`] would delete right now.
    pub async fn sweep_candidates(&self, min_age: Duration) -> Result<Vec<Digest>> {
        let mut tx = self.catalog.begin(ReclaimGate::Shared).await?;
        let candidates = self.unreferenced_before(&mut *tx, min_age).await?;
        tx.commit().await?;
        Ok(candidates)
    }

    /// Delete every stored payload that no note references and that was last
    /// written at least `min_age` ago.
    ///
    /// Picks up payloads whose inline reclamation failed. The age floor spares
    /// payloads that a writer outside the catalog's gate has stored but not
    /// yet referenced. Returns the digests actually deleted.
    pub async fn sweep_orphans(&self, min_age: Duration) -> Result<Vec<Digest>> {
        let mut tx = self.catalog.begin(ReclaimGate::Exclusive).await?;

        let mut swept = Vec::new();
        for digest in self.unreferenced_before(&mut *tx, min_age).await? {
            match self.store.delete(&digest).await {
                Ok(()) => swept.push(digest),
                Err(e) => warn!(
                    subsystem = "lifecycle",
                    op = "sweep",
                    digest = %digest,
                    error = %e,
                    "Failed to delete orphaned payload"
                ),
            }
        }
        tx.commit().await?;

        info!(
            subsystem = "lifecycle",
            op = "sweep",
            swept = swept.len(),
            min_age_minutes = min_age.num_minutes(),
            "Orphan sweep complete"
        );
        Ok(swept)
    }

    /// Compare the reference table with the store.
    pub async fn verify(&self) -> Result<IntegrityReport> {
        let mut tx = self.catalog.begin(ReclaimGate::Shared).await?;
        let referenced: BTreeSet<Digest> = tx.referenced_digests().await?.into_iter().collect();
        let stored: BTreeSet<Digest> = self.store.list().await?.into_iter().collect();
        tx.commit().await?;

        Ok(IntegrityReport {
            dangling: referenced.difference(&stored).cloned().collect(),
            orphaned: stored.difference(&referenced).cloned().collect(),
            referenced: referenced.len(),
            stored: stored.len(),
        })
    }

    async fn unreferenced_before(
        &self,
        tx: &mut dyn CatalogTransaction,
        min_age: Duration,
    ) -> Result<Vec<Digest>> {
        let referenced: BTreeSet<Digest> = tx.referenced_digests().await?.into_iter().collect();
        let cutoff = Utc::now() - min_age;
        Ok(self
            .store
            .list_stored_before(cutoff)
            .await?
            .into_iter()
            .filter(|digest| !referenced.contains(digest))
            .collect())
    }

    /// Delete each digest whose global reference count is zero.
    ///
    /// Failures are logged, never returned: the reference change that led
    /// here is already committed, and [`Self::sweep_orphans`] retries later.
    async fn reclaim(&self, digests: &[Digest]) -> Vec<Digest> {
        if digests.is_empty() {
            return Vec::new();
        }
        let mut tx = match self.catalog.begin(ReclaimGate::Exclusive).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(
                    subsystem = "lifecycle",
                    op = "reclaim",
                    error = %e,
                    "Could not take the reclaim gate, payloads kept"
                );
                return Vec::new();
            }
        };

        let candidates: BTreeSet<&Digest> = digests.iter().collect();
        let mut reclaimed = Vec::new();
        for digest in candidates {
            let count = match tx.count_references(digest).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(
                        subsystem = "lifecycle",
                        op = "reclaim",
                        digest = %digest,
                        error = %e,
                        "Reference count failed, payload kept"
                    );
                    continue;
                }
            };
            if count > 0 {
                debug!(
                    subsystem = "lifecycle",
                    op = "reclaim",
                    digest = %digest,
                    references = count,
                    "Payload still referenced"
                );
                continue;
            }
            match self.store.delete(digest).await {
                Ok(()) => reclaimed.push(digest.clone()),
                Err(e) => warn!(
                    subsystem = "lifecycle",
                    op = "reclaim",
                    digest = %digest,
                    error = %e,
                    "Failed to delete unreferenced payload"
                ),
            }
        }
        if let Err(e) = tx.commit().await {
            warn!(subsystem = "lifecycle", op = "reclaim", error = %e, "Releasing the reclaim gate failed");
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_storage::MemoryBackend;
    use crate::test_fixtures::{create_request, img, memory_lifecycle, IMAGE_A, IMAGE_B};

    #[tokio::test]
    async fn test_update_unknown_note() {
        let lifecycle = memory_lifecycle(MemoryBackend::new());
        assert!(matches!(
            lifecycle.update_content(Uuid::now_v7(), "x").await,
            Err(Error::NoteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_note_reclaims_payloads() {
        let lifecycle = memory_lifecycle(MemoryBackend::new());
        let note = lifecycle
            .create(create_request(format!("{}{}", img(IMAGE_A), img(IMAGE_B))))
            .await
            .unwrap();
        assert_eq!(lifecycle.store().list().await.unwrap().len(), 2);

        lifecycle.delete_note(note.id).await.unwrap();

        assert!(lifecycle.store().list().await.unwrap().is_empty());
        assert!(matches!(
            lifecycle.content(note.id).await,
            Err(Error::NoteNotFound(_))
        ));
        assert!(matches!(
            lifecycle.delete_note(note.id).await,
            Err(Error::NoteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unchanged_update_keeps_timestamp() {
        let lifecycle = memory_lifecycle(MemoryBackend::new());
        let content = format!("same {}", img(IMAGE_A));
        let note = lifecycle.create(create_request(&content)).await.unwrap();

        let updated = lifecycle.update_content(note.id, &content).await.unwrap();

        assert_eq!(updated.updated_at_utc, note.updated_at_utc);
        assert_eq!(lifecycle.images(note.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_and_verify() {
        let lifecycle = memory_lifecycle(MemoryBackend::new());
        lifecycle
            .create(create_request(img(IMAGE_A)))
            .await
            .unwrap();
        let stray = lifecycle.store().put(IMAGE_B.as_bytes()).await.unwrap();

        let report = lifecycle.verify().await.unwrap();
        assert_eq!(report.orphaned, vec![stray.clone()]);
        assert!(report.dangling.is_empty());
        assert_eq!((report.referenced, report.stored), (1, 2));

        // Too young to sweep.
        assert!(lifecycle
            .sweep_orphans(Duration::minutes(60))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            lifecycle.sweep_candidates(Duration::zero()).await.unwrap(),
            vec![stray.clone()]
        );

        assert_eq!(lifecycle.sweep_orphans(Duration::zero()).await.unwrap(), vec![stray]);
        assert!(lifecycle.verify().await.unwrap().is_clean());
    }
}
