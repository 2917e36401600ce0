//! In-memory note image catalog.
//!
//! Same contracts as the PostgreSQL catalog; used by tests and by
//! single-process embedders that keep notes elsewhere.
//!
//! A transaction works on a private copy of the catalog taken when it begins
//! and records each write. Commit replays those writes onto the current
//! catalog and publishes the result in one step.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scribe_core::{
    distinct_digests, CatalogTransaction, Digest, Error, ImageReference, Note, NoteImageCatalog,
    ReclaimGate, Result,
};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct CatalogState {
    notes: HashMap<Uuid, Note>,
    images: HashMap<Uuid, Vec<ImageReference>>,
}

impl CatalogState {
    fn insert_note(&mut self, note: &Note) -> Result<()> {
        if self.notes.contains_key(&note.id) {
            return Err(Error::InvalidInput(format!("note {} already exists", note.id)));
        }
        self.notes.insert(note.id, note.clone());
        Ok(())
    }

    fn update_stored_content(
        &mut self,
        id: Uuid,
        stored_content: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let note = self.notes.get_mut(&id).ok_or(Error::NoteNotFound(id))?;
        note.stored_content = stored_content.to_string();
        note.updated_at_utc = at;
        Ok(())
    }

    /// Removing a note cascades to its references.
    fn delete_note(&mut self, id: Uuid) -> Result<()> {
        self.notes.remove(&id).ok_or(Error::NoteNotFound(id))?;
        self.images.remove(&id);
        Ok(())
    }

    fn replace_for_note(
        &mut self,
        note_id: Uuid,
        digests: &[Digest],
        at: DateTime<Utc>,
    ) -> Vec<Digest> {
        let wanted = distinct_digests(digests);
        let existing = self.images.remove(&note_id).unwrap_or_default();

        let refs: Vec<ImageReference> = wanted
            .iter()
            .enumerate()
            .map(|(position, digest)| ImageReference {
                note_id,
                digest: digest.clone(),
                position: position as i32,
                created_at_utc: existing
                    .iter()
                    .find(|r| &r.digest == digest)
                    .map_or(at, |r| r.created_at_utc),
            })
            .collect();

        let removed = existing
            .into_iter()
            .map(|r| r.digest)
            .filter(|d| !wanted.contains(d))
            .collect();

        if !refs.is_empty() {
            self.images.insert(note_id, refs);
        }
        removed
    }

    fn delete_for_note(&mut self, note_id: Uuid) -> Vec<Digest> {
        self.images
            .remove(&note_id)
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.digest)
            .collect()
    }
}

/// A recorded write, replayed against the live catalog on commit.
#[derive(Debug)]
enum CatalogWrite {
    InsertNote(Note),
    UpdateContent {
        id: Uuid,
        stored_content: String,
        at: DateTime<Utc>,
    },
    DeleteNote(Uuid),
    ReplaceRefs {
        note_id: Uuid,
        digests: Vec<Digest>,
        at: DateTime<Utc>,
    },
    DeleteRefs(Uuid),
}

impl CatalogWrite {
    fn apply(&self, state: &mut CatalogState) -> Result<()> {
        match self {
            Self::InsertNote(note) => state.insert_note(note),
            Self::UpdateContent {
                id,
                stored_content,
                at,
            } => state.update_stored_content(*id, stored_content, *at),
            Self::DeleteNote(id) => state.delete_note(*id),
            Self::ReplaceRefs {
                note_id,
                digests,
                at,
            } => {
                state.replace_for_note(*note_id, digests, *at);
                Ok(())
            }
            Self::DeleteRefs(note_id) => {
                state.delete_for_note(*note_id);
                Ok(())
            }
        }
    }
}

/// Notes and image references held in process memory.
///
/// Clones share the same catalog and the same reclaim gate.
#[derive(Clone, Default)]
pub struct MemoryNoteImageCatalog {
    state: Arc<RwLock<CatalogState>>,
    gate: Arc<RwLock<()>>,
}

impl MemoryNoteImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NoteImageCatalog for MemoryNoteImageCatalog {
    async fn begin(&self, gate: ReclaimGate) -> Result<Box<dyn CatalogTransaction>> {
        let (shared, exclusive) = match gate {
            ReclaimGate::Open => (None, None),
            ReclaimGate::Shared => (Some(self.gate.clone().read_owned().await), None),
            ReclaimGate::Exclusive => (None, Some(self.gate.clone().write_owned().await)),
        };
        let working = self.state.read().await.clone();
        Ok(Box::new(MemoryCatalogTransaction {
            state: self.state.clone(),
            working,
            writes: Vec::new(),
            _shared: shared,
            _exclusive: exclusive,
        }))
    }
}

/// Uncommitted writes are discarded on drop.
pub struct MemoryCatalogTransaction {
    state: Arc<RwLock<CatalogState>>,
    working: CatalogState,
    writes: Vec<CatalogWrite>,
    _shared: Option<OwnedRwLockReadGuard<()>>,
    _exclusive: Option<OwnedRwLockWriteGuard<()>>,
}

impl MemoryCatalogTransaction {
    fn record(&mut self, write: CatalogWrite) -> Result<()> {
        write.apply(&mut self.working)?;
        self.writes.push(write);
        Ok(())
    }
}

#[async_trait]
impl CatalogTransaction for MemoryCatalogTransaction {
    async fn fetch_note(&mut self, id: Uuid) -> Result<Note> {
        self.working
            .notes
            .get(&id)
            .cloned()
            .ok_or(Error::NoteNotFound(id))
    }

    async fn note_exists(&mut self, id: Uuid) -> Result<bool> {
        Ok(self.working.notes.contains_key(&id))
    }

    async fn insert_note(&mut self, note: &Note) -> Result<()> {
        self.record(CatalogWrite::InsertNote(note.clone()))
    }

    async fn update_stored_content(&mut self, id: Uuid, stored_content: &str) -> Result<()> {
        self.record(CatalogWrite::UpdateContent {
            id,
            stored_content: stored_content.to_string(),
            at: Utc::now(),
        })
    }

    async fn delete_note(&mut self, id: Uuid) -> Result<()> {
        self.record(CatalogWrite::DeleteNote(id))
    }

    async fn list_for_note(&mut self, note_id: Uuid) -> Result<Vec<ImageReference>> {
        Ok(self
            .working
            .images
            .get(&note_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_for_note(&mut self, note_id: Uuid, digests: &[Digest]) -> Result<Vec<Digest>> {
        let at = Utc::now();
        let removed = self.working.replace_for_note(note_id, digests, at);
        self.writes.push(CatalogWrite::ReplaceRefs {
            note_id,
            digests: digests.to_vec(),
            at,
        });
        Ok(removed)
    }

    async fn delete_for_note(&mut self, note_id: Uuid) -> Result<Vec<Digest>> {
        let removed = self.working.delete_for_note(note_id);
        self.writes.push(CatalogWrite::DeleteRefs(note_id));
        Ok(removed)
    }

    async fn count_references(&mut self, digest: &Digest) -> Result<i64> {
        Ok(self
            .working
            .images
            .values()
            .flatten()
            .filter(|r| &r.digest == digest)
            .count() as i64)
    }

    async fn referenced_digests(&mut self) -> Result<Vec<Digest>> {
        let digests: BTreeSet<Digest> = self
            .working
            .images
            .values()
            .flatten()
            .map(|r| r.digest.clone())
            .collect();
        Ok(digests.into_iter().collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        let mut next = state.clone();
        for write in &self.writes {
            write.apply(&mut next)?;
        }
        *state = next;
        Ok(())
    }
}
