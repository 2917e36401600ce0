//! Core traits for scribe abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use uuid::Uuid;

use crate::digest::Digest;
use crate::error::Result;
use crate::models::*;

// =============================================================================
// RECLAIM GATE
// =============================================================================

/// How a catalog transaction excludes payload reclamation.
///
/// Writers that store payloads and then record references hold the gate
/// `Shared` until they commit; reclamation (count, then delete) holds it
/// `Exclusive`. The gate belongs to the catalog, so every lifecycle and every
/// process sharing the catalog sees the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimGate {
    /// Plain reads; no exclusion.
    Open,
    Shared,
    Exclusive,
}

// =============================================================================
// NOTE IMAGE CATALOG
// =============================================================================

/// Notes and their image references, accessed through atomic units of work.
#[async_trait]
pub trait NoteImageCatalog: Send + Sync {
    /// Begin a transaction holding the reclaim gate in the given mode.
    async fn begin(&self, gate: ReclaimGate) -> Result<Box<dyn CatalogTransaction>>;
}

/// One atomic unit of work over notes and image references.
///
/// Nothing is visible to other transactions until [`commit`](Self::commit);
/// dropping the transaction discards its writes and releases the gate.
#[async_trait]
pub trait CatalogTransaction: Send {
    // -- notes ---------------------------------------------------------------

    /// Fetch a note by ID.
    async fn fetch_note(&mut self, id: Uuid) -> Result<Note>;

    /// Check if a note exists.
    async fn note_exists(&mut self, id: Uuid) -> Result<bool>;

    /// Insert a new note.
    async fn insert_note(&mut self, note: &Note) -> Result<()>;

    /// Replace the stored-form content of a note.
    async fn update_stored_content(&mut self, id: Uuid, stored_content: &str) -> Result<()>;

    /// Permanently delete a note.
    async fn delete_note(&mut self, id: Uuid) -> Result<()>;

    // -- image references ----------------------------------------------------

    /// List a note's references ordered by position.
    async fn list_for_note(&mut self, note_id: Uuid) -> Result<Vec<ImageReference>>;

    /// Make the note's reference set equal to the distinct digests of
    /// `digests`, positioned by first appearance.
    ///
    /// Returns the digests that were dropped from the note.
    async fn replace_for_note(&mut self, note_id: Uuid, digests: &[Digest]) -> Result<Vec<Digest>>;

    /// Delete every reference the note holds, returning the dropped digests.
    async fn delete_for_note(&mut self, note_id: Uuid) -> Result<Vec<Digest>>;

    /// Number of references to `digest` across all notes.
    async fn count_references(&mut self, digest: &Digest) -> Result<i64>;

    /// Every digest referenced by at least one note.
    async fn referenced_digests(&mut self) -> Result<Vec<Digest>>;

    // -- completion ----------------------------------------------------------

    /// Make every write of this transaction visible and release the gate.
    async fn commit(self: Box<Self>) -> Result<()>;
}
