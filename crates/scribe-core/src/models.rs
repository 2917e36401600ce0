//! Data models for notes and their image references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::Digest;

/// A note as persisted: content is held in stored (digest-reference) form.
///
/// The authoring form is never persisted; it is produced on read by decoding
/// `stored_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub stored_content: String,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Link between a note and one stored image payload.
///
/// Unique per `(note_id, digest)`; `position` is the 0-based ordinal of the
/// digest's first appearance among the note's distinct images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub note_id: Uuid,
    pub digest: Digest,
    pub position: i32,
    pub created_at_utc: DateTime<Utc>,
}

/// Request for creating a new note from authoring-form content.
#[derive(Debug, Clone, Default)]
pub struct CreateNoteRequest {
    pub owner_id: Uuid,
    pub title: String,
    /// Content with images embedded inline as base64 data URLs.
    pub content: String,
}

/// Result of an integrity scan over references and stored payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Digests referenced by at least one note but absent from the store.
    pub dangling: Vec<Digest>,
    /// Stored payloads no note references.
    pub orphaned: Vec<Digest>,
    /// Number of distinct digests referenced across all notes.
    pub referenced: usize,
    /// Number of payloads in the store.
    pub stored: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty() && self.orphaned.is_empty()
    }
}

/// Collapse an ordered digest list to its distinct digests, keeping the order
/// of first appearance.
pub fn distinct_digests(digests: &[Digest]) -> Vec<Digest> {
    let mut seen = std::collections::HashSet::with_capacity(digests.len());
    digests
        .iter()
        .filter(|d| seen.insert(*d))
        .cloned()
        .collect()
}
