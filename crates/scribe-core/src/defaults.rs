//! Centralized default constants for scribe.
//!
//! All crates and binaries should reference these constants instead of
//! defining their own magic values.

// =============================================================================
// STORAGE
// =============================================================================

/// Default directory for stored image payloads.
pub const STORAGE_PATH: &str = "/var/lib/scribe/images";

/// Top-level directory under the storage root holding payload files.
pub const STORAGE_PREFIX: &str = "images";

/// File permission bits applied to payload files on unix.
pub const PAYLOAD_FILE_MODE: u32 = 0o644;

/// Minimum age of an unreferenced payload before the orphan sweep deletes it.
///
/// Covers stores shared with writers that do not take the reclaim gate.
pub const ORPHAN_MIN_AGE_MINUTES: i64 = 60;

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL when `DATABASE_URL` is not set.
pub const DATABASE_URL: &str = "postgres://localhost/scribe";

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default connection acquire timeout in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Postgres advisory lock key backing the reclaim gate.
pub const RECLAIM_LOCK_KEY: i64 = 0x7363_7269_6265_0001;

// =============================================================================
// LOGGING
// =============================================================================

/// Default `RUST_LOG` filter for scribe binaries.
pub const LOG_FILTER: &str = "scribe_gc=info,scribe_db=info,scribe_core=info";
