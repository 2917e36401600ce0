//! # scribe-core
//!
//! Core types, traits, and abstractions for scribe's note image storage.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other scribe crates depend on: content digests, the embedded-image
//! data-URL grammar, note and image-reference models, and the repository
//! traits the storage layer implements.

pub mod config;
pub mod defaults;
pub mod digest;
pub mod embed;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{StorageBackendKind, StorageConfig};
pub use digest::{Digest, DIGEST_HEX_LEN};
pub use embed::EmbeddedImage;
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
