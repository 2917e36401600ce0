//! Storage configuration.
//!
//! Loaded from environment variables (after `dotenvy::dotenv()` in binaries):
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | [`defaults::DATABASE_URL`] |
//! | `SCRIBE_STORAGE_BACKEND` | `filesystem` |
//! | `SCRIBE_STORAGE_PATH` | [`defaults::STORAGE_PATH`] |
//! | `SCRIBE_DB_MAX_CONNECTIONS` | [`defaults::DB_MAX_CONNECTIONS`] |
//! | `SCRIBE_ORPHAN_MIN_AGE_MINUTES` | [`defaults::ORPHAN_MIN_AGE_MINUTES`] |

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::defaults;
use crate::error::{Error, Result};

/// Which medium holds stored image payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Filesystem,
    /// Process-local; payloads are lost on exit.
    Memory,
}

impl FromStr for StorageBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "memory" => Ok(Self::Memory),
            _ => Err(Error::Config(format!("unknown storage backend: {}", s))),
        }
    }
}

impl fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem => write!(f, "filesystem"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Where payloads and note metadata live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    pub storage_path: PathBuf,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Unreferenced payloads younger than this survive the orphan sweep.
    pub orphan_min_age_minutes: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            storage_path: PathBuf::from(defaults::STORAGE_PATH),
            database_url: defaults::DATABASE_URL.to_string(),
            db_max_connections: defaults::DB_MAX_CONNECTIONS,
            orphan_min_age_minutes: defaults::ORPHAN_MIN_AGE_MINUTES,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!(key, value = %raw, error = %e, "Ignoring invalid configuration value");
            default
        }),
        None => default,
    }
}

impl StorageConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unparsable values fall back to defaults with a warning.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            backend: parse_or(&lookup, "SCRIBE_STORAGE_BACKEND", defaults.backend),
            storage_path: lookup("SCRIBE_STORAGE_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_or(
                &lookup,
                "SCRIBE_DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )
            .max(1),
            orphan_min_age_minutes: parse_or(
                &lookup,
                "SCRIBE_ORPHAN_MIN_AGE_MINUTES",
                defaults.orphan_min_age_minutes,
            )
            .max(0),
        };

        debug!(
            backend = %config.backend,
            storage_path = %config.storage_path.display(),
            "Storage configuration loaded"
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = StorageConfig::from_vars(lookup(&[]));
        assert_eq!(config, StorageConfig::default());
        assert_eq!(config.storage_path, PathBuf::from(defaults::STORAGE_PATH));
    }

    #[test]
    fn test_reads_all_variables() {
        let config = StorageConfig::from_vars(lookup(&[
            ("SCRIBE_STORAGE_BACKEND", "memory"),
            ("SCRIBE_STORAGE_PATH", "/tmp/scribe"),
            ("DATABASE_URL", "postgres://db/scribe"),
        ]));
        assert_eq!(config.backend, StorageBackendKind::Memory);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/scribe"));
        assert_eq!(config.database_url, "postgres://db/scribe");
    }

    #[test]
    fn test_pool_and_sweep_settings() {
        let config = StorageConfig::from_vars(lookup(&[
            ("SCRIBE_DB_MAX_CONNECTIONS", "3"),
            ("SCRIBE_ORPHAN_MIN_AGE_MINUTES", "0"),
        ]));
        assert_eq!(config.db_max_connections, 3);
        assert_eq!(config.orphan_min_age_minutes, 0);

        let config = StorageConfig::from_vars(lookup(&[
            ("SCRIBE_DB_MAX_CONNECTIONS", "lots"),
            ("SCRIBE_ORPHAN_MIN_AGE_MINUTES", "-5"),
        ]));
        assert_eq!(config.db_max_connections, defaults::DB_MAX_CONNECTIONS);
        assert_eq!(config.orphan_min_age_minutes, 0);
    }

    #[test]
    fn test_invalid_backend_falls_back() {
        let config = StorageConfig::from_vars(lookup(&[("SCRIBE_STORAGE_BACKEND", "s3")]));
        assert_eq!(config.backend, StorageBackendKind::Filesystem);
    }

    #[test]
    fn test_backend_kind_parse_and_display() {
        assert_eq!(
            "FS".parse::<StorageBackendKind>().unwrap(),
            StorageBackendKind::Filesystem
        );
        assert!(matches!(
            "tape".parse::<StorageBackendKind>(),
            Err(Error::Config(_))
        ));
        assert_eq!(StorageBackendKind::Memory.to_string(), "memory");
    }
}
