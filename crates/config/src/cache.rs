//! Per-process HCL parser cache, keyed by `(abs-path, mtime-microseconds)`.
//! See spec.md §4.2 and §6 ("HCL parser cache key format").

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::errors::{ConfigError, Result};

/// A parsed configuration file: its AST plus the original text (kept
/// around for error messages and for `try`/`can` re-parsing of
/// sub-expressions).
#[derive(Debug)]
pub struct ParsedFile {
    pub body: hcl::Body,
    pub text: String,
}

/// Builds the cache key string. This exact shape is part of the contract
/// (spec.md §6): `configPath-<abs-config-path>-modTime-<mtime-in-microseconds>`.
pub fn cache_key(abs_path: &Path, mtime_micros: u128) -> String {
    format!("configPath-{}-modTime-{}", abs_path.display(), mtime_micros)
}

fn mtime_micros(path: &Path) -> Result<u128> {
    let metadata = fs::metadata(path)?;
    let modified = metadata.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(|err| ConfigError::Other(anyhow::anyhow!(err)))?;
    Ok(since_epoch.as_micros())
}

/// A single-writer, concurrent-reader cache mapping parse keys to parsed
/// files. Reads never block each other; writes take a short exclusive
/// section (spec.md §4.2(d)).
#[derive(Debug, Default)]
pub struct ParseCache {
    entries: RwLock<HashMap<String, Arc<ParsedFile>>>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<ParsedFile>> {
        self.entries.read().expect("parse cache poisoned").get(key).cloned()
    }

    fn insert(&self, key: String, value: Arc<ParsedFile>) {
        self.entries
            .write()
            .expect("parse cache poisoned")
            .insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("parse cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses `path`, populating the cache on success. A failed parse MUST
    /// NOT populate the cache (spec.md §4.2(b)).
    pub fn parse_file(&self, path: &Path) -> Result<(String, Arc<ParsedFile>)> {
        let abs_path = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let micros = mtime_micros(&abs_path)?;
        let key = cache_key(&abs_path, micros);

        if let Some(cached) = self.get(&key) {
            debug!(path = %abs_path.display(), "parse cache hit");
            return Ok((key, cached));
        }

        let text = fs::read_to_string(&abs_path)?;
        let body = hcl::parse(&text).map_err(|source| ConfigError::Parse {
            path: abs_path.display().to_string(),
            source,
        })?;

        let parsed = Arc::new(ParsedFile { body, text });
        self.insert(key.clone(), parsed.clone());
        debug!(path = %abs_path.display(), "parse cache populated");
        Ok((key, parsed))
    }
}

/// Cache for partial-parse results. The key MUST include the **calling**
/// config path in addition to the parsed file path — `path_relative_to_include`
/// is context-sensitive, and omitting the caller leaks state across
/// environments (spec.md §4.3, §9 "Cache-key scope").
#[derive(Debug, Default)]
pub struct PartialParseCache {
    entries: RwLock<HashMap<(String, String), Arc<hcl::Body>>>,
}

impl PartialParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, caller: &Path, target: &Path) -> Option<Arc<hcl::Body>> {
        let key = (caller.display().to_string(), target.display().to_string());
        self.entries
            .read()
            .expect("partial parse cache poisoned")
            .get(&key)
            .cloned()
    }

    pub fn insert(&self, caller: &Path, target: &Path, body: Arc<hcl::Body>) {
        let key = (caller.display().to_string(), target.display().to_string());
        self.entries
            .write()
            .expect("partial parse cache poisoned")
            .insert(key, body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, thread, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn successful_parse_populates_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unit.hcl");
        fs::write(&path, "locals {\n  name = \"a\"\n}\n").unwrap();

        let cache = ParseCache::new();
        assert!(cache.is_empty());
        let (key, _) = cache.parse_file(&path).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(key.starts_with("configPath-"));
        assert!(key.contains("-modTime-"));
    }

    #[test]
    fn failed_parse_does_not_populate_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.hcl");
        fs::write(&path, "locals {\n  name = \n").unwrap();

        let cache = ParseCache::new();
        assert!(cache.parse_file(&path).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn modifying_file_advances_mtime_and_creates_distinct_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unit.hcl");
        fs::write(&path, "locals {\n  name = \"a\"\n}\n").unwrap();

        let cache = ParseCache::new();
        let (first_key, _) = cache.parse_file(&path).unwrap();

        // Ensure the filesystem mtime actually advances; some filesystems
        // only have 1ms resolution.
        thread::sleep(Duration::from_millis(5));
        fs::write(&path, "locals {\n  name = \"b\"\n}\n").unwrap();

        let (second_key, _) = cache.parse_file(&path).unwrap();

        assert_ne!(first_key, second_key);
        assert_eq!(cache.len(), 2, "stale entry remains but is unreachable by the new key");

        let re = regex_like_match(&first_key);
        assert!(re, "key must match ^configPath-.*-modTime-\\d+$: {first_key}");
        assert!(regex_like_match(&second_key));
    }

    fn regex_like_match(key: &str) -> bool {
        let Some(rest) = key.strip_prefix("configPath-") else {
            return false;
        };
        let Some(idx) = rest.rfind("-modTime-") else {
            return false;
        };
        let (_, tail) = rest.split_at(idx);
        let digits = tail.trim_start_matches("-modTime-");
        !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
    }
}
