//! Persisted directory cache of the content root.
//!
//! Package lookups by name must not re-walk the content tree every time, so
//! the resolver keeps a flat listing of every package file (plus the texture
//! file cache name map) persisted next to the engine's cache directory. The
//! listing is invalidated by the content root's modification time and
//! rebuilt on demand.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// File extensions treated as package files.
pub const PACKAGE_EXTENSIONS: &[&str] = &["gpk", "upk", "u", "umap"];

/// Extension of texture file caches.
pub const TEXTURE_CACHE_EXTENSION: &str = "tfc";

/// Default cache file name.
pub const CACHE_FILE_NAME: &str = "dircache.bin";

/// Flat listing of package files under one content root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryCache {
    root: PathBuf,
    root_mtime_secs: u64,
    /// Relative paths with `/` separators, in scan order.
    files: Vec<String>,
    /// Lowercased file stem to indices into `files`.
    stems: HashMap<String, Vec<usize>>,
    /// Lowercased texture-cache name to relative path.
    texture_caches: HashMap<String, String>,
}

impl DirectoryCache {
    /// Walk `root` and build a fresh listing.
    pub fn scan(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let mut cache = Self {
            root_mtime_secs: dir_mtime_secs(&root).unwrap_or(0),
            root: root.clone(),
            files: Vec::new(),
            stems: HashMap::new(),
            texture_caches: HashMap::new(),
        };
        visit_dir(&root, &root, &mut cache)?;
        info!(
            root = %cache.root.display(),
            packages = cache.files.len(),
            texture_caches = cache.texture_caches.len(),
            "scanned content root"
        );
        Ok(cache)
    }

    /// Load a persisted cache, or rebuild it when missing, stale, or rooted
    /// elsewhere. A freshly built cache is persisted back before returning.
    pub fn load_or_scan(root: impl Into<PathBuf>, cache_file: &Path) -> io::Result<Self> {
        let root = root.into();
        if let Some(cached) = Self::load(cache_file) {
            if cached.root == root && !cached.is_stale() {
                debug!(
                    root = %root.display(),
                    packages = cached.files.len(),
                    "directory cache is fresh"
                );
                return Ok(cached);
            }
            debug!(root = %root.display(), "directory cache is stale, rebuilding");
        }
        let cache = Self::scan(root)?;
        if let Err(err) = cache.save(cache_file) {
            warn!(path = %cache_file.display(), error = %err, "failed to persist directory cache");
        }
        Ok(cache)
    }

    /// Read a persisted cache file.
    pub fn load(cache_file: &Path) -> Option<Self> {
        let bytes = fs::read(cache_file).ok()?;
        match bincode::deserialize(&bytes) {
            Ok(cache) => Some(cache),
            Err(err) => {
                warn!(path = %cache_file.display(), error = %err, "discarding unreadable directory cache");
                None
            }
        }
    }

    /// Persist this cache.
    pub fn save(&self, cache_file: &Path) -> io::Result<()> {
        if let Some(parent) = cache_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(cache_file, bytes)
    }

    /// True when the content root's mtime no longer matches.
    pub fn is_stale(&self) -> bool {
        dir_mtime_secs(&self.root).unwrap_or(0) != self.root_mtime_secs
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    /// Absolute path of the package whose file stem matches `name` exactly
    /// (case-insensitive). The first scan-order match wins.
    pub fn lookup(&self, name: &str) -> Option<PathBuf> {
        let indices = self.stems.get(&name.to_ascii_lowercase())?;
        indices
            .first()
            .map(|&i| self.root.join(&self.files[i]))
    }

    /// All numbered family members of `base`: `Base`, `Base_2`, `Base_3`, …
    ///
    /// Returned as `(stem, absolute path)` with the bare name first and
    /// numeric suffixes ascending.
    pub fn family(&self, base: &str) -> Vec<(String, PathBuf)> {
        let pattern = format!(r"(?i)^{}(?:_(\d+))?$", regex::escape(base));
        let re = Regex::new(&pattern).expect("family pattern is valid");

        let mut members: Vec<(u64, String, PathBuf)> = Vec::new();
        for (stem, indices) in &self.stems {
            if let Some(caps) = re.captures(stem) {
                let rank = caps
                    .get(1)
                    .and_then(|m| m.as_str().parse::<u64>().ok())
                    .unwrap_or(0);
                for &i in indices {
                    members.push((rank, stem.clone(), self.root.join(&self.files[i])));
                }
            }
        }
        members.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        members.into_iter().map(|(_, stem, path)| (stem, path)).collect()
    }

    /// Absolute path of a texture file cache by name.
    pub fn texture_cache(&self, name: &str) -> Option<PathBuf> {
        self.texture_caches
            .get(&name.to_ascii_lowercase())
            .map(|rel| self.root.join(rel))
    }
}

fn dir_mtime_secs(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

fn visit_dir(root: &Path, dir: &Path, cache: &mut DirectoryCache) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            visit_dir(root, &path, cache)?;
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if PACKAGE_EXTENSIONS.contains(&ext.as_str()) {
            let index = cache.files.len();
            cache.files.push(rel);
            cache.stems.entry(stem).or_default().push(index);
        } else if ext == TEXTURE_CACHE_EXTENSION {
            cache.texture_caches.insert(stem, rel);
        }
    }
    Ok(())
}
