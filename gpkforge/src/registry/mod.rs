//! The engine registry.
//!
//! Every piece of cross-package shared state lives on one injected service
//! object instead of process-wide statics: the open-package list, the class
//! map, the missing-package and missing-class memo sets, the composite map,
//! and the directory cache. Tests construct isolated registries.
//!
//! # Locking
//!
//! Read-modify-write sequences hold their lock end to end. In particular,
//! `find_or_open` keeps the package-list lock across "search, else open and
//! insert" so two threads racing on the same name cannot both open it.
//! Lock order where two locks meet is package list before directory cache.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::codec::Guid;
use crate::config::EngineConfig;
use crate::error::{FormatError, FormatResult};
use crate::object::{ClassFactory, SharedObject};
use crate::package::Package;
use crate::resolver::composite::{CompositeEntry, CompositeMap};
use crate::resolver::dircache::DirectoryCache;
use crate::telemetry::EngineMetrics;

/// Injected shared-state service for packages and the resolver.
pub struct Registry {
    config: EngineConfig,
    factory: ClassFactory,
    metrics: EngineMetrics,

    packages: Mutex<Vec<Arc<Package>>>,
    class_map: DashMap<String, SharedObject>,
    missing_packages: Mutex<HashSet<String>>,
    missing_classes: Mutex<HashSet<String>>,
    composite: RwLock<CompositeMap>,
    /// Decrypted package-name to relative-path mapper index.
    name_map: RwLock<HashMap<String, String>>,
    /// Decrypted object redirector map (`from` path to `to` path).
    redirect_map: RwLock<HashMap<String, String>>,
    dir_cache: Mutex<Option<Arc<DirectoryCache>>>,
    version_pin: Mutex<Option<u16>>,
}

impl Registry {
    /// Create a registry with the built-in object kinds registered.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            factory: ClassFactory::with_builtins(),
            metrics: EngineMetrics::new(),
            packages: Mutex::new(Vec::new()),
            class_map: DashMap::new(),
            missing_packages: Mutex::new(HashSet::new()),
            missing_classes: Mutex::new(HashSet::new()),
            composite: RwLock::new(CompositeMap::new()),
            name_map: RwLock::new(HashMap::new()),
            redirect_map: RwLock::new(HashMap::new()),
            dir_cache: Mutex::new(None),
            version_pin: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &ClassFactory {
        &self.factory
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    // ---- version pinning -------------------------------------------------

    /// Pin the engine version; set once by the class bootstrap.
    pub fn pin_version(&self, version: u16) {
        let mut pin = self.version_pin.lock();
        if pin.is_none() {
            info!(version, "pinned engine package version");
        }
        *pin = Some(version);
    }

    /// Fail fast when `version` does not match the bootstrap pin.
    /// Before bootstrap, every supported version passes.
    pub fn check_version(&self, version: u16) -> FormatResult<()> {
        match *self.version_pin.lock() {
            Some(pinned) if pinned != version => Err(FormatError::VersionMismatch {
                version,
                pinned,
            }),
            _ => Ok(()),
        }
    }

    // ---- open package list -----------------------------------------------

    /// Open (or return the already-open) package at an explicit path.
    pub fn open_package_file(
        self: &Arc<Self>,
        path: impl AsRef<Path>,
    ) -> FormatResult<Arc<Package>> {
        let path = path.as_ref();
        let mut packages = self.packages.lock();
        if let Some(open) = packages
            .iter()
            .find(|p| p.source_path() == Some(path))
        {
            return Ok(open.clone());
        }
        let package = Package::open(path, self)?;
        packages.push(package.clone());
        Ok(package)
    }

    /// Already-open package by case-insensitive name, preferring a GUID
    /// match when a GUID is supplied.
    pub fn loaded_package(&self, name: &str, guid: Option<Guid>) -> Option<Arc<Package>> {
        let packages = self.packages.lock();
        Self::search_loaded(&packages, name, guid)
    }

    fn search_loaded(
        packages: &[Arc<Package>],
        name: &str,
        guid: Option<Guid>,
    ) -> Option<Arc<Package>> {
        let by_name = |p: &&Arc<Package>| p.name().eq_ignore_ascii_case(name);
        if let Some(guid) = guid.filter(|g| !g.is_zero()) {
            if let Some(hit) = packages
                .iter()
                .find(|p| by_name(p) && p.guid() == guid)
            {
                return Some(hit.clone());
            }
        }
        packages.iter().find(by_name).cloned()
    }

    /// Find a package by name, opening it if necessary.
    ///
    /// Resolution order: already-open instance, composite map entry (with
    /// sub-extraction), mapper name index, exact directory-cache match,
    /// then masked family match (`Name`, `Name_2`, …). A name that fails
    /// everything is memoized so the next identical lookup is an O(1)
    /// negative.
    pub fn find_or_open(self: &Arc<Self>, name: &str, guid: Option<Guid>) -> Option<Arc<Package>> {
        let key = name.to_ascii_lowercase();
        if self.missing_packages.lock().contains(&key) {
            return None;
        }

        // Held across the whole search-else-open sequence.
        let mut packages = self.packages.lock();

        if let Some(open) = Self::search_loaded(&packages, name, guid) {
            return Some(open);
        }

        if let Some(entry) = self.composite_entry(name) {
            match self.open_composite(&entry) {
                Ok(package) => {
                    packages.push(package.clone());
                    return Some(package);
                }
                Err(err) => {
                    warn!(package = name, error = %err, "composite extraction failed");
                }
            }
        }

        if let Some(relative) = self.name_map.read().get(&key).cloned() {
            let path = self.config.content_root.join(relative);
            match Package::open(&path, self) {
                Ok(package) => {
                    packages.push(package.clone());
                    return Some(package);
                }
                Err(err) => {
                    warn!(package = name, path = %path.display(), error = %err, "mapper index path failed to open");
                }
            }
        }

        if let Some(dir_cache) = self.ensure_dir_cache() {
            let path = dir_cache.lookup(name).or_else(|| {
                dir_cache
                    .family(name)
                    .into_iter()
                    .map(|(_, path)| path)
                    .next()
            });
            if let Some(path) = path {
                match Package::open(&path, self) {
                    Ok(package) => {
                        packages.push(package.clone());
                        return Some(package);
                    }
                    Err(err) => {
                        warn!(package = name, path = %path.display(), error = %err, "failed to open package");
                    }
                }
            }
        }

        debug!(package = name, "package not found, memoizing");
        self.metrics.resolve_miss();
        self.missing_packages.lock().insert(key);
        None
    }

    fn open_composite(self: &Arc<Self>, entry: &CompositeEntry) -> FormatResult<Arc<Package>> {
        let bytes = CompositeMap::extract(entry, &self.config.content_root)?;
        let name = entry
            .object_path
            .rsplit('.')
            .next()
            .unwrap_or(&entry.object_path);
        Package::from_bytes(name, bytes, self)
    }

    /// Drop the registry's strong reference to a package by name.
    ///
    /// The package itself is destroyed once every borrower's externals list
    /// releases it.
    pub fn release_package(&self, name: &str) -> bool {
        let mut packages = self.packages.lock();
        let before = packages.len();
        packages.retain(|p| !p.name().eq_ignore_ascii_case(name));
        before != packages.len()
    }

    /// Snapshot of the open package list.
    pub fn packages(&self) -> Vec<Arc<Package>> {
        self.packages.lock().clone()
    }

    pub fn package_count(&self) -> usize {
        self.packages.lock().len()
    }

    // ---- missing memo sets -----------------------------------------------

    /// True if `name` has already failed package resolution.
    pub fn is_missing_package(&self, name: &str) -> bool {
        self.missing_packages
            .lock()
            .contains(&name.to_ascii_lowercase())
    }

    /// Memoize a failed class lookup. Returns true on first insertion.
    pub fn note_missing_class(&self, name: &str) -> bool {
        self.missing_classes
            .lock()
            .insert(name.to_ascii_lowercase())
    }

    pub fn is_missing_class(&self, name: &str) -> bool {
        self.missing_classes
            .lock()
            .contains(&name.to_ascii_lowercase())
    }

    // ---- class map -------------------------------------------------------

    /// Register a class object under its bare name.
    pub fn register_class(&self, name: &str, object: SharedObject) {
        self.class_map.insert(name.to_ascii_lowercase(), object);
    }

    /// Class object by bare name, case-insensitive.
    pub fn get_class(&self, name: &str) -> Option<SharedObject> {
        self.class_map
            .get(&name.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
    }

    pub fn class_count(&self) -> usize {
        self.class_map.len()
    }

    // ---- composite map ---------------------------------------------------

    /// Install the composite package map.
    pub fn set_composite_map(&self, map: CompositeMap) {
        *self.composite.write() = map;
    }

    /// Decode and install an obfuscated composite mapper file.
    pub fn load_composite_mapper(&self, path: &Path) -> FormatResult<()> {
        let data = std::fs::read(path).map_err(|source| FormatError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let map = CompositeMap::from_mapper(&data)
            .map_err(|e| FormatError::Corrupt(format!("composite mapper: {}", e)))?;
        self.set_composite_map(map);
        Ok(())
    }

    pub fn composite_entry(&self, name: &str) -> Option<CompositeEntry> {
        self.composite.read().get(name).cloned()
    }

    // ---- mapper indices --------------------------------------------------

    /// Install the package-name → relative-path index.
    pub fn set_name_map(&self, map: HashMap<String, String>) {
        *self.name_map.write() = map;
    }

    /// Decode and install an obfuscated package mapper file.
    pub fn load_package_mapper(&self, path: &Path) -> FormatResult<()> {
        let data = std::fs::read(path).map_err(|source| FormatError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let map = crate::mapper::parse_package_map(&data)
            .map_err(|e| FormatError::Corrupt(format!("package mapper: {}", e)))?;
        self.set_name_map(map);
        Ok(())
    }

    /// Install the object redirector map.
    pub fn set_redirect_map(&self, map: HashMap<String, String>) {
        *self.redirect_map.write() = map;
    }

    /// Decode and install an obfuscated redirector mapper file.
    pub fn load_redirect_mapper(&self, path: &Path) -> FormatResult<()> {
        let data = std::fs::read(path).map_err(|source| FormatError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let map = crate::mapper::parse_redirect_map(&data)
            .map_err(|e| FormatError::Corrupt(format!("redirector mapper: {}", e)))?;
        self.set_redirect_map(map);
        Ok(())
    }

    /// Redirect target for a full `Package.Object.Path`, if one is mapped.
    pub fn redirect_for(&self, full_path: &str) -> Option<String> {
        self.redirect_map
            .read()
            .get(&full_path.to_ascii_lowercase())
            .cloned()
    }

    // ---- directory cache -------------------------------------------------

    /// The directory cache, built (or loaded from disk) on first use.
    pub fn ensure_dir_cache(&self) -> Option<Arc<DirectoryCache>> {
        let mut slot = self.dir_cache.lock();
        if let Some(cache) = slot.as_ref() {
            return Some(cache.clone());
        }
        match DirectoryCache::load_or_scan(&self.config.content_root, &self.config.dir_cache_file())
        {
            Ok(cache) => {
                let cache = Arc::new(cache);
                *slot = Some(cache.clone());
                Some(cache)
            }
            Err(err) => {
                warn!(
                    root = %self.config.content_root.display(),
                    error = %err,
                    "failed to build directory cache"
                );
                None
            }
        }
    }

    /// Force a fresh content-root scan, replacing any cached listing.
    pub fn refresh_dir_cache(&self) -> FormatResult<Arc<DirectoryCache>> {
        let cache = DirectoryCache::scan(&self.config.content_root)?;
        cache.save(&self.config.dir_cache_file())?;
        let cache = Arc::new(cache);
        *self.dir_cache.lock() = Some(cache.clone());
        // New content may satisfy previously missing names.
        self.missing_packages.lock().clear();
        Ok(cache)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("packages", &self.package_count())
            .field("classes", &self.class_count())
            .field("content_root", &self.config.content_root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_registry() -> (Arc<Registry>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            content_root: dir.path().to_path_buf(),
            cache_dir: dir.path().join("cache"),
            ..EngineConfig::default()
        };
        (Registry::new(config), dir)
    }

    #[test]
    fn test_version_pinning() {
        let (registry, _dir) = test_registry();
        assert!(registry.check_version(610).is_ok());
        registry.pin_version(610);
        assert!(registry.check_version(610).is_ok());
        let err = registry.check_version(620).unwrap_err();
        assert!(matches!(err, FormatError::VersionMismatch { .. }));
    }

    #[test]
    fn test_missing_package_memo() {
        let (registry, _dir) = test_registry();
        assert!(!registry.is_missing_package("Ghost"));
        assert!(registry.find_or_open("Ghost", None).is_none());
        assert!(registry.is_missing_package("ghost"));
        assert_eq!(registry.metrics().snapshot().resolve_misses, 1);

        // Second miss is memoized: the counter does not move.
        assert!(registry.find_or_open("Ghost", None).is_none());
        assert_eq!(registry.metrics().snapshot().resolve_misses, 1);
    }

    #[test]
    fn test_missing_class_memo() {
        let (registry, _dir) = test_registry();
        assert!(registry.note_missing_class("FooClass"));
        assert!(!registry.note_missing_class("fooclass"));
        assert!(registry.is_missing_class("FOOCLASS"));
    }

    #[test]
    fn test_refresh_clears_missing_memo() {
        let (registry, _dir) = test_registry();
        assert!(registry.find_or_open("Ghost", None).is_none());
        assert!(registry.is_missing_package("Ghost"));
        registry.refresh_dir_cache().unwrap();
        assert!(!registry.is_missing_package("Ghost"));
    }
}
