//! Package lifecycle: open, lazy table load, object access.
//!
//! A [`Package`] is created by `open` (summary decode plus decompression
//! only), populated by `load` (table reads, link pass), and dropped when the
//! last strong reference goes away — the registry holds one, and every
//! package that borrowed objects out of this one retains another through its
//! externals list.
//!
//! Object access follows the lazy protocol of the object module: `get_object`
//! constructs and caches placeholders without touching payloads; payloads
//! are read on `LiveObject::load`, which may recurse through the resolver
//! into other packages.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::codec::{CompressionFlags, Guid, PackageSummary};
use crate::compress;
use crate::error::{FormatError, FormatResult};
use crate::index::PackageIndex;
use crate::names::{NameRef, NameTable};
use crate::object::{GenericKind, LiveObject, SerialContext, SharedObject};
use crate::properties::read_properties;
use crate::registry::Registry;
use crate::resolver;
use crate::tables::{
    link_tables, read_exports, read_imports, DependsTable, ExportEntry, ImportEntry, TableLinks,
};
use crate::task::{CancelFlag, LoadTask};

/// Fully read resource tables plus the link structures built over them.
pub struct PackageTables {
    pub names: NameTable,
    pub imports: Vec<ImportEntry>,
    pub exports: Vec<ExportEntry>,
    pub depends: DependsTable,
    pub links: TableLinks,
}

/// One binary asset container.
pub struct Package {
    name: String,
    source_path: Option<PathBuf>,
    registry: Weak<Registry>,

    /// Stored bytes exactly as on disk (or as sliced out of a container).
    raw: Bytes,
    /// Logical decompressed image; equals `raw` for uncompressed sources.
    image: Bytes,
    /// Summary in logical form (no compression bits, no chunk table).
    summary: PackageSummary,
    source_compression: CompressionFlags,

    tables: OnceLock<PackageTables>,
    load_lock: Mutex<()>,

    export_objects: RwLock<HashMap<i32, SharedObject>>,
    import_objects: RwLock<HashMap<i32, SharedObject>>,
    /// Forced exports resolved to their real owners, keyed by export index.
    forced_objects: RwLock<HashMap<i32, SharedObject>>,
    /// Packages this one borrowed objects from, kept alive for as long as
    /// this package (and therefore any borrower of those objects) lives.
    externals: Mutex<Vec<Arc<Package>>>,

    cancel: CancelFlag,
}

impl Package {
    /// Open a package file: summary decode and decompression only.
    pub fn open(path: impl AsRef<Path>, registry: &Arc<Registry>) -> FormatResult<Arc<Package>> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| FormatError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes_inner(name, Bytes::from(bytes), Some(path.to_path_buf()), registry)
    }

    /// Open a package from in-memory bytes (composite slices, tests).
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: Bytes,
        registry: &Arc<Registry>,
    ) -> FormatResult<Arc<Package>> {
        Self::from_bytes_inner(name.into(), bytes, None, registry)
    }

    fn from_bytes_inner(
        name: String,
        raw: Bytes,
        source_path: Option<PathBuf>,
        registry: &Arc<Registry>,
    ) -> FormatResult<Arc<Package>> {
        let summary = PackageSummary::read(&mut Cursor::new(raw.as_ref()))?;
        registry.check_version(summary.file_version)?;
        compress::check_supported(summary.compression)?;

        let source_compression = summary.compression;
        let (image, summary) = if summary.is_compressed() {
            let image = compress::decompress_image(
                raw.as_ref(),
                &summary,
                registry.config().parallel_codec,
            )?;
            registry.metrics().add_bytes_decompressed(image.len() as u64);
            (Bytes::from(image), summary.logical())
        } else {
            (raw.clone(), summary)
        };

        registry.metrics().package_opened();
        info!(
            package = %name,
            version = summary.file_version,
            exports = summary.export_count,
            imports = summary.import_count,
            compressed = !source_compression.is_empty(),
            "opened package"
        );

        Ok(Arc::new(Package {
            name,
            source_path,
            registry: Arc::downgrade(registry),
            raw,
            image,
            summary,
            source_compression,
            tables: OnceLock::new(),
            load_lock: Mutex::new(()),
            export_objects: RwLock::new(HashMap::new()),
            import_objects: RwLock::new(HashMap::new()),
            forced_objects: RwLock::new(HashMap::new()),
            externals: Mutex::new(Vec::new()),
            cancel: CancelFlag::new(),
        }))
    }

    /// Read and link the resource tables.
    ///
    /// Idempotent: repeat calls (including concurrent ones) return once the
    /// tables are present. Cancellation discards partial tables and leaves
    /// the package not loaded.
    pub fn load(&self) -> FormatResult<()> {
        if self.tables.get().is_some() {
            return Ok(());
        }
        let _guard = self.load_lock.lock();
        if self.tables.get().is_some() {
            return Ok(());
        }
        let tables = self.read_tables()?;
        let _ = self.tables.set(tables);
        Ok(())
    }

    fn read_tables(&self) -> FormatResult<PackageTables> {
        let image = self.image.as_ref();
        let mut cursor = Cursor::new(image);

        cursor.set_position(self.summary.name_offset as u64);
        let names = NameTable::read(&mut cursor, self.summary.name_count)?;
        self.cancel.check()?;

        cursor.set_position(self.summary.import_offset as u64);
        let imports = read_imports(&mut cursor, self.summary.import_count, &self.cancel)?;

        cursor.set_position(self.summary.export_offset as u64);
        let exports = read_exports(&mut cursor, self.summary.export_count, &self.cancel)?;

        let depends = if self.summary.depends_count > 0 {
            cursor.set_position(self.summary.depends_offset as u64);
            DependsTable::read(&mut cursor, self.summary.depends_count, &self.cancel)?
        } else {
            DependsTable::default()
        };

        let links = link_tables(&exports, &imports, &names)?;
        debug!(
            package = %self.name,
            names = names.len(),
            exports = exports.len(),
            imports = imports.len(),
            "loaded package tables"
        );
        Ok(PackageTables {
            names,
            imports,
            exports,
            depends,
            links,
        })
    }

    /// True once the tables are populated.
    pub fn is_loaded(&self) -> bool {
        self.tables.get().is_some()
    }

    /// Borrow the tables, failing if `load` has not completed.
    pub fn tables(&self) -> FormatResult<&PackageTables> {
        self.tables.get().ok_or_else(|| FormatError::NotLoaded {
            name: self.name.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn summary(&self) -> &PackageSummary {
        &self.summary
    }

    pub fn guid(&self) -> Guid {
        self.summary.guid
    }

    pub fn file_version(&self) -> u16 {
        self.summary.file_version
    }

    /// Compression of the stored source bytes.
    pub fn source_compression(&self) -> CompressionFlags {
        self.source_compression
    }

    /// Stored bytes exactly as read from disk.
    pub fn raw_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Logical decompressed image.
    pub fn image(&self) -> &Bytes {
        &self.image
    }

    /// Cooperative cancellation flag polled by table scans.
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub(crate) fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    /// Render a [`NameRef`] against this package's name table.
    pub fn name_of(&self, name: NameRef) -> Option<String> {
        self.tables.get().and_then(|t| t.names.resolve(name))
    }

    /// Bare class name of the entry referenced by `index`.
    ///
    /// A null class reference means the entry is itself a class.
    pub fn class_name_of(&self, index: PackageIndex) -> FormatResult<String> {
        let tables = self.tables()?;
        let name_ref = if let Some(slot) = index.export() {
            tables
                .exports
                .get(slot)
                .ok_or(FormatError::IndexOutOfRange {
                    index: index.0,
                    exports: tables.exports.len(),
                    imports: tables.imports.len(),
                })?
                .object_name
        } else if let Some(slot) = index.import() {
            tables
                .imports
                .get(slot)
                .ok_or(FormatError::IndexOutOfRange {
                    index: index.0,
                    exports: tables.exports.len(),
                    imports: tables.imports.len(),
                })?
                .object_name
        } else {
            return Ok("Class".to_string());
        };
        tables
            .names
            .resolve(name_ref)
            .ok_or_else(|| FormatError::Corrupt("class name outside name table".into()))
    }

    /// Dotted object path from its root outer down to the entry itself.
    pub fn object_path(&self, index: PackageIndex) -> FormatResult<String> {
        let tables = self.tables()?;
        let mut segments = Vec::new();
        let mut cursor = index;
        // Chains were validated acyclic at link time; the starting index is
        // caller-supplied and still needs a range check.
        while !cursor.is_null() {
            let out_of_range = || FormatError::IndexOutOfRange {
                index: cursor.0,
                exports: tables.exports.len(),
                imports: tables.imports.len(),
            };
            let (name, outer) = if let Some(slot) = cursor.export() {
                let entry = tables.exports.get(slot).ok_or_else(out_of_range)?;
                (entry.object_name, entry.outer_index)
            } else if let Some(slot) = cursor.import() {
                let entry = tables.imports.get(slot).ok_or_else(out_of_range)?;
                (entry.object_name, entry.outer_index)
            } else {
                break;
            };
            segments.push(
                tables
                    .names
                    .resolve(name)
                    .ok_or_else(|| FormatError::Corrupt("object name outside name table".into()))?,
            );
            cursor = outer;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    /// Find an export by dotted path, case-insensitively.
    pub fn find_export_by_path(&self, path: &str) -> Option<PackageIndex> {
        let tables = self.tables.get()?;
        let mut segments = path.split('.');
        let first = segments.next()?;

        let mut current = *tables.links.export_roots.iter().find(|&&idx| {
            self.entry_name_matches(tables, idx, first)
        })?;

        for segment in segments {
            current = *tables
                .links
                .children(current)
                .iter()
                .find(|&&idx| idx.is_export() && self.entry_name_matches(tables, idx, segment))?;
        }
        Some(current)
    }

    fn entry_name_matches(&self, tables: &PackageTables, index: PackageIndex, name: &str) -> bool {
        index
            .export()
            .and_then(|slot| tables.exports.get(slot))
            .and_then(|e| tables.names.resolve(e.object_name))
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }

    /// Exports whose bare name matches, in table order.
    pub fn exports_named(&self, name: &str) -> Vec<PackageIndex> {
        self.tables
            .get()
            .and_then(|t| t.links.exports_by_name.get(&name.to_ascii_lowercase()).cloned())
            .unwrap_or_default()
    }

    /// Return the live object for `index`, constructing a placeholder on
    /// first access. Import references go through the cross-package
    /// resolver and resolve to `None` on failure (memoized by the registry).
    pub fn get_object(self: &Arc<Self>, index: PackageIndex) -> FormatResult<Option<SharedObject>> {
        if index.is_null() {
            return Ok(None);
        }
        if index.is_export() {
            return Ok(Some(self.export_object(index)?));
        }

        if let Some(cached) = self.import_objects.read().get(&index.0) {
            if let Some(registry) = self.registry() {
                registry.metrics().import_cache_hit();
            }
            return Ok(Some(cached.clone()));
        }
        self.tables()?;
        Ok(resolver::resolve_import(self, index))
    }

    /// Live object for an export index, constructed lazily.
    pub fn export_object(self: &Arc<Self>, index: PackageIndex) -> FormatResult<SharedObject> {
        let tables = self.tables()?;
        let slot = index.export().ok_or(FormatError::IndexOutOfRange {
            index: index.0,
            exports: tables.exports.len(),
            imports: tables.imports.len(),
        })?;
        let entry = tables.exports.get(slot).ok_or(FormatError::IndexOutOfRange {
            index: index.0,
            exports: tables.exports.len(),
            imports: tables.imports.len(),
        })?;

        if let Some(cached) = self.export_objects.read().get(&index.0) {
            return Ok(cached.clone());
        }

        let name = tables
            .names
            .resolve(entry.object_name)
            .ok_or_else(|| FormatError::Corrupt("export name outside name table".into()))?;
        let class_name = self.class_name_of(entry.class_index)?;
        let kind = match self.registry() {
            Some(registry) => registry.factory().create(&class_name),
            None => Box::<GenericKind>::default(),
        };
        let object = LiveObject::new(
            Arc::downgrade(self),
            index,
            name,
            class_name,
            kind,
        );

        // Double-checked under the write lock: first construction wins, so
        // the singleton-per-index invariant holds under races.
        let mut cache = self.export_objects.write();
        Ok(cache.entry(index.0).or_insert(object).clone())
    }

    /// Cache a resolved import. Resolver-internal.
    pub(crate) fn cache_import(&self, index: PackageIndex, object: SharedObject) {
        self.import_objects.write().insert(index.0, object);
    }

    /// Cache a resolved forced export. Resolver-internal.
    pub(crate) fn cache_forced(&self, index: PackageIndex, object: SharedObject) {
        self.forced_objects.write().insert(index.0, object);
    }

    /// Cached forced-export resolution, if one happened.
    pub(crate) fn cached_forced(&self, index: PackageIndex) -> Option<SharedObject> {
        self.forced_objects.read().get(&index.0).cloned()
    }

    /// Retain an external package for the lifetime of this one.
    pub(crate) fn retain_external(&self, package: Arc<Package>) {
        let mut externals = self.externals.lock();
        if !externals.iter().any(|p| Arc::ptr_eq(p, &package)) {
            externals.push(package);
        }
    }

    /// Number of retained external packages.
    pub fn external_count(&self) -> usize {
        self.externals.lock().len()
    }

    /// Get and fully load the object at `index`.
    pub fn load_object(
        self: &Arc<Self>,
        index: PackageIndex,
    ) -> FormatResult<Option<SharedObject>> {
        match self.get_object(index)? {
            Some(object) => {
                object.load()?;
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }

    /// Load the object at `index` on a background thread.
    ///
    /// The returned task is joinable and cancellable; cancellation is
    /// cooperative and takes effect at the next poll point.
    pub fn load_object_async(self: &Arc<Self>, index: PackageIndex) -> LoadTask {
        let package = Arc::clone(self);
        let cancel = self.cancel.clone();
        let task_cancel = cancel.clone();
        let handle = thread::spawn(move || -> FormatResult<SharedObject> {
            cancel.check()?;
            package.load()?;
            match package.load_object(index)? {
                Some(object) => Ok(object),
                None => Err(FormatError::Corrupt(format!(
                    "object {} did not resolve",
                    index
                ))),
            }
        });
        LoadTask::new(handle, task_cancel)
    }

    /// Deserialize one export's payload into its live object.
    ///
    /// Called by `LiveObject::load` with the Loading state already claimed.
    pub(crate) fn deserialize_object(self: &Arc<Self>, object: &LiveObject) -> FormatResult<()> {
        self.cancel.check()?;
        let tables = self.tables()?;
        let slot = object
            .index()
            .export()
            .ok_or_else(|| FormatError::Corrupt("imports have no local payload".into()))?;
        let entry = tables
            .exports
            .get(slot)
            .ok_or(FormatError::IndexOutOfRange {
                index: object.index().0,
                exports: tables.exports.len(),
                imports: tables.imports.len(),
            })?
            .clone();

        // The class loads before the payload; a missing class is a soft
        // failure and the object falls back to its constructed kind.
        if !entry.class_index.is_null() {
            if let Some(class_object) = self.get_object(entry.class_index)? {
                class_object.load()?;
            }
        }

        let start = entry.serial_offset as usize;
        let end = start + entry.serial_size as usize;
        let image = self.image.as_ref();
        if end > image.len() {
            return Err(FormatError::Corrupt(format!(
                "payload {}..{} outside image of {} bytes",
                start,
                end,
                image.len()
            )));
        }

        let ctx = SerialContext {
            names: &tables.names,
            image,
            file_version: self.summary.file_version,
        };
        let payload = &image[start..end];
        let mut cursor = Cursor::new(payload);
        let properties = read_properties(&mut cursor, &tables.names)?;
        object.with_kind_mut(|kind| -> FormatResult<()> {
            kind.deserialize(&mut cursor, &ctx)?;
            kind.post_load(&ctx)
        })?;
        object.install_properties(properties);

        if let Some(registry) = self.registry() {
            registry.metrics().object_loaded();
        }
        Ok(())
    }

    /// Indices of exports whose live objects are dirty.
    pub fn dirty_exports(&self) -> Vec<PackageIndex> {
        let mut dirty: Vec<PackageIndex> = self
            .export_objects
            .read()
            .values()
            .filter(|o| o.is_dirty())
            .map(|o| o.index())
            .collect();
        dirty.sort();
        dirty
    }

    /// True if any export object has been modified since load.
    pub fn has_dirty_exports(&self) -> bool {
        self.export_objects.read().values().any(|o| o.is_dirty())
    }

    /// Cached export object, if one was constructed.
    pub fn cached_export(&self, index: PackageIndex) -> Option<SharedObject> {
        self.export_objects.read().get(&index.0).cloned()
    }
}

impl Drop for Package {
    fn drop(&mut self) {
        debug!(package = %self.name, "dropping package");
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("version", &self.summary.file_version)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
