//! Cross-package reference resolution.
//!
//! An import entry names an object that lives in some other package. The
//! resolver locates that package (already-open instance, composite map,
//! directory cache exact match, then masked family match), opens it through
//! the normal pipeline — reentrantly, since that package's own loads may
//! resolve further imports — and walks the import's outer chain inside it.
//!
//! Failures here are soft: the reference resolves to `None`, a warning is
//! logged, and the registry memoizes the miss. Structural errors inside a
//! target package are demoted to warnings on this path; they surface as
//! hard errors only when that package is opened directly.
//!
//! Forced exports take a second, distinct path: the export is a
//! cooker-inserted duplicate, and its real owner is found by scanning the
//! owning package's numbered family for a matching net-index/name/class
//! triple, GUID-matched candidates first.

pub mod composite;
pub mod dircache;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::index::PackageIndex;
use crate::object::{RedirectorKind, SharedObject};
use crate::package::Package;
use crate::registry::Registry;

/// Resolve an import entry to a live object in its defining package.
///
/// On success the resolved object is cached on `package` and the target
/// package is retained for the lifetime of `package`.
pub fn resolve_import(package: &Arc<Package>, index: PackageIndex) -> Option<SharedObject> {
    let registry = package.registry()?;
    let tables = package.tables().ok()?;
    let slot = index.import()?;
    tables.imports.get(slot)?;

    // Walk to the root import; its object name is the package name and the
    // segments below it form the object path inside that package.
    let mut chain = vec![slot];
    let mut cursor = tables.imports[slot].outer_index;
    while let Some(outer_slot) = cursor.import() {
        chain.push(outer_slot);
        cursor = tables.imports[outer_slot].outer_index;
    }
    if !cursor.is_null() {
        warn!(
            package = package.name(),
            index = %index,
            "import outer chain leaves the import table"
        );
        return None;
    }

    let root_slot = *chain.last().expect("chain starts non-empty");
    let package_name = tables
        .names
        .resolve(tables.imports[root_slot].object_name)?;

    if registry.is_missing_package(&package_name) {
        return None;
    }
    let target = match registry.find_or_open(&package_name, None) {
        Some(target) => target,
        None => {
            warn!(
                package = package.name(),
                import = %index,
                target = %package_name,
                "import target package not found"
            );
            return None;
        }
    };
    if let Err(err) = target.load() {
        warn!(target = %package_name, error = %err, "import target failed to load");
        return None;
    }

    // Path inside the target: every chain segment below the root.
    let mut segments = Vec::with_capacity(chain.len() - 1);
    for &seg_slot in chain[..chain.len() - 1].iter().rev() {
        segments.push(tables.names.resolve(tables.imports[seg_slot].object_name)?);
    }
    if segments.is_empty() {
        // The import names the package itself; nothing object-shaped to
        // hand back, but the open was still useful to the caller.
        debug!(target = %package_name, "package-level import");
        return None;
    }
    let path = segments.join(".");

    let (target, found) = match target.find_export_by_path(&path) {
        Some(found) => (target, found),
        None => {
            // The mapper redirector index may know where the object moved.
            let full = format!("{}.{}", package_name, path);
            match resolve_via_redirect_map(&registry, &target, &full) {
                Some(hit) => hit,
                None => {
                    warn!(
                        target = %package_name,
                        path = %path,
                        "import path not found in target package"
                    );
                    registry.metrics().resolve_miss();
                    return None;
                }
            }
        }
    };
    let mut object = target.export_object(found).ok()?;

    // Class sanity: a mismatch is suspicious but not fatal.
    let expected_class = tables.names.resolve(tables.imports[slot].class_name)?;
    if !object.class_name().eq_ignore_ascii_case(&expected_class)
        && !object.class_name().eq_ignore_ascii_case("ObjectRedirector")
    {
        warn!(
            object = object.name(),
            expected = %expected_class,
            actual = object.class_name(),
            "import class mismatch"
        );
    }

    // A redirector stub is followed exactly once, never chained.
    if object.class_name().eq_ignore_ascii_case("ObjectRedirector") {
        if let Some(redirected) = follow_redirector(&target, &object) {
            object = redirected;
        }
    }

    package.cache_import(index, object.clone());
    package.retain_external(target);
    Some(object)
}

/// Chase one redirector-map entry: `Package.Rest` to a (possibly other)
/// package and an export path inside it.
fn resolve_via_redirect_map(
    registry: &Arc<Registry>,
    current: &Arc<Package>,
    full_path: &str,
) -> Option<(Arc<Package>, PackageIndex)> {
    let redirected = registry.redirect_for(full_path)?;
    let (package_name, rest) = redirected.split_once('.')?;
    debug!(from = full_path, to = %redirected, "following redirector map entry");

    let target = if current.name().eq_ignore_ascii_case(package_name) {
        current.clone()
    } else {
        let other = registry.find_or_open(package_name, None)?;
        other.load().ok()?;
        other
    };
    let found = target.find_export_by_path(rest)?;
    Some((target, found))
}

fn follow_redirector(target: &Arc<Package>, stub: &SharedObject) -> Option<SharedObject> {
    if stub.load().is_err() {
        return None;
    }
    let redirect = stub.with_kind(|kind| {
        kind.as_any()
            .downcast_ref::<RedirectorKind>()
            .map(|r| r.target)
    })?;
    if !redirect.is_export() {
        // Redirects out of the package would chain resolutions; refuse.
        warn!(stub = stub.name(), "redirector does not target a local export");
        return None;
    }
    debug!(stub = stub.name(), target = %redirect, "following object redirector");
    target.export_object(redirect).ok()
}

/// Resolve a forced export to its real owner in a sibling package variant.
///
/// Candidates are the numbered family members of the owning package name.
/// GUID-matched candidates are tried strictly before name-only matches;
/// within a tier the lowest family suffix wins. The match key is the
/// net-index/name/class triple.
pub fn resolve_forced_export(
    package: &Arc<Package>,
    index: PackageIndex,
) -> Option<SharedObject> {
    let registry = package.registry()?;
    let tables = package.tables().ok()?;
    let slot = index.export()?;
    let entry = tables.exports.get(slot)?.clone();
    if !entry.is_forced() {
        return None;
    }
    if let Some(cached) = package.cached_forced(index) {
        return Some(cached);
    }

    // The root outer names the package that truly owns the object.
    let mut root_slot = slot;
    let mut cursor = entry.outer_index;
    while let Some(outer_slot) = cursor.export() {
        root_slot = outer_slot;
        cursor = tables.exports[outer_slot].outer_index;
    }
    let owner_name = tables
        .names
        .resolve(tables.exports[root_slot].object_name)?;
    let object_name = tables.names.resolve(entry.object_name)?;
    let class_name = package.class_name_of(entry.class_index).ok()?;

    let dir_cache = registry.ensure_dir_cache()?;
    let family = dir_cache.family(&owner_name);
    if family.is_empty() {
        warn!(
            owner = %owner_name,
            object = %object_name,
            "no family candidates for forced export"
        );
        registry.metrics().resolve_miss();
        return None;
    }

    let mut candidates = Vec::with_capacity(family.len());
    for (_, path) in family {
        match registry.open_package_file(&path) {
            Ok(candidate) => candidates.push(candidate),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable family member");
            }
        }
    }
    // GUID tier first, then everything else in family order.
    candidates.sort_by_key(|c| {
        if !entry.package_guid.is_zero() && c.guid() == entry.package_guid {
            0
        } else {
            1
        }
    });

    for candidate in candidates {
        if Arc::ptr_eq(&candidate, package) {
            continue;
        }
        if candidate.load().is_err() {
            continue;
        }
        let Some(found) = find_matching_export(&candidate, entry.net_index, &object_name, &class_name)
        else {
            continue;
        };
        let object = candidate.export_object(found).ok()?;
        debug!(
            object = %object_name,
            owner = candidate.name(),
            "resolved forced export"
        );
        package.cache_forced(index, object.clone());
        package.retain_external(candidate);
        return Some(object);
    }

    warn!(
        object = %object_name,
        owner = %owner_name,
        "forced export did not resolve in any family member"
    );
    registry.metrics().resolve_miss();
    None
}

/// Find an export matching the net-index/name/class triple.
fn find_matching_export(
    package: &Arc<Package>,
    net_index: u32,
    object_name: &str,
    class_name: &str,
) -> Option<PackageIndex> {
    let tables = package.tables().ok()?;
    for index in package.exports_named(object_name) {
        let slot = index.export()?;
        let entry = &tables.exports[slot];
        if entry.is_forced() || entry.net_index != net_index {
            continue;
        }
        let name = tables.names.resolve(entry.object_name)?;
        if !name.eq_ignore_ascii_case(object_name) {
            continue;
        }
        let class = package.class_name_of(entry.class_index).ok()?;
        if class.eq_ignore_ascii_case(class_name) {
            return Some(index);
        }
    }
    None
}
