//! Class bootstrap.
//!
//! Before any non-native object can fully load, the configured core
//! packages are opened in order and their class objects instantiated into
//! the registry's class map, which every subsequent `get_class` consults.
//! The first core package pins the engine version; every later package
//! (core or content) must match it exactly.
//!
//! Class instantiation recurses through the super chain with a memo, so a
//! class is created after its parent regardless of table order, and a
//! cyclic super chain is a hard error instead of unbounded recursion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{FormatError, FormatResult};
use crate::index::PackageIndex;
use crate::object::{ClassKind, SharedObject};
use crate::package::Package;
use crate::registry::Registry;

/// Where one class is defined.
struct ClassSite {
    package: Arc<Package>,
    index: PackageIndex,
    display_name: String,
}

/// Open the core packages and populate the registry class map.
///
/// Returns the number of classes registered. Fails fast when a core
/// package is missing, structurally bad, or version-mismatched.
pub fn bootstrap(registry: &Arc<Registry>) -> FormatResult<usize> {
    let core_names = registry.config().core_packages.clone();
    let mut core_packages = Vec::with_capacity(core_names.len());

    for (position, name) in core_names.iter().enumerate() {
        let package =
            registry
                .find_or_open(name, None)
                .ok_or_else(|| FormatError::MissingCorePackage {
                    name: name.clone(),
                })?;
        package.load()?;
        if position == 0 {
            registry.pin_version(package.file_version());
        } else {
            registry.check_version(package.file_version())?;
        }
        core_packages.push(package);
    }

    // Every export with a null class reference is a class definition. The
    // first definition of a name wins, in core package order.
    let mut sites: HashMap<String, ClassSite> = HashMap::new();
    for package in &core_packages {
        let tables = package.tables()?;
        for (slot, entry) in tables.exports.iter().enumerate() {
            if !entry.class_index.is_null() {
                continue;
            }
            let Some(display_name) = tables.names.resolve(entry.object_name) else {
                continue;
            };
            sites
                .entry(display_name.to_ascii_lowercase())
                .or_insert_with(|| ClassSite {
                    package: package.clone(),
                    index: PackageIndex::from_export(slot),
                    display_name,
                });
        }
    }

    let keys: Vec<String> = sites.keys().cloned().collect();
    let mut visiting = HashSet::new();
    let mut registered = 0;
    for key in keys {
        if ensure_class(registry, &sites, &key, &mut visiting)?.is_some() {
            registered += 1;
        }
    }

    info!(
        core_packages = core_packages.len(),
        classes = registered,
        "class bootstrap complete"
    );
    Ok(registered)
}

/// Create (or fetch) the class object for `key`, parents first.
fn ensure_class(
    registry: &Arc<Registry>,
    sites: &HashMap<String, ClassSite>,
    key: &str,
    visiting: &mut HashSet<String>,
) -> FormatResult<Option<SharedObject>> {
    if let Some(existing) = registry.get_class(key) {
        return Ok(Some(existing));
    }
    if registry.is_missing_class(key) {
        return Ok(None);
    }
    let Some(site) = sites.get(key) else {
        registry.note_missing_class(key);
        warn!(class = key, "class not defined by any core package");
        return Ok(None);
    };
    if !visiting.insert(key.to_string()) {
        return Err(FormatError::Corrupt(format!(
            "cyclic class super chain through {}",
            site.display_name
        )));
    }

    let object = site.package.export_object(site.index)?;
    object.load()?;

    // Parent before property linking; a class without a super roots the
    // chain.
    let super_key = super_class_name(&site.package, site.index)?;
    let super_object = match &super_key {
        Some(name) => ensure_class(registry, sites, &name.to_ascii_lowercase(), visiting)?,
        None => None,
    };

    link_property_chain(&site.package, &object, super_object.as_ref())?;
    registry.register_class(&site.display_name, object.clone());
    debug!(
        class = %site.display_name,
        super_class = super_key.as_deref().unwrap_or("-"),
        "registered class"
    );

    load_class_default_object(&site.package, &site.display_name);

    visiting.remove(key);
    Ok(Some(object))
}

/// Bare name of the super class referenced by an export, if any.
fn super_class_name(
    package: &Arc<Package>,
    index: PackageIndex,
) -> FormatResult<Option<String>> {
    let tables = package.tables()?;
    let slot = index.export().ok_or_else(|| {
        FormatError::Corrupt("class site must be an export".into())
    })?;
    let super_index = tables.exports[slot].super_index;
    if super_index.is_null() {
        return Ok(None);
    }
    let name_ref = if let Some(super_slot) = super_index.export() {
        tables
            .exports
            .get(super_slot)
            .map(|e| e.object_name)
    } else {
        super_index
            .import()
            .and_then(|super_slot| tables.imports.get(super_slot))
            .map(|e| e.object_name)
    };
    Ok(name_ref.and_then(|n| tables.names.resolve(n)))
}

/// Build the flattened property chain: super chain fields, then own fields.
fn link_property_chain(
    package: &Arc<Package>,
    object: &SharedObject,
    super_object: Option<&SharedObject>,
) -> FormatResult<()> {
    let tables = package.tables()?;
    let own: Vec<String> = object.with_kind(|kind| {
        kind.as_any()
            .downcast_ref::<ClassKind>()
            .map(|class| {
                class
                    .property_names
                    .iter()
                    .filter_map(|n| tables.names.resolve(*n))
                    .collect()
            })
            .unwrap_or_default()
    });
    let inherited: Vec<String> = super_object
        .map(|parent| {
            parent.with_kind(|kind| {
                kind.as_any()
                    .downcast_ref::<ClassKind>()
                    .map(|class| class.linked.clone())
                    .unwrap_or_default()
            })
        })
        .unwrap_or_default();

    object.with_kind_mut(|kind| {
        if let Some(class) = kind.as_any_mut().downcast_mut::<ClassKind>() {
            class.linked = inherited.into_iter().chain(own).collect();
        }
    });
    Ok(())
}

/// Load the class default object alongside its class, when present.
fn load_class_default_object(package: &Arc<Package>, class_name: &str) {
    let cdo_name = format!("Default__{}", class_name);
    for index in package.exports_named(&cdo_name) {
        match package.export_object(index) {
            Ok(cdo) => {
                if let Err(err) = cdo.load() {
                    warn!(object = %cdo_name, error = %err, "class default object failed to load");
                }
                break;
            }
            Err(err) => {
                warn!(object = %cdo_name, error = %err, "class default object unavailable");
            }
        }
    }
}
