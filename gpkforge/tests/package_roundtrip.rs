//! Open/load/save behavior of standalone packages.

mod common;

use std::sync::Arc;

use gpkforge::codec::CompressionFlags;
use gpkforge::properties::{find_property, PropertyValue};
use gpkforge::{
    save_package, EngineConfig, LoadOutcome, Package, PackageIndex, Registry, SaveOptions,
};
use tempfile::TempDir;

use common::sample_package;

fn registry_in(dir: &TempDir) -> Arc<Registry> {
    Registry::new(EngineConfig {
        content_root: dir.path().to_path_buf(),
        cache_dir: dir.path().join("cache"),
        ..EngineConfig::default()
    })
}

#[test]
fn clean_save_is_byte_exact() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("RoundTrip");
    let path = dir.path().join("RoundTrip.gpk");
    std::fs::write(&path, &bytes).unwrap();

    let registry = registry_in(&dir);
    let package = registry.open_package_file(&path).unwrap();
    package.load().unwrap();

    let saved = save_package(&package, &SaveOptions::default()).unwrap();
    assert_eq!(saved, bytes);
}

#[test]
fn clean_save_of_compressed_source_is_byte_exact() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("RoundTrip");
    let stored = gpkforge::compress::compress_image(&bytes, 1024, false).unwrap();
    let path = dir.path().join("RoundTrip.gpk");
    std::fs::write(&path, &stored).unwrap();

    let registry = registry_in(&dir);
    let package = registry.open_package_file(&path).unwrap();
    package.load().unwrap();
    assert_eq!(package.source_compression(), CompressionFlags::ZLIB);
    // The logical image matches the uncompressed original.
    assert_eq!(package.image().as_ref(), bytes.as_slice());

    let saved = save_package(&package, &SaveOptions::compressed()).unwrap();
    assert_eq!(saved, stored);
}

#[test]
fn outer_links_connect_group_and_children() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("Links");
    let registry = registry_in(&dir);
    let package = Package::from_bytes("Links", bytes.into(), &registry).unwrap();
    package.load().unwrap();
    let tables = package.tables().unwrap();

    // Export 2 is the Props group; exports 3 and 4 are its children.
    let group = PackageIndex(2);
    let children = tables.links.children(group);
    assert_eq!(children, &[PackageIndex(3), PackageIndex(4)]);

    // The child's resolved outer object is the identical group instance.
    let door_outer = tables.exports[2].outer_index;
    assert_eq!(door_outer, group);
    let group_object = package.export_object(group).unwrap();
    let same = package.get_object(door_outer).unwrap().unwrap();
    assert!(Arc::ptr_eq(&group_object, &same));
}

#[test]
fn get_object_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("Idem");
    let registry = registry_in(&dir);
    let package = Package::from_bytes("Idem", bytes.into(), &registry).unwrap();
    package.load().unwrap();

    let first = package.get_object(PackageIndex(3)).unwrap().unwrap();
    let second = package.get_object(PackageIndex(3)).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.index().is_export());
    assert_eq!(PackageIndex(3).export(), Some(2));
}

#[test]
fn lazy_load_reads_payload_once() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("Lazy");
    let registry = registry_in(&dir);
    let package = Package::from_bytes("Lazy", bytes.into(), &registry).unwrap();
    package.load().unwrap();

    let door = package.get_object(PackageIndex(3)).unwrap().unwrap();
    assert_eq!(door.name(), "Door");
    assert_eq!(door.class_name(), "PropClass");
    // Placeholder construction read no payload.
    assert_eq!(door.deserialize_count(), 0);
    assert!(door.properties().is_none());

    assert_eq!(door.load().unwrap(), LoadOutcome::Loaded);
    assert_eq!(door.load().unwrap(), LoadOutcome::AlreadyLoaded);
    assert_eq!(door.deserialize_count(), 1);

    let tables = package.tables().unwrap();
    let properties = door.properties().unwrap();
    let health = find_property(&properties, &tables.names, "Health").unwrap();
    assert_eq!(health.value, PropertyValue::Int(75));
}

#[test]
fn concurrent_loads_deserialize_exactly_once() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("Race");
    let registry = registry_in(&dir);
    let package = Package::from_bytes("Race", bytes.into(), &registry).unwrap();
    package.load().unwrap();
    let door = package.get_object(PackageIndex(3)).unwrap().unwrap();

    let threads: Vec<_> = (0..16)
        .map(|_| {
            let door = door.clone();
            std::thread::spawn(move || {
                door.load().unwrap();
                door.wait_loaded()
            })
        })
        .collect();
    for thread in threads {
        assert!(thread.join().unwrap());
    }
    assert_eq!(door.deserialize_count(), 1);
}

#[test]
fn async_load_is_joinable() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("Async");
    let registry = registry_in(&dir);
    let package = Package::from_bytes("Async", bytes.into(), &registry).unwrap();

    let task = package.load_object_async(PackageIndex(4));
    let window = task.join().unwrap();
    assert_eq!(window.name(), "Window");
    assert!(window.is_loaded());
}

#[test]
fn cancellation_leaves_package_not_loaded() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("Cancel");
    let registry = registry_in(&dir);
    let package = Package::from_bytes("Cancel", bytes.into(), &registry).unwrap();

    package.cancel_flag().cancel();
    let err = package.load().unwrap_err();
    assert!(matches!(err, gpkforge::FormatError::Cancelled));
    assert!(!package.is_loaded());
    assert!(package.tables().is_err());
}

#[test]
fn object_paths_and_lookup() {
    let dir = TempDir::new().unwrap();
    let (_, bytes) = sample_package("Paths");
    let registry = registry_in(&dir);
    let package = Package::from_bytes("Paths", bytes.into(), &registry).unwrap();
    package.load().unwrap();

    assert_eq!(package.object_path(PackageIndex(3)).unwrap(), "Props.Door");
    assert_eq!(
        package.find_export_by_path("props.door"),
        Some(PackageIndex(3))
    );
    assert_eq!(package.find_export_by_path("Props.Missing"), None);
    assert_eq!(package.exports_named("door"), vec![PackageIndex(3)]);
}
