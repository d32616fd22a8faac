//! Shared test fixtures: build small but fully valid package files using
//! the library's own writers.

#![allow(dead_code)]

use gpkforge::codec::{Guid, PackageSummary};
use gpkforge::index::PackageIndex;
use gpkforge::names::{NameRef, NameTable};
use gpkforge::properties::{write_properties, Property};
use gpkforge::tables::{DependsTable, ExportEntry, ExportFlags, ImportEntry};

/// Builds a standalone package image in the on-disk layout:
/// summary, names, imports, exports, depends, payloads.
pub struct PackageBuilder {
    names: NameTable,
    imports: Vec<ImportEntry>,
    exports: Vec<ExportEntry>,
    payloads: Vec<Vec<u8>>,
    folder: String,
    guid: Guid,
}

impl PackageBuilder {
    pub fn new(folder: &str) -> Self {
        Self {
            names: NameTable::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            payloads: Vec::new(),
            folder: folder.to_string(),
            guid: Guid::ZERO,
        }
    }

    pub fn set_guid(&mut self, guid: Guid) {
        self.guid = guid;
    }

    pub fn name_ref(&mut self, text: &str) -> NameRef {
        NameRef::new(self.names.intern(text))
    }

    /// Add an import entry, returning its negative index.
    pub fn add_import(
        &mut self,
        class_package: &str,
        class_name: &str,
        outer: PackageIndex,
        object_name: &str,
    ) -> PackageIndex {
        let entry = ImportEntry {
            class_package: self.name_ref(class_package),
            class_name: self.name_ref(class_name),
            outer_index: outer,
            object_name: self.name_ref(object_name),
        };
        self.imports.push(entry);
        PackageIndex::from_import(self.imports.len() - 1)
    }

    /// Add an export entry with its payload, returning its positive index.
    pub fn add_export(
        &mut self,
        object_name: &str,
        class_index: PackageIndex,
        outer: PackageIndex,
        payload: Vec<u8>,
    ) -> PackageIndex {
        self.add_export_entry(object_name, class_index, outer, payload, |_| {})
    }

    /// Add a forced export carrying a net index and package GUID.
    pub fn add_forced_export(
        &mut self,
        object_name: &str,
        class_index: PackageIndex,
        outer: PackageIndex,
        net_index: u32,
        package_guid: Guid,
    ) -> PackageIndex {
        self.add_export_entry(object_name, class_index, outer, Vec::new(), |entry| {
            entry.export_flags = ExportFlags::FORCED_EXPORT;
            entry.net_index = net_index;
            entry.package_guid = package_guid;
            entry.serial_size = 0;
        })
    }

    /// Add a plain export with an explicit net index (forced-export targets).
    pub fn add_export_with_net_index(
        &mut self,
        object_name: &str,
        class_index: PackageIndex,
        outer: PackageIndex,
        payload: Vec<u8>,
        net_index: u32,
    ) -> PackageIndex {
        self.add_export_entry(object_name, class_index, outer, payload, |entry| {
            entry.net_index = net_index;
        })
    }

    fn add_export_entry(
        &mut self,
        object_name: &str,
        class_index: PackageIndex,
        outer: PackageIndex,
        payload: Vec<u8>,
        tweak: impl FnOnce(&mut ExportEntry),
    ) -> PackageIndex {
        let mut entry = ExportEntry {
            class_index,
            super_index: PackageIndex::NULL,
            outer_index: outer,
            object_name: self.name_ref(object_name),
            object_flags: 0,
            serial_size: payload.len() as u32,
            serial_offset: 0,
            export_flags: ExportFlags::empty(),
            net_index: 0,
            package_guid: Guid::ZERO,
        };
        tweak(&mut entry);
        self.exports.push(entry);
        self.payloads.push(payload);
        PackageIndex::from_export(self.exports.len() - 1)
    }

    /// Serialize a property list into payload bytes (terminator included).
    pub fn properties_payload(&mut self, properties: &[Property]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_properties(&mut buf, properties, &mut self.names).expect("in-memory write");
        buf
    }

    /// Payload for a class export: empty properties plus an empty field
    /// chain (`class_flags`, `count`).
    pub fn class_payload(&mut self) -> Vec<u8> {
        self.class_payload_with_fields(&[])
    }

    /// Class payload declaring property field names.
    pub fn class_payload_with_fields(&mut self, fields: &[&str]) -> Vec<u8> {
        let mut buf = self.properties_payload(&[]);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        for field in fields {
            let name = self.name_ref(field);
            name.write(&mut buf).expect("in-memory write");
        }
        buf
    }

    /// Add a class export (null class reference) with a super and fields.
    pub fn add_class_export(
        &mut self,
        object_name: &str,
        super_index: PackageIndex,
        fields: &[&str],
    ) -> PackageIndex {
        let payload = self.class_payload_with_fields(fields);
        self.add_export_entry(
            object_name,
            PackageIndex::NULL,
            PackageIndex::NULL,
            payload,
            |entry| entry.super_index = super_index,
        )
    }

    /// Assemble the final file bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut summary = PackageSummary::new(self.folder.clone());
        summary.guid = self.guid;
        summary.name_count = self.names.len() as u32;
        summary.import_count = self.imports.len() as u32;
        summary.export_count = self.exports.len() as u32;
        summary.depends_count = self.exports.len() as u32;
        let summary_len = summary.serialized_len();

        let mut names_bytes = Vec::new();
        self.names.write(&mut names_bytes).expect("names");
        let mut import_bytes = Vec::new();
        for import in &self.imports {
            import.write(&mut import_bytes).expect("imports");
        }
        let depends = DependsTable {
            entries: vec![Vec::new(); self.exports.len()],
        };
        let mut depends_bytes = Vec::new();
        depends.write(&mut depends_bytes).expect("depends");

        let export_bytes_len = self.exports.len() * gpkforge::tables::EXPORT_ENTRY_SIZE;
        let name_offset = summary_len;
        let import_offset = name_offset + names_bytes.len();
        let export_offset = import_offset + import_bytes.len();
        let depends_offset = export_offset + export_bytes_len;
        let payload_start = depends_offset + depends_bytes.len();

        let mut export_bytes = Vec::new();
        let mut payload_cursor = payload_start;
        for (entry, payload) in self.exports.iter().zip(&self.payloads) {
            let mut entry = entry.clone();
            entry.serial_offset = payload_cursor as u32;
            entry.serial_size = payload.len() as u32;
            entry.write(&mut export_bytes).expect("exports");
            payload_cursor += payload.len();
        }

        summary.name_offset = name_offset as i32;
        summary.import_offset = import_offset as i32;
        summary.export_offset = export_offset as i32;
        summary.depends_offset = depends_offset as i32;
        summary.header_size = payload_start as i32;

        let mut out = Vec::with_capacity(payload_cursor);
        summary.write(&mut out).expect("summary");
        assert_eq!(out.len(), summary_len);
        out.extend_from_slice(&names_bytes);
        out.extend_from_slice(&import_bytes);
        out.extend_from_slice(&export_bytes);
        out.extend_from_slice(&depends_bytes);
        for payload in &self.payloads {
            out.extend_from_slice(payload);
        }
        out
    }
}

/// A ready-made package: one class and two plain objects under a group.
///
/// Layout: export 1 = class `PropClass`, export 2 = group `Props`,
/// export 3 = `Door` (inside `Props`), export 4 = `Window` (inside `Props`).
pub fn sample_package(folder: &str) -> (PackageBuilder, Vec<u8>) {
    use gpkforge::properties::PropertyValue;

    let mut builder = PackageBuilder::new(folder);
    let class_payload = builder.class_payload();
    let class_index = builder.add_export(
        "PropClass",
        PackageIndex::NULL,
        PackageIndex::NULL,
        class_payload,
    );

    let group_payload = builder.properties_payload(&[]);
    let group = builder.add_export("Props", class_index, PackageIndex::NULL, group_payload);

    let health = builder.name_ref("Health");
    let door_payload = builder.properties_payload(&[Property {
        name: health,
        array_index: 0,
        value: PropertyValue::Int(75),
    }]);
    builder.add_export("Door", class_index, group, door_payload);

    let label = builder.name_ref("Label");
    let window_payload = builder.properties_payload(&[Property {
        name: label,
        array_index: 0,
        value: PropertyValue::Str("north wall".into()),
    }]);
    builder.add_export("Window", class_index, group, window_payload);

    let bytes = builder.build();
    (builder, bytes)
}
