//! Resource tables: imports, exports, and the depends adjacency.
//!
//! After the summary is decoded, each table is read as exactly `count`
//! fixed-shape entries at its summary offset. Imports receive consecutive
//! negative [`PackageIndex`] values starting at `-1`, exports consecutive
//! positive values starting at `1`. A second pass links every entry to its
//! outer and builds the child lists and the bare-name lookup index.
//!
//! Outer chains are validated at link time: an out-of-range or cyclic chain
//! is a hard parse failure rather than a trusted assumption.

use std::collections::HashMap;
use std::io::{Read, Write};

use bitflags::bitflags;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use tracing::trace;

use crate::codec::{Guid, ReadExt, WriteExt};
use crate::error::{FormatError, FormatResult};
use crate::index::PackageIndex;
use crate::names::{NameRef, NameTable};
use crate::task::CancelFlag;

/// Serialized size of one export entry.
pub const EXPORT_ENTRY_SIZE: usize = 60;

/// Serialized size of one import entry.
pub const IMPORT_ENTRY_SIZE: usize = 28;

bitflags! {
    /// Per-export flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExportFlags: u32 {
        /// Cooker-inserted duplicate of an object owned by another package.
        const FORCED_EXPORT  = 0x0000_0001;
        const NOT_FOR_SERVER = 0x0000_0002;
        const NOT_FOR_CLIENT = 0x0000_0004;
    }
}

/// Object flag bits the engine cares about (the word is carried verbatim).
pub mod object_flags {
    pub const PUBLIC: u64 = 0x0000_0000_0000_0004;
    pub const STANDALONE: u64 = 0x0000_0008_0000_0000;
}

/// A reference to an object defined in another package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportEntry {
    /// Name of the package that defines the class.
    pub class_package: NameRef,
    pub class_name: NameRef,
    pub outer_index: PackageIndex,
    pub object_name: NameRef,
}

impl ImportEntry {
    pub fn read<R: Read>(r: &mut R) -> FormatResult<Self> {
        Ok(Self {
            class_package: NameRef::read(r)?,
            class_name: NameRef::read(r)?,
            outer_index: PackageIndex(r.read_i32::<LE>()?),
            object_name: NameRef::read(r)?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> FormatResult<()> {
        self.class_package.write(w)?;
        self.class_name.write(w)?;
        w.write_i32::<LE>(self.outer_index.0)?;
        self.object_name.write(w)?;
        Ok(())
    }
}

/// An object defined inside this package.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportEntry {
    /// Class reference; null means this export *is* a class.
    pub class_index: PackageIndex,
    pub super_index: PackageIndex,
    pub outer_index: PackageIndex,
    pub object_name: NameRef,
    pub object_flags: u64,
    pub serial_size: u32,
    pub serial_offset: u32,
    pub export_flags: ExportFlags,
    /// Identity used to match forced-export duplicates across variants.
    pub net_index: u32,
    /// Cross-generation identity of the owning package.
    pub package_guid: Guid,
}

impl ExportEntry {
    pub fn read<R: Read>(r: &mut R) -> FormatResult<Self> {
        Ok(Self {
            class_index: PackageIndex(r.read_i32::<LE>()?),
            super_index: PackageIndex(r.read_i32::<LE>()?),
            outer_index: PackageIndex(r.read_i32::<LE>()?),
            object_name: NameRef::read(r)?,
            object_flags: r.read_u64::<LE>()?,
            serial_size: r.read_u32::<LE>()?,
            serial_offset: r.read_u32::<LE>()?,
            export_flags: ExportFlags::from_bits_retain(r.read_u32::<LE>()?),
            net_index: r.read_u32::<LE>()?,
            package_guid: r.read_guid()?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> FormatResult<()> {
        w.write_i32::<LE>(self.class_index.0)?;
        w.write_i32::<LE>(self.super_index.0)?;
        w.write_i32::<LE>(self.outer_index.0)?;
        self.object_name.write(w)?;
        w.write_u64::<LE>(self.object_flags)?;
        w.write_u32::<LE>(self.serial_size)?;
        w.write_u32::<LE>(self.serial_offset)?;
        w.write_u32::<LE>(self.export_flags.bits())?;
        w.write_u32::<LE>(self.net_index)?;
        w.write_guid(&self.package_guid)?;
        Ok(())
    }

    /// True for cooker-inserted duplicates resolved elsewhere.
    pub fn is_forced(&self) -> bool {
        self.export_flags.contains(ExportFlags::FORCED_EXPORT)
    }
}

/// Per-export adjacency of object references, in export table order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependsTable {
    pub entries: Vec<Vec<PackageIndex>>,
}

impl DependsTable {
    pub fn read<R: Read>(r: &mut R, count: u32, cancel: &CancelFlag) -> FormatResult<Self> {
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cancel.check()?;
            let n = r.read_u32::<LE>()?;
            let mut deps = Vec::with_capacity(n as usize);
            for _ in 0..n {
                deps.push(PackageIndex(r.read_i32::<LE>()?));
            }
            entries.push(deps);
        }
        Ok(Self { entries })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> FormatResult<()> {
        for deps in &self.entries {
            w.write_u32::<LE>(deps.len() as u32)?;
            for dep in deps {
                w.write_i32::<LE>(dep.0)?;
            }
        }
        Ok(())
    }
}

/// Read the import table, polling `cancel` between entries.
pub fn read_imports<R: Read>(
    r: &mut R,
    count: u32,
    cancel: &CancelFlag,
) -> FormatResult<Vec<ImportEntry>> {
    let mut imports = Vec::with_capacity(count as usize);
    for _ in 0..count {
        cancel.check()?;
        imports.push(ImportEntry::read(r)?);
    }
    trace!(imports = imports.len(), "read import table");
    Ok(imports)
}

/// Read the export table, polling `cancel` between entries.
pub fn read_exports<R: Read>(
    r: &mut R,
    count: u32,
    cancel: &CancelFlag,
) -> FormatResult<Vec<ExportEntry>> {
    let mut exports = Vec::with_capacity(count as usize);
    for _ in 0..count {
        cancel.check()?;
        exports.push(ExportEntry::read(r)?);
    }
    trace!(exports = exports.len(), "read export table");
    Ok(exports)
}

/// Linked-table structure built after both tables are read.
#[derive(Debug, Default)]
pub struct TableLinks {
    /// Child lists, keyed by the outer entry's index.
    pub inner: HashMap<PackageIndex, Vec<PackageIndex>>,
    /// Exports with a null outer.
    pub export_roots: Vec<PackageIndex>,
    /// Imports with a null outer.
    pub import_roots: Vec<PackageIndex>,
    /// Lowercased bare name to export indices; collisions are legal and are
    /// disambiguated by instance number.
    pub exports_by_name: HashMap<String, Vec<PackageIndex>>,
}

impl TableLinks {
    /// Children of `index`, empty if it has none.
    pub fn children(&self, index: PackageIndex) -> &[PackageIndex] {
        self.inner.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Link entries to their outers and build the lookup structures.
///
/// Fails with [`FormatError::Corrupt`] on out-of-range outers and on cyclic
/// outer chains; every chain must terminate at a root.
pub fn link_tables(
    exports: &[ExportEntry],
    imports: &[ImportEntry],
    names: &NameTable,
) -> FormatResult<TableLinks> {
    let mut links = TableLinks::default();

    let outer_of = |index: PackageIndex| -> FormatResult<PackageIndex> {
        if let Some(slot) = index.export() {
            exports
                .get(slot)
                .map(|e| e.outer_index)
                .ok_or(FormatError::IndexOutOfRange {
                    index: index.0,
                    exports: exports.len(),
                    imports: imports.len(),
                })
        } else if let Some(slot) = index.import() {
            imports
                .get(slot)
                .map(|e| e.outer_index)
                .ok_or(FormatError::IndexOutOfRange {
                    index: index.0,
                    exports: exports.len(),
                    imports: imports.len(),
                })
        } else {
            Ok(PackageIndex::NULL)
        }
    };

    let entry_count = exports.len() + imports.len();
    let all_indices = (0..exports.len())
        .map(PackageIndex::from_export)
        .chain((0..imports.len()).map(PackageIndex::from_import));

    for index in all_indices {
        // Walk the outer chain; more steps than entries exist means a cycle.
        let mut cursor = index;
        let mut steps = 0usize;
        loop {
            let outer = outer_of(cursor)?;
            if outer.is_null() {
                break;
            }
            steps += 1;
            if steps > entry_count {
                return Err(FormatError::Corrupt(format!(
                    "cyclic outer chain through {}",
                    index
                )));
            }
            cursor = outer;
        }

        let outer = outer_of(index)?;
        if outer.is_null() {
            if index.is_export() {
                links.export_roots.push(index);
            } else {
                links.import_roots.push(index);
            }
        } else {
            links.inner.entry(outer).or_default().push(index);
        }

        if let Some(slot) = index.export() {
            if let Some(text) = names.get(exports[slot].object_name.index) {
                links
                    .exports_by_name
                    .entry(text.to_ascii_lowercase())
                    .or_default()
                    .push(index);
            }
        }
    }

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn name(names: &mut NameTable, text: &str) -> NameRef {
        NameRef::new(names.intern(text))
    }

    fn export(object_name: NameRef, outer: PackageIndex) -> ExportEntry {
        ExportEntry {
            class_index: PackageIndex::NULL,
            super_index: PackageIndex::NULL,
            outer_index: outer,
            object_name,
            object_flags: object_flags::PUBLIC,
            serial_size: 0,
            serial_offset: 0,
            export_flags: ExportFlags::empty(),
            net_index: 0,
            package_guid: Guid::ZERO,
        }
    }

    #[test]
    fn test_import_entry_round_trip() {
        let mut names = NameTable::new();
        let entry = ImportEntry {
            class_package: name(&mut names, "Core"),
            class_name: name(&mut names, "Class"),
            outer_index: PackageIndex(-1),
            object_name: name(&mut names, "Object"),
        };
        let mut buf = Vec::new();
        entry.write(&mut buf).unwrap();
        assert_eq!(buf.len(), IMPORT_ENTRY_SIZE);
        assert_eq!(ImportEntry::read(&mut Cursor::new(&buf)).unwrap(), entry);
    }

    #[test]
    fn test_export_entry_round_trip() {
        let mut names = NameTable::new();
        let mut entry = export(name(&mut names, "Mesh"), PackageIndex(1));
        entry.serial_size = 128;
        entry.serial_offset = 4096;
        entry.export_flags = ExportFlags::FORCED_EXPORT;
        entry.net_index = 17;
        entry.package_guid = Guid([9; 16]);

        let mut buf = Vec::new();
        entry.write(&mut buf).unwrap();
        assert_eq!(buf.len(), EXPORT_ENTRY_SIZE);
        let back = ExportEntry::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, entry);
        assert!(back.is_forced());
    }

    #[test]
    fn test_depends_round_trip() {
        let table = DependsTable {
            entries: vec![vec![PackageIndex(2), PackageIndex(-1)], vec![]],
        };
        let mut buf = Vec::new();
        table.write(&mut buf).unwrap();
        let back = DependsTable::read(&mut Cursor::new(&buf), 2, &CancelFlag::new()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_link_builds_inner_lists() {
        let mut names = NameTable::new();
        let group = export(name(&mut names, "Props"), PackageIndex::NULL);
        let child = export(name(&mut names, "Door"), PackageIndex(1));
        let exports = vec![group, child];
        let imports = vec![];

        let links = link_tables(&exports, &imports, &names).unwrap();
        assert_eq!(links.export_roots, vec![PackageIndex(1)]);
        assert_eq!(links.children(PackageIndex(1)), &[PackageIndex(2)]);
        assert_eq!(
            links.exports_by_name.get("door"),
            Some(&vec![PackageIndex(2)])
        );
    }

    #[test]
    fn test_link_rejects_cycle() {
        let mut names = NameTable::new();
        let a = export(name(&mut names, "A"), PackageIndex(2));
        let b = export(name(&mut names, "B"), PackageIndex(1));
        let err = link_tables(&[a, b], &[], &names).unwrap_err();
        assert!(matches!(err, FormatError::Corrupt(_)));
    }

    #[test]
    fn test_link_rejects_out_of_range_outer() {
        let mut names = NameTable::new();
        let a = export(name(&mut names, "A"), PackageIndex(99));
        let err = link_tables(&[a], &[], &names).unwrap_err();
        assert!(matches!(err, FormatError::IndexOutOfRange { .. }));
    }

    #[test]
    fn test_cancelled_table_read() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let buf = vec![0u8; IMPORT_ENTRY_SIZE * 4];
        let err = read_imports(&mut Cursor::new(&buf), 4, &cancel).unwrap_err();
        assert!(matches!(err, FormatError::Cancelled));
    }
}
