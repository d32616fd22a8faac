//! The package name table.
//!
//! Every identifier in a package is stored once in the name table and
//! referenced by index. References additionally carry an instance number so
//! that `Body` and `Body_3` share one table entry. Interning de-duplicates
//! by exact string match; comparisons elsewhere in the engine are
//! case-insensitive, matching how packages reference each other on disk.

use std::collections::HashMap;
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use tracing::trace;

use crate::codec::{ReadExt, WriteExt};
use crate::error::{FormatError, FormatResult};

/// Flag word given to names interned at save time.
pub const DEFAULT_NAME_FLAGS: u64 = 0x0007_0010_0000_0000;

/// A reference into the name table plus an instance number.
///
/// `number == 0` is the bare name; `number > 0` renders with a `_{number-1}`
/// suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NameRef {
    pub index: u32,
    pub number: u32,
}

impl NameRef {
    pub fn new(index: u32) -> Self {
        Self { index, number: 0 }
    }

    pub fn read<R: Read>(r: &mut R) -> FormatResult<Self> {
        Ok(Self {
            index: r.read_u32::<LE>()?,
            number: r.read_u32::<LE>()?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> FormatResult<()> {
        w.write_u32::<LE>(self.index)?;
        w.write_u32::<LE>(self.number)?;
        Ok(())
    }
}

/// One name table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub text: String,
    pub flags: u64,
}

/// Ordered, de-duplicated name storage.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    entries: Vec<NameEntry>,
    lookup: HashMap<String, u32>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bare text of entry `index`.
    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get(index as usize).map(|e| e.text.as_str())
    }

    pub fn entries(&self) -> &[NameEntry] {
        &self.entries
    }

    /// Intern `text`, returning the existing index on an exact match.
    pub fn intern(&mut self, text: &str) -> u32 {
        self.intern_with_flags(text, DEFAULT_NAME_FLAGS)
    }

    /// Intern `text` with an explicit flag word.
    pub fn intern_with_flags(&mut self, text: &str, flags: u64) -> u32 {
        if let Some(&index) = self.lookup.get(text) {
            return index;
        }
        let index = self.entries.len() as u32;
        self.entries.push(NameEntry {
            text: text.to_string(),
            flags,
        });
        self.lookup.insert(text.to_string(), index);
        index
    }

    /// Render a [`NameRef`] including its instance number suffix.
    pub fn resolve(&self, name: NameRef) -> Option<String> {
        let text = self.get(name.index)?;
        if name.number == 0 {
            Some(text.to_string())
        } else {
            Some(format!("{}_{}", text, name.number - 1))
        }
    }

    /// Read `count` entries from the stream.
    pub fn read<R: Read>(r: &mut R, count: u32) -> FormatResult<Self> {
        let mut table = Self::default();
        for slot in 0..count {
            let text = r.read_fstring()?;
            let flags = r.read_u64::<LE>()?;
            if table.lookup.contains_key(&text) {
                return Err(FormatError::Corrupt(format!(
                    "duplicate name table entry {:?} at slot {}",
                    text, slot
                )));
            }
            table.lookup.insert(text.clone(), table.entries.len() as u32);
            table.entries.push(NameEntry { text, flags });
        }
        trace!(names = table.entries.len(), "read name table");
        Ok(table)
    }

    /// Write all entries in order.
    pub fn write<W: Write>(&self, w: &mut W) -> FormatResult<()> {
        for entry in &self.entries {
            w.write_fstring(&entry.text)?;
            w.write_u64::<LE>(entry.flags)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_intern_dedupes_exact_matches() {
        let mut table = NameTable::new();
        let a = table.intern("Engine");
        let b = table.intern("Engine");
        let c = table.intern("engine");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_resolve_with_instance_number() {
        let mut table = NameTable::new();
        let index = table.intern("Body");
        assert_eq!(
            table.resolve(NameRef { index, number: 0 }),
            Some("Body".to_string())
        );
        assert_eq!(
            table.resolve(NameRef { index, number: 4 }),
            Some("Body_3".to_string())
        );
        assert_eq!(table.resolve(NameRef { index: 99, number: 0 }), None);
    }

    #[test]
    fn test_table_round_trip() {
        let mut table = NameTable::new();
        table.intern("None");
        table.intern("Core");
        table.intern_with_flags("Special", 0xDEAD);

        let mut buf = Vec::new();
        table.write(&mut buf).unwrap();
        let back = NameTable::read(&mut Cursor::new(&buf), 3).unwrap();
        assert_eq!(back.entries(), table.entries());
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let mut buf = Vec::new();
        for _ in 0..2 {
            buf.write_fstring("Twice").unwrap();
            buf.write_u64::<LE>(0).unwrap();
        }
        let err = NameTable::read(&mut Cursor::new(&buf), 2).unwrap_err();
        assert!(matches!(err, FormatError::Corrupt(_)));
    }

    #[test]
    fn test_name_ref_round_trip() {
        let name = NameRef { index: 7, number: 2 };
        let mut buf = Vec::new();
        name.write(&mut buf).unwrap();
        assert_eq!(NameRef::read(&mut Cursor::new(&buf)).unwrap(), name);
    }
}
