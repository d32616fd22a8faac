//! Composite package map and sub-extraction.
//!
//! Some packages are not files of their own: they are byte slices inside a
//! larger container file, indexed by a mapper table. Resolving such a name
//! extracts the slice into memory and opens it as if it were a standalone
//! file. The extracted blob lives exactly as long as the package opened
//! over it.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{FormatError, FormatResult};
use crate::mapper::{parse_records, MapperError};

/// One virtual package: a byte range inside a container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeEntry {
    /// Dotted object path naming the virtual package.
    pub object_path: String,
    /// Container file name, relative to the content root.
    pub container_file: String,
    pub byte_offset: u64,
    pub byte_size: u64,
}

/// Name-keyed composite package index.
#[derive(Debug, Clone, Default)]
pub struct CompositeMap {
    entries: HashMap<String, CompositeEntry>,
}

impl CompositeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an obfuscated composite mapper table.
    ///
    /// Records are `objectPath|containerFile|offset|size`.
    pub fn from_mapper(data: &[u8]) -> Result<Self, MapperError> {
        let records = parse_records(data, 4)?;
        let mut entries = HashMap::with_capacity(records.len());
        for (line, record) in records.into_iter().enumerate() {
            let [object_path, container_file, offset, size]: [String; 4] =
                record.try_into().expect("four fields checked");
            let byte_offset = offset.parse().map_err(|_| MapperError::BadNumber {
                line: line + 1,
                value: offset,
            })?;
            let byte_size = size.parse().map_err(|_| MapperError::BadNumber {
                line: line + 1,
                value: size,
            })?;
            let entry = CompositeEntry {
                object_path: object_path.clone(),
                container_file,
                byte_offset,
                byte_size,
            };
            // Keyed by both the full path and its trailing segment, so a
            // lookup by bare package name also lands.
            if let Some(tail) = object_path.rsplit('.').next() {
                entries.insert(tail.to_ascii_lowercase(), entry.clone());
            }
            entries.insert(object_path.to_ascii_lowercase(), entry);
        }
        debug!(entries = entries.len(), "decoded composite map");
        Ok(Self { entries })
    }

    /// Register an entry directly (tests, tools).
    pub fn insert(&mut self, entry: CompositeEntry) {
        if let Some(tail) = entry.object_path.rsplit('.').next() {
            self.entries
                .insert(tail.to_ascii_lowercase(), entry.clone());
        }
        self.entries
            .insert(entry.object_path.to_ascii_lowercase(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&CompositeEntry> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Extract the entry's byte range from its container under `content_root`.
    pub fn extract(entry: &CompositeEntry, content_root: &Path) -> FormatResult<Bytes> {
        let container = content_root.join(&entry.container_file);
        let bytes = std::fs::read(&container).map_err(|source| FormatError::OpenFailed {
            path: container.clone(),
            source,
        })?;

        let start = entry.byte_offset as usize;
        let end = start.saturating_add(entry.byte_size as usize);
        if end > bytes.len() {
            warn!(
                container = %container.display(),
                offset = entry.byte_offset,
                size = entry.byte_size,
                container_len = bytes.len(),
                "composite slice outside container"
            );
            return Err(FormatError::Corrupt(format!(
                "composite slice {}..{} outside container {} of {} bytes",
                start,
                end,
                entry.container_file,
                bytes.len()
            )));
        }
        Ok(Bytes::from(bytes).slice(start..end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::encode_records;
    use tempfile::TempDir;

    #[test]
    fn test_from_mapper() {
        let data = encode_records(&[vec![
            "Zones.Foo".into(),
            "Bundle.gpk".into(),
            "4096".into(),
            "512".into(),
        ]]);
        let map = CompositeMap::from_mapper(&data).unwrap();
        let entry = map.get("Foo").unwrap();
        assert_eq!(entry.container_file, "Bundle.gpk");
        assert_eq!(entry.byte_offset, 4096);
        assert_eq!(entry.byte_size, 512);
        // Full-path lookup also works.
        assert!(map.get("zones.foo").is_some());
    }

    #[test]
    fn test_bad_number_is_error() {
        let data = encode_records(&[vec![
            "Zones.Foo".into(),
            "Bundle.gpk".into(),
            "not-a-number".into(),
            "512".into(),
        ]]);
        let err = CompositeMap::from_mapper(&data).unwrap_err();
        assert!(matches!(err, MapperError::BadNumber { line: 1, .. }));
    }

    #[test]
    fn test_extract_slices_container() {
        let root = TempDir::new().unwrap();
        let mut container = vec![0u8; 4096];
        container.extend_from_slice(b"EMBEDDED PACKAGE BYTES");
        container.resize(4096 + 512, 0xEE);
        std::fs::write(root.path().join("Bundle.gpk"), &container).unwrap();

        let entry = CompositeEntry {
            object_path: "Zones.Foo".into(),
            container_file: "Bundle.gpk".into(),
            byte_offset: 4096,
            byte_size: 512,
        };
        let slice = CompositeMap::extract(&entry, root.path()).unwrap();
        assert_eq!(slice.len(), 512);
        assert!(slice.starts_with(b"EMBEDDED PACKAGE BYTES"));
    }

    #[test]
    fn test_extract_out_of_range_fails() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("Bundle.gpk"), b"tiny").unwrap();
        let entry = CompositeEntry {
            object_path: "Zones.Foo".into(),
            container_file: "Bundle.gpk".into(),
            byte_offset: 4096,
            byte_size: 512,
        };
        let err = CompositeMap::extract(&entry, root.path()).unwrap_err();
        assert!(matches!(err, FormatError::Corrupt(_)));
    }
}
