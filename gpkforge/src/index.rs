//! Signed package indices.
//!
//! A [`PackageIndex`] identifies any resource table entry with a single
//! signed integer. Zero is the null reference, positive `n` is export table
//! entry `n - 1`, and negative `n` is import table entry `-n - 1`. Every
//! serialized inter-object reference uses this convention, so it is the one
//! invariant the whole engine leans on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A signed reference to an export, an import, or nothing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct PackageIndex(pub i32);

impl PackageIndex {
    /// The null reference.
    pub const NULL: PackageIndex = PackageIndex(0);

    /// Build an index pointing at export table entry `slot` (zero-based).
    pub fn from_export(slot: usize) -> Self {
        PackageIndex(slot as i32 + 1)
    }

    /// Build an index pointing at import table entry `slot` (zero-based).
    pub fn from_import(slot: usize) -> Self {
        PackageIndex(-(slot as i32) - 1)
    }

    /// True for the null reference.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// True if this index points into the export table.
    pub fn is_export(self) -> bool {
        self.0 > 0
    }

    /// True if this index points into the import table.
    pub fn is_import(self) -> bool {
        self.0 < 0
    }

    /// Zero-based export table slot, if this is an export reference.
    pub fn export(self) -> Option<usize> {
        (self.0 > 0).then(|| (self.0 - 1) as usize)
    }

    /// Zero-based import table slot, if this is an import reference.
    pub fn import(self) -> Option<usize> {
        (self.0 < 0).then(|| (-(self.0) - 1) as usize)
    }
}

impl fmt::Display for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "null")
        } else if self.0 > 0 {
            write!(f, "export:{}", self.0 - 1)
        } else {
            write!(f, "import:{}", -self.0 - 1)
        }
    }
}

impl From<i32> for PackageIndex {
    fn from(raw: i32) -> Self {
        PackageIndex(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_index() {
        assert!(PackageIndex::NULL.is_null());
        assert!(!PackageIndex::NULL.is_export());
        assert!(!PackageIndex::NULL.is_import());
        assert_eq!(PackageIndex::NULL.export(), None);
        assert_eq!(PackageIndex::NULL.import(), None);
    }

    #[test]
    fn test_export_round_trip() {
        for slot in [0usize, 1, 7, 4095] {
            let idx = PackageIndex::from_export(slot);
            assert!(idx.is_export());
            assert_eq!(idx.export(), Some(slot));
            assert_eq!(idx.import(), None);
        }
        assert_eq!(PackageIndex::from_export(0).0, 1);
    }

    #[test]
    fn test_import_round_trip() {
        for slot in [0usize, 1, 7, 4095] {
            let idx = PackageIndex::from_import(slot);
            assert!(idx.is_import());
            assert_eq!(idx.import(), Some(slot));
            assert_eq!(idx.export(), None);
        }
        assert_eq!(PackageIndex::from_import(0).0, -1);
    }

    #[test]
    fn test_sign_determines_table() {
        assert_eq!(PackageIndex(5).export(), Some(4));
        assert_eq!(PackageIndex(-5).import(), Some(4));
    }

    #[test]
    fn test_display() {
        assert_eq!(PackageIndex(0).to_string(), "null");
        assert_eq!(PackageIndex(3).to_string(), "export:2");
        assert_eq!(PackageIndex(-3).to_string(), "import:2");
    }
}
