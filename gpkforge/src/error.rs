//! Engine error types.
//!
//! The engine distinguishes two propagation policies:
//!
//! - **Structural failures** (`FormatError`) abort the enclosing open, load,
//!   or codec operation and propagate to the caller.
//! - **Resolution failures** (a missing package, class, or import) are soft:
//!   they resolve to `None`, are logged, and are memoized by the registry so
//!   a repeated lookup does not pay the search cost again. They never carry
//!   an error value.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for format-level operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Fatal errors raised while decoding or encoding package data.
///
/// Any of these aborts the operation in progress; partially-populated state
/// is discarded by the caller.
#[derive(Debug, Error)]
pub enum FormatError {
    /// I/O error reading or writing package data.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with the package magic number.
    #[error("bad package magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    /// The file version is outside the supported range.
    #[error("unsupported package version {version} (supported {min}..={max})")]
    UnsupportedVersion { version: u16, min: u16, max: u16 },

    /// The package version does not match the bootstrap version pin.
    #[error("package version {version} does not match engine version {pinned}")]
    VersionMismatch { version: u16, pinned: u16 },

    /// A compression codec the engine does not carry was requested.
    #[error("unsupported compression flags {flags:#06x}")]
    UnsupportedCompression { flags: u32 },

    /// A compressed block failed to decode.
    #[error("corrupt compressed block at {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },

    /// Structurally invalid table or payload data.
    #[error("corrupt package data: {0}")]
    Corrupt(String),

    /// A table entry referenced an index outside its table.
    #[error("resource index {index} out of range ({exports} exports, {imports} imports)")]
    IndexOutOfRange {
        index: i32,
        exports: usize,
        imports: usize,
    },

    /// The operation requires tables that have not been loaded yet.
    #[error("package {name} is not loaded")]
    NotLoaded { name: String },

    /// A core package required by the class bootstrap was not found.
    #[error("core package {name} not found under content root")]
    MissingCorePackage { name: String },

    /// Failed to open a package file.
    #[error("failed to open {path}: {source}")]
    OpenFailed { path: PathBuf, source: io::Error },

    /// The operation was cancelled cooperatively.
    ///
    /// Partially-populated tables are discarded; the package is left in the
    /// not-loaded state and may be loaded again.
    #[error("operation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_magic_display() {
        let err = FormatError::BadMagic {
            expected: 0x9E2A83C1,
            found: 0xDEADBEEF,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x9e2a83c1"));
        assert!(msg.contains("0xdeadbeef"));
    }

    #[test]
    fn test_version_display() {
        let err = FormatError::UnsupportedVersion {
            version: 9999,
            min: 576,
            max: 864,
        };
        assert!(err.to_string().contains("9999"));
        assert!(err.to_string().contains("576"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: FormatError = io_err.into();
        assert!(matches!(err, FormatError::Io(_)));
    }
}
