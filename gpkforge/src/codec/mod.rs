//! Binary codec primitives.
//!
//! Everything on disk is little-endian. The codec is expressed as extension
//! traits over `std::io` readers and writers so the same routines serve the
//! raw file, the decompressed image, and in-memory scratch buffers.
//!
//! # String encoding
//!
//! Strings are length-prefixed with a *signed* length. A positive length is
//! that many ANSI bytes including the terminating NUL; a negative length is
//! the magnitude in UTF-16 code units including the terminating NUL. Writing
//! picks the narrow form whenever the string is pure ASCII.

mod summary;

pub use summary::{
    CompressedChunk, CompressionFlags, GenerationInfo, PackageFlags, PackageSummary,
    MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION, PACKAGE_MAGIC, VER_CROSS_LEVEL_GUIDS,
    VER_THUMBNAIL_TABLE,
};

use std::fmt;
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::error::{FormatError, FormatResult};

/// Upper bound on a serialized string length, as a corruption guard.
const MAX_STRING_LEN: usize = 1024 * 1024;

/// A 16-byte package GUID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// The all-zero GUID, used where no identity is recorded.
    pub const ZERO: Guid = Guid([0; 16]);

    /// True if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.0.chunks(4) {
            for b in chunk {
                write!(f, "{:02X}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

/// Read-side codec extensions.
pub trait ReadExt: Read {
    /// Read a signed-length-prefixed string.
    fn read_fstring(&mut self) -> FormatResult<String> {
        let len = self.read_i32::<LE>()?;
        if len == 0 {
            return Ok(String::new());
        }
        if len > 0 {
            let len = len as usize;
            if len > MAX_STRING_LEN {
                return Err(FormatError::Corrupt(format!(
                    "string length {} exceeds limit",
                    len
                )));
            }
            let mut buf = vec![0u8; len];
            self.read_exact(&mut buf)?;
            // Drop the trailing NUL; tolerate its absence in hand-built data.
            if buf.last() == Some(&0) {
                buf.pop();
            }
            String::from_utf8(buf)
                .map_err(|_| FormatError::Corrupt("invalid ANSI string bytes".into()))
        } else {
            let units = (-(len as i64)) as usize;
            if units > MAX_STRING_LEN {
                return Err(FormatError::Corrupt(format!(
                    "string length {} exceeds limit",
                    units
                )));
            }
            let mut wide = vec![0u16; units];
            self.read_u16_into::<LE>(&mut wide)?;
            if wide.last() == Some(&0) {
                wide.pop();
            }
            String::from_utf16(&wide)
                .map_err(|_| FormatError::Corrupt("invalid UTF-16 string bytes".into()))
        }
    }

    /// Read a 16-byte GUID.
    fn read_guid(&mut self) -> FormatResult<Guid> {
        let mut bytes = [0u8; 16];
        self.read_exact(&mut bytes)?;
        Ok(Guid(bytes))
    }
}

impl<R: Read + ?Sized> ReadExt for R {}

/// Write-side codec extensions.
pub trait WriteExt: Write {
    /// Write a signed-length-prefixed string, choosing ANSI for pure-ASCII
    /// content and UTF-16 otherwise.
    fn write_fstring(&mut self, s: &str) -> FormatResult<()> {
        if s.is_empty() {
            self.write_i32::<LE>(0)?;
            return Ok(());
        }
        if s.is_ascii() {
            self.write_i32::<LE>(s.len() as i32 + 1)?;
            self.write_all(s.as_bytes())?;
            self.write_u8(0)?;
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            self.write_i32::<LE>(-(units.len() as i32 + 1))?;
            for unit in units {
                self.write_u16::<LE>(unit)?;
            }
            self.write_u16::<LE>(0)?;
        }
        Ok(())
    }

    /// Write a 16-byte GUID.
    fn write_guid(&mut self, guid: &Guid) -> FormatResult<()> {
        self.write_all(&guid.0)?;
        Ok(())
    }
}

impl<W: Write + ?Sized> WriteExt for W {}

/// Serialized byte length of a string as `write_fstring` emits it.
pub fn fstring_len(s: &str) -> usize {
    if s.is_empty() {
        4
    } else if s.is_ascii() {
        4 + s.len() + 1
    } else {
        4 + (s.encode_utf16().count() + 1) * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(s: &str) -> String {
        let mut buf = Vec::new();
        buf.write_fstring(s).unwrap();
        assert_eq!(buf.len(), fstring_len(s));
        Cursor::new(buf).read_fstring().unwrap()
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(round_trip(""), "");
    }

    #[test]
    fn test_ascii_string_is_narrow() {
        let mut buf = Vec::new();
        buf.write_fstring("Core").unwrap();
        // i32 length 5 (4 chars + NUL), then bytes, then NUL.
        assert_eq!(buf[0..4], 5i32.to_le_bytes());
        assert_eq!(&buf[4..8], b"Core");
        assert_eq!(buf[8], 0);
        assert_eq!(round_trip("Core"), "Core");
    }

    #[test]
    fn test_wide_string_is_negative_length() {
        let mut buf = Vec::new();
        buf.write_fstring("Frühling").unwrap();
        let len = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        assert!(len < 0);
        assert_eq!(round_trip("Frühling"), "Frühling");
    }

    #[test]
    fn test_oversized_string_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_STRING_LEN as i32 + 1).to_le_bytes());
        let err = Cursor::new(buf).read_fstring().unwrap_err();
        assert!(matches!(err, FormatError::Corrupt(_)));
    }

    #[test]
    fn test_guid_round_trip() {
        let guid = Guid([
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ]);
        let mut buf = Vec::new();
        buf.write_guid(&guid).unwrap();
        let back = Cursor::new(buf).read_guid().unwrap();
        assert_eq!(back, guid);
        assert!(!guid.is_zero());
        assert!(Guid::ZERO.is_zero());
    }

    #[test]
    fn test_guid_display() {
        let guid = Guid([0xAB; 16]);
        assert_eq!(guid.to_string().len(), 32);
        assert!(guid.to_string().starts_with("ABAB"));
    }
}
