//! Package summary (file header) codec.
//!
//! The summary is the first structure in every package file and carries the
//! table counts and offsets everything else is addressed through. Offsets in
//! the summary, and chunk `decompressed_*` fields, are always expressed in
//! the *uncompressed* layout: the stored summary of a compressed file carries
//! the compression bits and the chunk table, while the logical (decompressed)
//! image carries neither.

use std::io::{Read, Write};

use bitflags::bitflags;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use super::{Guid, ReadExt, WriteExt};
use crate::error::{FormatError, FormatResult};

/// Package file magic number.
pub const PACKAGE_MAGIC: u32 = 0x9E2A_83C1;

/// Lowest file version the engine will open.
pub const MIN_SUPPORTED_VERSION: u16 = 576;

/// Highest file version the engine will open.
pub const MAX_SUPPORTED_VERSION: u16 = 864;

/// First version carrying the thumbnail table offset.
pub const VER_THUMBNAIL_TABLE: u16 = 584;

/// First version carrying the cross-level GUID table offset.
pub const VER_CROSS_LEVEL_GUIDS: u16 = 610;

/// Sanity bound on table entry counts.
const MAX_TABLE_COUNT: u32 = 4 * 1024 * 1024;

bitflags! {
    /// Package-level flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PackageFlags: u32 {
        const ALLOW_DOWNLOAD   = 0x0000_0001;
        const SERVER_SIDE_ONLY = 0x0000_0004;
        const COOKED           = 0x0000_0008;
        const STORE_COMPRESSED = 0x0200_0000;
    }
}

bitflags! {
    /// Compression codec selection flags.
    ///
    /// The engine codes ZLIB. The LZO and LZX bits are reserved for data
    /// produced by the original tool chain; opening a package that demands
    /// them fails fast.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompressionFlags: u32 {
        const ZLIB = 0x01;
        const LZO  = 0x02;
        const LZX  = 0x04;
    }
}

/// One independently decompressible span of the package payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedChunk {
    /// Start of the span in the uncompressed layout.
    pub decompressed_offset: u32,
    /// Span length once decompressed.
    pub decompressed_size: u32,
    /// Start of the chunk stream in the stored file.
    pub compressed_offset: u32,
    /// Stored length of the chunk stream.
    pub compressed_size: u32,
}

impl CompressedChunk {
    fn read<R: Read>(r: &mut R) -> FormatResult<Self> {
        Ok(Self {
            decompressed_offset: r.read_u32::<LE>()?,
            decompressed_size: r.read_u32::<LE>()?,
            compressed_offset: r.read_u32::<LE>()?,
            compressed_size: r.read_u32::<LE>()?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> FormatResult<()> {
        w.write_u32::<LE>(self.decompressed_offset)?;
        w.write_u32::<LE>(self.decompressed_size)?;
        w.write_u32::<LE>(self.compressed_offset)?;
        w.write_u32::<LE>(self.compressed_size)?;
        Ok(())
    }
}

/// One entry of the generation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationInfo {
    pub export_count: u32,
    pub name_count: u32,
    pub net_object_count: u32,
}

/// Decoded package summary.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageSummary {
    pub file_version: u16,
    pub licensee_version: u16,
    pub header_size: i32,
    pub folder_name: String,
    pub package_flags: PackageFlags,

    pub name_count: u32,
    pub name_offset: i32,
    pub export_count: u32,
    pub export_offset: i32,
    pub import_count: u32,
    pub import_offset: i32,
    pub depends_count: u32,
    pub depends_offset: i32,

    pub guid: Guid,
    pub generations: Vec<GenerationInfo>,
    pub engine_version: u32,
    pub cooker_version: u32,

    pub compression: CompressionFlags,
    pub compressed_chunks: Vec<CompressedChunk>,
    pub package_source: u32,
    pub additional_packages: Vec<String>,

    /// Present from [`VER_THUMBNAIL_TABLE`].
    pub thumbnail_table_offset: Option<i32>,
    /// Present from [`VER_CROSS_LEVEL_GUIDS`].
    pub cross_level_guid_offset: Option<i32>,
}

impl PackageSummary {
    /// A summary for a freshly authored package at the current version.
    pub fn new(folder_name: impl Into<String>) -> Self {
        Self {
            file_version: MAX_SUPPORTED_VERSION,
            licensee_version: 0,
            header_size: 0,
            folder_name: folder_name.into(),
            package_flags: PackageFlags::ALLOW_DOWNLOAD,
            name_count: 0,
            name_offset: 0,
            export_count: 0,
            export_offset: 0,
            import_count: 0,
            import_offset: 0,
            depends_count: 0,
            depends_offset: 0,
            guid: Guid::ZERO,
            generations: Vec::new(),
            engine_version: 0,
            cooker_version: 0,
            compression: CompressionFlags::empty(),
            compressed_chunks: Vec::new(),
            package_source: 0,
            additional_packages: Vec::new(),
            thumbnail_table_offset: Some(0),
            cross_level_guid_offset: Some(0),
        }
    }

    /// Decode a summary, failing fast on bad magic or an unsupported version.
    pub fn read<R: Read>(r: &mut R) -> FormatResult<Self> {
        let magic = r.read_u32::<LE>()?;
        if magic != PACKAGE_MAGIC {
            return Err(FormatError::BadMagic {
                expected: PACKAGE_MAGIC,
                found: magic,
            });
        }
        let file_version = r.read_u16::<LE>()?;
        let licensee_version = r.read_u16::<LE>()?;
        if !(MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&file_version) {
            return Err(FormatError::UnsupportedVersion {
                version: file_version,
                min: MIN_SUPPORTED_VERSION,
                max: MAX_SUPPORTED_VERSION,
            });
        }
        let header_size = r.read_i32::<LE>()?;
        let folder_name = r.read_fstring()?;
        let package_flags = PackageFlags::from_bits_retain(r.read_u32::<LE>()?);

        let name_count = read_count(r)?;
        let name_offset = r.read_i32::<LE>()?;
        let export_count = read_count(r)?;
        let export_offset = r.read_i32::<LE>()?;
        let import_count = read_count(r)?;
        let import_offset = r.read_i32::<LE>()?;
        let depends_count = read_count(r)?;
        let depends_offset = r.read_i32::<LE>()?;

        let guid = r.read_guid()?;

        let generation_count = r.read_i32::<LE>()?;
        if generation_count < 0 || generation_count as u32 > MAX_TABLE_COUNT {
            return Err(FormatError::Corrupt(format!(
                "generation count {} out of range",
                generation_count
            )));
        }
        let mut generations = Vec::with_capacity(generation_count as usize);
        for _ in 0..generation_count {
            generations.push(GenerationInfo {
                export_count: r.read_u32::<LE>()?,
                name_count: r.read_u32::<LE>()?,
                net_object_count: r.read_u32::<LE>()?,
            });
        }

        let engine_version = r.read_u32::<LE>()?;
        let cooker_version = r.read_u32::<LE>()?;

        let compression = CompressionFlags::from_bits_retain(r.read_u32::<LE>()?);
        let chunk_count = read_count(r)?;
        let mut compressed_chunks = Vec::with_capacity(chunk_count as usize);
        for _ in 0..chunk_count {
            compressed_chunks.push(CompressedChunk::read(r)?);
        }

        let package_source = r.read_u32::<LE>()?;

        let additional_count = read_count(r)?;
        let mut additional_packages = Vec::with_capacity(additional_count as usize);
        for _ in 0..additional_count {
            additional_packages.push(r.read_fstring()?);
        }

        let thumbnail_table_offset = if file_version >= VER_THUMBNAIL_TABLE {
            Some(r.read_i32::<LE>()?)
        } else {
            None
        };
        let cross_level_guid_offset = if file_version >= VER_CROSS_LEVEL_GUIDS {
            Some(r.read_i32::<LE>()?)
        } else {
            None
        };

        Ok(Self {
            file_version,
            licensee_version,
            header_size,
            folder_name,
            package_flags,
            name_count,
            name_offset,
            export_count,
            export_offset,
            import_count,
            import_offset,
            depends_count,
            depends_offset,
            guid,
            generations,
            engine_version,
            cooker_version,
            compression,
            compressed_chunks,
            package_source,
            additional_packages,
            thumbnail_table_offset,
            cross_level_guid_offset,
        })
    }

    /// Encode the summary.
    pub fn write<W: Write>(&self, w: &mut W) -> FormatResult<()> {
        w.write_u32::<LE>(PACKAGE_MAGIC)?;
        w.write_u16::<LE>(self.file_version)?;
        w.write_u16::<LE>(self.licensee_version)?;
        w.write_i32::<LE>(self.header_size)?;
        w.write_fstring(&self.folder_name)?;
        w.write_u32::<LE>(self.package_flags.bits())?;

        w.write_u32::<LE>(self.name_count)?;
        w.write_i32::<LE>(self.name_offset)?;
        w.write_u32::<LE>(self.export_count)?;
        w.write_i32::<LE>(self.export_offset)?;
        w.write_u32::<LE>(self.import_count)?;
        w.write_i32::<LE>(self.import_offset)?;
        w.write_u32::<LE>(self.depends_count)?;
        w.write_i32::<LE>(self.depends_offset)?;

        w.write_guid(&self.guid)?;

        w.write_i32::<LE>(self.generations.len() as i32)?;
        for generation in &self.generations {
            w.write_u32::<LE>(generation.export_count)?;
            w.write_u32::<LE>(generation.name_count)?;
            w.write_u32::<LE>(generation.net_object_count)?;
        }

        w.write_u32::<LE>(self.engine_version)?;
        w.write_u32::<LE>(self.cooker_version)?;

        w.write_u32::<LE>(self.compression.bits())?;
        w.write_u32::<LE>(self.compressed_chunks.len() as u32)?;
        for chunk in &self.compressed_chunks {
            chunk.write(w)?;
        }

        w.write_u32::<LE>(self.package_source)?;

        w.write_u32::<LE>(self.additional_packages.len() as u32)?;
        for name in &self.additional_packages {
            w.write_fstring(name)?;
        }

        if self.file_version >= VER_THUMBNAIL_TABLE {
            w.write_i32::<LE>(self.thumbnail_table_offset.unwrap_or(0))?;
        }
        if self.file_version >= VER_CROSS_LEVEL_GUIDS {
            w.write_i32::<LE>(self.cross_level_guid_offset.unwrap_or(0))?;
        }
        Ok(())
    }

    /// Serialized byte length of this summary as `write` emits it.
    pub fn serialized_len(&self) -> usize {
        let mut buf = Vec::with_capacity(256);
        // Writing to a Vec cannot fail.
        self.write(&mut buf).expect("in-memory summary write");
        buf.len()
    }

    /// True if the stored payload is compressed.
    pub fn is_compressed(&self) -> bool {
        !self.compression.is_empty()
    }

    /// A copy with the compression bits and chunk table cleared, i.e. the
    /// summary as it appears at the head of the logical image.
    pub fn logical(&self) -> Self {
        let mut logical = self.clone();
        logical.compression = CompressionFlags::empty();
        logical.compressed_chunks.clear();
        logical
            .package_flags
            .remove(PackageFlags::STORE_COMPRESSED);
        logical
    }
}

fn read_count<R: Read>(r: &mut R) -> FormatResult<u32> {
    let count = r.read_u32::<LE>()?;
    if count > MAX_TABLE_COUNT {
        return Err(FormatError::Corrupt(format!(
            "table count {} out of range",
            count
        )));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_summary() -> PackageSummary {
        let mut summary = PackageSummary::new("TestMaps");
        summary.guid = Guid([7; 16]);
        summary.generations.push(GenerationInfo {
            export_count: 2,
            name_count: 5,
            net_object_count: 2,
        });
        summary.engine_version = 4206;
        summary.name_count = 5;
        summary.name_offset = 0x80;
        summary.export_count = 2;
        summary.export_offset = 0x100;
        summary.import_count = 1;
        summary.import_offset = 0x140;
        summary.depends_count = 2;
        summary.depends_offset = 0x180;
        summary
    }

    #[test]
    fn test_summary_round_trip() {
        let summary = sample_summary();
        let mut buf = Vec::new();
        summary.write(&mut buf).unwrap();
        assert_eq!(buf.len(), summary.serialized_len());

        let back = PackageSummary::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_bad_magic_fails() {
        let mut buf = Vec::new();
        sample_summary().write(&mut buf).unwrap();
        buf[0] ^= 0xFF;
        let err = PackageSummary::read(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FormatError::BadMagic { .. }));
    }

    #[test]
    fn test_unsupported_version_fails() {
        let mut summary = sample_summary();
        summary.file_version = MAX_SUPPORTED_VERSION + 1;
        let mut buf = Vec::new();
        summary.write(&mut buf).unwrap();
        let err = PackageSummary::read(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_version_gated_offsets() {
        let mut summary = sample_summary();
        summary.file_version = VER_THUMBNAIL_TABLE;
        summary.thumbnail_table_offset = Some(0x2000);
        summary.cross_level_guid_offset = None;
        let mut buf = Vec::new();
        summary.write(&mut buf).unwrap();
        let back = PackageSummary::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.thumbnail_table_offset, Some(0x2000));
        assert_eq!(back.cross_level_guid_offset, None);
    }

    #[test]
    fn test_logical_clears_compression() {
        let mut summary = sample_summary();
        summary.compression = CompressionFlags::ZLIB;
        summary.package_flags |= PackageFlags::STORE_COMPRESSED;
        summary.compressed_chunks.push(CompressedChunk {
            decompressed_offset: 0x200,
            decompressed_size: 0x1000,
            compressed_offset: 0x200,
            compressed_size: 0x400,
        });
        let logical = summary.logical();
        assert!(!logical.is_compressed());
        assert!(logical.compressed_chunks.is_empty());
        assert!(!logical.package_flags.contains(PackageFlags::STORE_COMPRESSED));
    }
}
