//! Class-specific payload tails.
//!
//! After the tagged property stream, an object's payload continues with a
//! kind-specific binary tail. The engine decodes a small closed set of kinds
//! and falls back to a verbatim byte capture for everything else, so any
//! object can be re-serialized without loss.

use std::any::Any;
use std::io::{Cursor, Read};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use tracing::trace;

use crate::error::{FormatError, FormatResult};
use crate::index::PackageIndex;
use crate::names::{NameRef, NameTable};

/// Bulk payload stored inline rather than at a deferred offset.
pub const BULK_INLINE: u32 = 0x0000_0001;

/// Serialization context for kind tails.
///
/// `image` is the whole decompressed package image, used to resolve deferred
/// bulk ranges during post-load.
pub struct SerialContext<'a> {
    pub names: &'a NameTable,
    pub image: &'a [u8],
    pub file_version: u16,
}

/// A class-specific payload tail.
pub trait ObjectKind: Send + Sync {
    fn kind_name(&self) -> &'static str;

    /// Decode the tail. The cursor starts immediately after the property
    /// stream and ends at the export's serial boundary.
    fn deserialize(&mut self, r: &mut Cursor<&[u8]>, ctx: &SerialContext<'_>) -> FormatResult<()>;

    /// Encode the tail.
    fn serialize(&self, w: &mut Vec<u8>, names: &mut NameTable) -> FormatResult<()>;

    /// Resolve deferred same-package data. Runs once, after `deserialize`.
    fn post_load(&mut self, _ctx: &SerialContext<'_>) -> FormatResult<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Verbatim tail capture for classes the engine has no decoder for.
#[derive(Debug, Default)]
pub struct GenericKind {
    pub tail: Vec<u8>,
}

impl ObjectKind for GenericKind {
    fn kind_name(&self) -> &'static str {
        "Generic"
    }

    fn deserialize(&mut self, r: &mut Cursor<&[u8]>, _ctx: &SerialContext<'_>) -> FormatResult<()> {
        self.tail.clear();
        r.read_to_end(&mut self.tail)?;
        Ok(())
    }

    fn serialize(&self, w: &mut Vec<u8>, _names: &mut NameTable) -> FormatResult<()> {
        w.extend_from_slice(&self.tail);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A class definition: flags plus the declared property field chain.
///
/// `linked` is the flattened chain (own fields after the super chain's),
/// built by the class bootstrap; it is derived state and never serialized.
#[derive(Debug, Default)]
pub struct ClassKind {
    pub class_flags: u32,
    pub property_names: Vec<NameRef>,
    pub linked: Vec<String>,
}

impl ObjectKind for ClassKind {
    fn kind_name(&self) -> &'static str {
        "Class"
    }

    fn deserialize(&mut self, r: &mut Cursor<&[u8]>, _ctx: &SerialContext<'_>) -> FormatResult<()> {
        self.class_flags = r.read_u32::<LE>()?;
        let count = r.read_u32::<LE>()?;
        if count as usize > 64 * 1024 {
            return Err(FormatError::Corrupt(format!(
                "class declares {} property fields",
                count
            )));
        }
        self.property_names = (0..count)
            .map(|_| NameRef::read(r))
            .collect::<FormatResult<_>>()?;
        Ok(())
    }

    fn serialize(&self, w: &mut Vec<u8>, _names: &mut NameTable) -> FormatResult<()> {
        w.write_u32::<LE>(self.class_flags)?;
        w.write_u32::<LE>(self.property_names.len() as u32)?;
        for name in &self.property_names {
            name.write(w)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A deferred or inline bulk byte range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkData {
    pub flags: u32,
    pub element_count: u32,
    pub size_on_disk: u32,
    pub offset_in_file: u32,
    /// Present after post-load (deferred) or deserialize (inline).
    pub data: Option<Vec<u8>>,
}

impl BulkData {
    fn read(r: &mut Cursor<&[u8]>) -> FormatResult<Self> {
        let flags = r.read_u32::<LE>()?;
        let element_count = r.read_u32::<LE>()?;
        let size_on_disk = r.read_u32::<LE>()?;
        let offset_in_file = r.read_u32::<LE>()?;
        let data = if flags & BULK_INLINE != 0 {
            let mut bytes = vec![0u8; size_on_disk as usize];
            r.read_exact(&mut bytes)?;
            Some(bytes)
        } else {
            None
        };
        Ok(Self {
            flags,
            element_count,
            size_on_disk,
            offset_in_file,
            data,
        })
    }

    fn write(&self, w: &mut Vec<u8>) -> FormatResult<()> {
        // Always emitted inline; deferred placement only survives byte-copy.
        let data = self.data.as_deref().unwrap_or(&[]);
        w.write_u32::<LE>(self.flags | BULK_INLINE)?;
        w.write_u32::<LE>(data.len() as u32)?;
        w.write_u32::<LE>(data.len() as u32)?;
        w.write_u32::<LE>(0)?;
        w.extend_from_slice(data);
        Ok(())
    }

    /// Pull a deferred range out of the package image.
    fn resolve(&mut self, image: &[u8]) -> FormatResult<()> {
        if self.data.is_some() || self.size_on_disk == 0 {
            if self.data.is_none() {
                self.data = Some(Vec::new());
            }
            return Ok(());
        }
        let start = self.offset_in_file as usize;
        let end = start + self.size_on_disk as usize;
        if end > image.len() {
            return Err(FormatError::Corrupt(format!(
                "bulk range {}..{} outside image of {} bytes",
                start,
                end,
                image.len()
            )));
        }
        self.data = Some(image[start..end].to_vec());
        Ok(())
    }
}

/// One texture mip level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub bulk: BulkData,
}

/// A texture: mip chain with bulk pixel data deferred until post-load.
#[derive(Debug, Default)]
pub struct TextureKind {
    pub mips: Vec<MipLevel>,
}

impl TextureKind {
    /// Raw bytes of mip `level`, if loaded and resolved.
    pub fn mip_data(&self, level: usize) -> Option<&[u8]> {
        self.mips.get(level).and_then(|m| m.bulk.data.as_deref())
    }
}

impl ObjectKind for TextureKind {
    fn kind_name(&self) -> &'static str {
        "Texture"
    }

    fn deserialize(&mut self, r: &mut Cursor<&[u8]>, _ctx: &SerialContext<'_>) -> FormatResult<()> {
        let count = r.read_u32::<LE>()?;
        if count as usize > 32 {
            return Err(FormatError::Corrupt(format!("{} mip levels", count)));
        }
        self.mips = (0..count)
            .map(|_| {
                Ok(MipLevel {
                    width: r.read_u32::<LE>()?,
                    height: r.read_u32::<LE>()?,
                    bulk: BulkData::read(r)?,
                })
            })
            .collect::<FormatResult<_>>()?;
        Ok(())
    }

    fn serialize(&self, w: &mut Vec<u8>, _names: &mut NameTable) -> FormatResult<()> {
        w.write_u32::<LE>(self.mips.len() as u32)?;
        for mip in &self.mips {
            w.write_u32::<LE>(mip.width)?;
            w.write_u32::<LE>(mip.height)?;
            mip.bulk.write(w)?;
        }
        Ok(())
    }

    fn post_load(&mut self, ctx: &SerialContext<'_>) -> FormatResult<()> {
        for mip in &mut self.mips {
            mip.bulk.resolve(ctx.image)?;
        }
        trace!(mips = self.mips.len(), "resolved texture bulk data");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A redirect stub left behind when an object moved to another package.
#[derive(Debug, Default)]
pub struct RedirectorKind {
    pub target: PackageIndex,
}

impl ObjectKind for RedirectorKind {
    fn kind_name(&self) -> &'static str {
        "ObjectRedirector"
    }

    fn deserialize(&mut self, r: &mut Cursor<&[u8]>, _ctx: &SerialContext<'_>) -> FormatResult<()> {
        self.target = PackageIndex(r.read_i32::<LE>()?);
        Ok(())
    }

    fn serialize(&self, w: &mut Vec<u8>, _names: &mut NameTable) -> FormatResult<()> {
        w.write_i32::<LE>(self.target.0)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_over<'a>(names: &'a NameTable, image: &'a [u8]) -> SerialContext<'a> {
        SerialContext {
            names,
            image,
            file_version: crate::codec::MAX_SUPPORTED_VERSION,
        }
    }

    #[test]
    fn test_generic_kind_captures_tail() {
        let names = NameTable::new();
        let bytes = [9u8, 8, 7, 6];
        let mut kind = GenericKind::default();
        kind.deserialize(&mut Cursor::new(&bytes[..]), &ctx_over(&names, &[]))
            .unwrap();
        assert_eq!(kind.tail, bytes);

        let mut out = Vec::new();
        kind.serialize(&mut out, &mut NameTable::new()).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_class_kind_round_trip() {
        let names = NameTable::new();
        let kind = ClassKind {
            class_flags: 0x42,
            property_names: vec![NameRef::new(3), NameRef { index: 4, number: 1 }],
            linked: Vec::new(),
        };
        let mut buf = Vec::new();
        kind.serialize(&mut buf, &mut NameTable::new()).unwrap();

        let mut back = ClassKind::default();
        back.deserialize(&mut Cursor::new(buf.as_slice()), &ctx_over(&names, &[]))
            .unwrap();
        assert_eq!(back.class_flags, 0x42);
        assert_eq!(back.property_names, kind.property_names);
    }

    #[test]
    fn test_texture_deferred_bulk_resolves_in_post_load() {
        let names = NameTable::new();
        // Image with pixel bytes at offset 8.
        let image: Vec<u8> = (0..32).collect();

        let mut tail = Vec::new();
        tail.extend_from_slice(&1u32.to_le_bytes()); // one mip
        tail.extend_from_slice(&4u32.to_le_bytes()); // width
        tail.extend_from_slice(&4u32.to_le_bytes()); // height
        tail.extend_from_slice(&0u32.to_le_bytes()); // flags: deferred
        tail.extend_from_slice(&16u32.to_le_bytes()); // element count
        tail.extend_from_slice(&16u32.to_le_bytes()); // size on disk
        tail.extend_from_slice(&8u32.to_le_bytes()); // offset in file

        let mut kind = TextureKind::default();
        let ctx = ctx_over(&names, &image);
        kind.deserialize(&mut Cursor::new(tail.as_slice()), &ctx).unwrap();
        assert_eq!(kind.mip_data(0), None);

        kind.post_load(&ctx).unwrap();
        assert_eq!(kind.mip_data(0), Some(&image[8..24]));
    }

    #[test]
    fn test_texture_serializes_inline() {
        let names = NameTable::new();
        let kind = TextureKind {
            mips: vec![MipLevel {
                width: 2,
                height: 2,
                bulk: BulkData {
                    flags: 0,
                    element_count: 4,
                    size_on_disk: 4,
                    offset_in_file: 0,
                    data: Some(vec![1, 2, 3, 4]),
                },
            }],
        };
        let mut buf = Vec::new();
        kind.serialize(&mut buf, &mut NameTable::new()).unwrap();

        let mut back = TextureKind::default();
        back.deserialize(&mut Cursor::new(buf.as_slice()), &ctx_over(&names, &[]))
            .unwrap();
        // Inline round trip needs no post-load.
        assert_eq!(back.mip_data(0), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn test_bulk_out_of_range_is_corrupt() {
        let mut bulk = BulkData {
            flags: 0,
            element_count: 8,
            size_on_disk: 8,
            offset_in_file: 60,
            data: None,
        };
        let err = bulk.resolve(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, FormatError::Corrupt(_)));
    }

    #[test]
    fn test_redirector_round_trip() {
        let names = NameTable::new();
        let kind = RedirectorKind {
            target: PackageIndex(-3),
        };
        let mut buf = Vec::new();
        kind.serialize(&mut buf, &mut NameTable::new()).unwrap();
        let mut back = RedirectorKind::default();
        back.deserialize(&mut Cursor::new(buf.as_slice()), &ctx_over(&names, &[]))
            .unwrap();
        assert_eq!(back.target, PackageIndex(-3));
    }
}
