//! Tagged property serialization.
//!
//! Object payloads begin with a stream of self-describing property records
//! terminated by the sentinel name `None`. Each record carries its property
//! name, type name, value size, and array index, so a loader can skip types
//! it does not understand. Unknown types are preserved as raw bytes and
//! written back verbatim, which keeps re-serialization loss-free.

use std::io::{Read, Seek, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use tracing::warn;

use crate::codec::{fstring_len, ReadExt, WriteExt};
use crate::error::{FormatError, FormatResult};
use crate::index::PackageIndex;
use crate::names::{NameRef, NameTable};

/// Terminating sentinel name.
pub const NONE_NAME: &str = "None";

/// A decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Byte(u8),
    Name(NameRef),
    Object(PackageIndex),
    Str(String),
    Struct { struct_name: NameRef, data: Vec<u8> },
    Array(Vec<u8>),
    /// A type this engine does not decode, preserved verbatim.
    Raw { type_name: String, data: Vec<u8> },
}

impl PropertyValue {
    /// The on-disk type name for this value.
    pub fn type_name(&self) -> &str {
        match self {
            PropertyValue::Bool(_) => "BoolProperty",
            PropertyValue::Int(_) => "IntProperty",
            PropertyValue::Float(_) => "FloatProperty",
            PropertyValue::Byte(_) => "ByteProperty",
            PropertyValue::Name(_) => "NameProperty",
            PropertyValue::Object(_) => "ObjectProperty",
            PropertyValue::Str(_) => "StrProperty",
            PropertyValue::Struct { .. } => "StructProperty",
            PropertyValue::Array(_) => "ArrayProperty",
            PropertyValue::Raw { type_name, .. } => type_name,
        }
    }

    /// Serialized size of the value region (excluding tag fields).
    fn serial_size(&self) -> usize {
        match self {
            PropertyValue::Bool(_) => 0,
            PropertyValue::Int(_) | PropertyValue::Float(_) | PropertyValue::Object(_) => 4,
            PropertyValue::Byte(_) => 1,
            PropertyValue::Name(_) => 8,
            PropertyValue::Str(s) => fstring_len(s),
            PropertyValue::Struct { data, .. } => data.len(),
            PropertyValue::Array(data) => data.len(),
            PropertyValue::Raw { data, .. } => data.len(),
        }
    }
}

/// One tagged property record.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: NameRef,
    pub array_index: u32,
    pub value: PropertyValue,
}

/// Read records until the `None` sentinel.
pub fn read_properties<R: Read + Seek>(
    r: &mut R,
    names: &NameTable,
) -> FormatResult<Vec<Property>> {
    let mut properties = Vec::new();
    loop {
        let name = NameRef::read(r)?;
        let name_text = names
            .get(name.index)
            .ok_or_else(|| FormatError::Corrupt(format!("property name index {}", name.index)))?;
        if name_text == NONE_NAME {
            return Ok(properties);
        }

        let type_ref = NameRef::read(r)?;
        let type_name = names
            .get(type_ref.index)
            .ok_or_else(|| FormatError::Corrupt(format!("property type index {}", type_ref.index)))?
            .to_string();
        let size = r.read_u32::<LE>()? as usize;
        let array_index = r.read_u32::<LE>()?;

        let value = match type_name.as_str() {
            "BoolProperty" => PropertyValue::Bool(r.read_u8()? != 0),
            "IntProperty" => PropertyValue::Int(r.read_i32::<LE>()?),
            "FloatProperty" => PropertyValue::Float(r.read_f32::<LE>()?),
            "ByteProperty" => PropertyValue::Byte(r.read_u8()?),
            "NameProperty" => PropertyValue::Name(NameRef::read(r)?),
            "ObjectProperty" => PropertyValue::Object(PackageIndex(r.read_i32::<LE>()?)),
            "StrProperty" => {
                let start = r.stream_position()?;
                let value = r.read_fstring()?;
                let consumed = (r.stream_position()? - start) as usize;
                if consumed != size {
                    return Err(FormatError::Corrupt(format!(
                        "StrProperty size {} does not match {} consumed bytes",
                        size, consumed
                    )));
                }
                PropertyValue::Str(value)
            }
            "StructProperty" => {
                let struct_name = NameRef::read(r)?;
                let mut data = vec![0u8; size];
                r.read_exact(&mut data)?;
                PropertyValue::Struct { struct_name, data }
            }
            "ArrayProperty" => {
                let mut data = vec![0u8; size];
                r.read_exact(&mut data)?;
                PropertyValue::Array(data)
            }
            other => {
                warn!(
                    property = names.resolve(name).unwrap_or_default(),
                    type_name = other,
                    size,
                    "skipping unknown property type"
                );
                let mut data = vec![0u8; size];
                r.read_exact(&mut data)?;
                PropertyValue::Raw {
                    type_name: other.to_string(),
                    data,
                }
            }
        };

        properties.push(Property {
            name,
            array_index,
            value,
        });
    }
}

/// Write records followed by the `None` sentinel.
///
/// Name and type strings are interned into `names`, so a save pass over a
/// package grows one shared table exactly as loading expects.
pub fn write_properties<W: Write>(
    w: &mut W,
    properties: &[Property],
    names: &mut NameTable,
) -> FormatResult<()> {
    for property in properties {
        property.name.write(w)?;
        let type_index = names.intern(property.value.type_name());
        NameRef::new(type_index).write(w)?;
        w.write_u32::<LE>(property.value.serial_size() as u32)?;
        w.write_u32::<LE>(property.array_index)?;

        match &property.value {
            PropertyValue::Bool(v) => w.write_u8(*v as u8)?,
            PropertyValue::Int(v) => w.write_i32::<LE>(*v)?,
            PropertyValue::Float(v) => w.write_f32::<LE>(*v)?,
            PropertyValue::Byte(v) => w.write_u8(*v)?,
            PropertyValue::Name(v) => v.write(w)?,
            PropertyValue::Object(v) => w.write_i32::<LE>(v.0)?,
            PropertyValue::Str(v) => w.write_fstring(v)?,
            PropertyValue::Struct { struct_name, data } => {
                struct_name.write(w)?;
                w.write_all(data)?;
            }
            PropertyValue::Array(data) => w.write_all(data)?,
            PropertyValue::Raw { data, .. } => w.write_all(data)?,
        }
    }
    let none = names.intern(NONE_NAME);
    NameRef::new(none).write(w)?;
    Ok(())
}

/// Fetch the first property with the given bare name.
pub fn find_property<'a>(
    properties: &'a [Property],
    names: &NameTable,
    name: &str,
) -> Option<&'a Property> {
    properties
        .iter()
        .find(|p| names.get(p.name.index).is_some_and(|n| n.eq_ignore_ascii_case(name)))
}
