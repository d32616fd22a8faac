//! Package save and rewrite.
//!
//! Saving takes one of two paths:
//!
//! - **Clean**: no export object has been modified. When the requested
//!   compression matches the source, the stored bytes are returned verbatim
//!   (byte-exact round trip); otherwise the payload is recoded and nothing
//!   else changes.
//! - **Dirty**: modified exports are re-serialized and the summary and
//!   tables rewritten. Unchanged exports are byte-copied at their old
//!   offsets; changed exports go to the append cursor, or — with
//!   `preserve_offsets` — into the smallest hole that fits, keeping every
//!   unrelated export's offset stable across the save.
//!
//! A hole placement is trusted only if serializing the export twice yields
//! the same size; a non-deterministic serializer fails the save instead of
//! corrupting the file.

mod holes;

pub use holes::{Hole, HoleSet};

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::codec::CompressionFlags;
use crate::compress;
use crate::error::FormatError;
use crate::index::PackageIndex;
use crate::names::NameTable;
use crate::package::Package;
use crate::properties::write_properties;

/// Result type for save operations.
pub type SaveResult<T> = Result<T, SaveError>;

/// Errors raised by the save engine.
///
/// Every variant means the save produced nothing; the source file is never
/// half-written.
#[derive(Debug, Error)]
pub enum SaveError {
    /// Structural failure reading or re-encoding package data.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A modified export has no loaded payload to serialize.
    #[error("dirty export {object} is not loaded")]
    DirtyUnloaded { object: String },

    /// An export serialized to two different sizes; hole placement cannot
    /// be trusted.
    #[error("ambiguous object size for {object}: measured {first} bytes, wrote {second}")]
    AmbiguousObjectSize {
        object: String,
        first: usize,
        second: usize,
    },

    /// The rewritten summary no longer fits its slot.
    #[error("summary grew from {old} to {new} bytes and cannot be rewritten in place")]
    HeaderSlotOverflow { old: usize, new: usize },
}

/// Options controlling a save.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Compression of the produced bytes.
    pub compression: CompressionFlags,
    /// Keep unchanged exports' serial offsets stable (hole-reuse mode).
    pub preserve_offsets: bool,
    /// Block granularity when compressing.
    pub block_size: u32,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            compression: CompressionFlags::empty(),
            preserve_offsets: false,
            block_size: compress::DEFAULT_BLOCK_SIZE,
        }
    }
}

impl SaveOptions {
    pub fn compressed() -> Self {
        Self {
            compression: CompressionFlags::ZLIB,
            ..Self::default()
        }
    }

    pub fn with_preserve_offsets(mut self, preserve: bool) -> Self {
        self.preserve_offsets = preserve;
        self
    }
}

/// Serialize `package` to bytes according to `options`.
pub fn save_package(package: &Arc<Package>, options: &SaveOptions) -> SaveResult<Vec<u8>> {
    compress::check_supported(options.compression)?;
    let parallel = package
        .registry()
        .map(|r| r.config().parallel_codec)
        .unwrap_or(true);

    if !package.has_dirty_exports() {
        return save_clean(package, options, parallel);
    }
    let image = rewrite_image(package, options)?;
    finish(package, image, options, parallel)
}

/// Fast path: nothing changed, so this is a byte copy or a recode.
fn save_clean(
    package: &Arc<Package>,
    options: &SaveOptions,
    parallel: bool,
) -> SaveResult<Vec<u8>> {
    if options.compression == package.source_compression() {
        debug!(package = package.name(), "clean save, verbatim copy");
        return Ok(package.raw_bytes().to_vec());
    }
    debug!(
        package = package.name(),
        compressed = !options.compression.is_empty(),
        "clean save, recoding payload"
    );
    finish(package, package.image().to_vec(), options, parallel)
}

fn finish(
    package: &Arc<Package>,
    image: Vec<u8>,
    options: &SaveOptions,
    parallel: bool,
) -> SaveResult<Vec<u8>> {
    if options.compression.is_empty() {
        return Ok(image);
    }
    let stored = compress::compress_image(&image, options.block_size, parallel)?;
    if let Some(registry) = package.registry() {
        registry.metrics().add_bytes_compressed(stored.len() as u64);
    }
    Ok(stored)
}

/// Structural rewrite of the logical image for a package with dirty exports.
fn rewrite_image(package: &Arc<Package>, options: &SaveOptions) -> SaveResult<Vec<u8>> {
    let tables = package.tables()?;
    let mut names = tables.names.clone();
    let mut exports = tables.exports.clone();
    let mut out = package.image().to_vec();

    let dirty: Vec<usize> = package
        .dirty_exports()
        .iter()
        .filter_map(|idx| idx.export())
        .collect();

    // Payloads are placed in ascending original-offset order to preserve
    // disk locality.
    let mut dirty_order = dirty.clone();
    dirty_order.sort_by_key(|&slot| exports[slot].serial_offset);

    // Measure every dirty export up front; in hole mode the old extents
    // become reusable holes before any placement happens.
    let mut scratches: Vec<(usize, Vec<u8>)> = Vec::with_capacity(dirty_order.len());
    let mut holes = HoleSet::new();
    for &slot in &dirty_order {
        let bytes = serialize_export(package, slot, &mut names)?;
        if options.preserve_offsets {
            holes.add(
                exports[slot].serial_offset as usize,
                exports[slot].serial_size as usize,
            );
        }
        scratches.push((slot, bytes));
    }

    for (slot, bytes) in scratches {
        let placed_at = if options.preserve_offsets {
            // The measured size must reproduce exactly before the bytes are
            // committed to a hole another export may sit flush against.
            let second = serialize_export(package, slot, &mut names)?;
            if second.len() != bytes.len() {
                let object = export_display_name(package, slot);
                return Err(SaveError::AmbiguousObjectSize {
                    object,
                    first: bytes.len(),
                    second: second.len(),
                });
            }
            match holes.take_best_fit(bytes.len()) {
                Some(offset) => {
                    out[offset..offset + bytes.len()].copy_from_slice(&bytes);
                    offset
                }
                None => append(&mut out, &bytes),
            }
        } else {
            append(&mut out, &bytes)
        };

        exports[slot].serial_offset = placed_at as u32;
        exports[slot].serial_size = bytes.len() as u32;
        debug!(
            export = slot,
            offset = placed_at,
            size = bytes.len(),
            "placed dirty export"
        );
    }

    // Serialize the tables and place them: back into the old table slot if
    // they still fit, relocated to end-of-file if they grew past it.
    let mut names_bytes = Vec::new();
    names.write(&mut names_bytes)?;
    let mut import_bytes = Vec::new();
    for import in &tables.imports {
        import.write(&mut import_bytes)?;
    }
    let mut export_bytes = Vec::new();
    for export in &exports {
        export.write(&mut export_bytes)?;
    }
    let mut depends_bytes = Vec::new();
    tables.depends.write(&mut depends_bytes)?;

    let summary = package.summary();
    let old_slot_start = [
        summary.name_offset,
        summary.import_offset,
        summary.export_offset,
        summary.depends_offset,
    ]
    .into_iter()
    .filter(|&o| o > 0)
    .min()
    .unwrap_or(0) as usize;
    let old_slot_end = tables
        .exports
        .iter()
        .filter(|e| e.serial_size > 0)
        .map(|e| e.serial_offset as usize)
        .min()
        .unwrap_or(package.image().len());
    let tables_len =
        names_bytes.len() + import_bytes.len() + export_bytes.len() + depends_bytes.len();

    let tables_start = if old_slot_start > 0 && old_slot_start + tables_len <= old_slot_end {
        old_slot_start
    } else {
        debug!(
            needed = tables_len,
            available = old_slot_end.saturating_sub(old_slot_start),
            "tables grew past their slot, relocating to end of file"
        );
        out.len()
    };

    let mut cursor = tables_start;
    let mut place = |out: &mut Vec<u8>, bytes: &[u8]| -> usize {
        let at = cursor;
        if cursor + bytes.len() > out.len() {
            out.resize(cursor + bytes.len(), 0);
        }
        out[cursor..cursor + bytes.len()].copy_from_slice(bytes);
        cursor += bytes.len();
        at
    };
    let name_offset = place(&mut out, &names_bytes);
    let import_offset = place(&mut out, &import_bytes);
    let export_offset = place(&mut out, &export_bytes);
    let depends_offset = place(&mut out, &depends_bytes);
    if tables_start == old_slot_start && cursor < old_slot_end {
        // The vacated tail of the old table slot must not leak stale
        // entries.
        out[cursor..old_slot_end].fill(0);
    }

    // Rewrite the summary in place; its serialized size is invariant under
    // everything this rewrite changes.
    let mut new_summary = summary.clone();
    new_summary.name_count = names.len() as u32;
    new_summary.name_offset = name_offset as i32;
    new_summary.import_count = tables.imports.len() as u32;
    new_summary.import_offset = import_offset as i32;
    new_summary.export_count = exports.len() as u32;
    new_summary.export_offset = export_offset as i32;
    new_summary.depends_count = tables.depends.entries.len() as u32;
    new_summary.depends_offset = depends_offset as i32;
    if tables_start == old_slot_start {
        new_summary.header_size = cursor as i32;
    }

    let old_len = summary.serialized_len();
    let mut summary_bytes = Vec::with_capacity(old_len);
    new_summary.write(&mut summary_bytes)?;
    if summary_bytes.len() != old_len {
        return Err(SaveError::HeaderSlotOverflow {
            old: old_len,
            new: summary_bytes.len(),
        });
    }
    out[..summary_bytes.len()].copy_from_slice(&summary_bytes);

    info!(
        package = package.name(),
        dirty = dirty.len(),
        preserve_offsets = options.preserve_offsets,
        bytes = out.len(),
        "rewrote package image"
    );
    Ok(out)
}

fn append(out: &mut Vec<u8>, bytes: &[u8]) -> usize {
    let at = out.len();
    out.extend_from_slice(bytes);
    at
}

/// Serialize one export's payload: properties, then the kind tail.
fn serialize_export(
    package: &Arc<Package>,
    slot: usize,
    names: &mut NameTable,
) -> SaveResult<Vec<u8>> {
    let index = PackageIndex::from_export(slot);
    let object = package
        .cached_export(index)
        .ok_or_else(|| SaveError::DirtyUnloaded {
            object: export_display_name(package, slot),
        })?;
    let properties = object
        .properties()
        .ok_or_else(|| SaveError::DirtyUnloaded {
            object: object.name().to_string(),
        })?;

    let mut buf = Vec::new();
    write_properties(&mut buf, &properties, names)?;
    object.with_kind(|kind| kind.serialize(&mut buf, names))?;
    Ok(buf)
}

fn export_display_name(package: &Arc<Package>, slot: usize) -> String {
    package
        .tables()
        .ok()
        .and_then(|t| {
            t.exports
                .get(slot)
                .and_then(|e| t.names.resolve(e.object_name))
        })
        .unwrap_or_else(|| format!("export:{}", slot))
}
