//! Chunked block compression pipeline.
//!
//! A compressed package stores its payload as a sequence of independently
//! compressed blocks grouped into chunks. Each chunk stream is prefixed by
//! its own header:
//!
//! ```text
//! u32 magic        u32 block_size
//! u32 total_compressed_size        u32 total_decompressed_size
//! N × (u32 compressed_size, u32 decompressed_size)
//! <concatenated zlib streams>
//! ```
//!
//! Every block's destination range in the decompressed image is known up
//! front and disjoint from every other block's range, so blocks are fanned
//! out across rayon for both directions of the codec. A corrupt block aborts
//! the whole operation; there is no partial-result recovery.

use std::io::{Cursor, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rayon::prelude::*;
use tracing::debug;

use crate::codec::{CompressedChunk, CompressionFlags, PackageFlags, PackageSummary};
use crate::error::{FormatError, FormatResult};

/// Chunk stream magic number (shared with the package magic).
pub const BLOCK_MAGIC: u32 = 0x9E2A_83C1;

/// Default block granularity: 128 KiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 0x2_0000;

/// Blocks per chunk when compressing.
const BLOCKS_PER_CHUNK: usize = 16;

/// One block's codec job: where its output lands and what feeds it.
struct BlockJob<'a> {
    dest_offset: usize,
    decompressed_size: usize,
    src: &'a [u8],
    src_offset: u64,
}

/// Reject compression settings the engine does not carry.
pub fn check_supported(flags: CompressionFlags) -> FormatResult<()> {
    if flags.is_empty() || flags == CompressionFlags::ZLIB {
        Ok(())
    } else {
        Err(FormatError::UnsupportedCompression { flags: flags.bits() })
    }
}

/// Rebuild the logical (uncompressed) image of a stored package.
///
/// The logical image starts with the summary re-encoded without compression
/// bits or chunk table; chunk `decompressed_offset`s address this layout.
/// Any stored bytes between the physical summary and the first chunk stream
/// are carried over verbatim (tables stored uncompressed).
pub fn decompress_image(
    raw: &[u8],
    summary: &PackageSummary,
    parallel: bool,
) -> FormatResult<Vec<u8>> {
    check_supported(summary.compression)?;
    let logical = summary.logical();
    let mut head = Vec::with_capacity(512);
    logical.write(&mut head)?;

    if summary.compressed_chunks.is_empty() {
        // Flagged compressed but chunkless: only the summary differs.
        let phys_len = summary.serialized_len();
        let mut image = head;
        image.extend_from_slice(&raw[phys_len.min(raw.len())..]);
        return Ok(image);
    }

    let image_len = summary
        .compressed_chunks
        .iter()
        .map(|c| c.decompressed_offset as usize + c.decompressed_size as usize)
        .max()
        .unwrap_or(head.len())
        .max(head.len());
    let mut image = vec![0u8; image_len];
    image[..head.len()].copy_from_slice(&head);

    // Verbatim region between the physical summary and the first chunk.
    let first = summary
        .compressed_chunks
        .iter()
        .min_by_key(|c| c.compressed_offset)
        .copied()
        .expect("chunk list checked non-empty");
    let phys_head_len = summary.serialized_len();
    if (first.compressed_offset as usize) < phys_head_len
        || (first.decompressed_offset as usize) < head.len()
    {
        return Err(FormatError::Corrupt(
            "first chunk overlaps the package summary".into(),
        ));
    }
    let gap_src = phys_head_len..first.compressed_offset as usize;
    let gap_dst = head.len()..first.decompressed_offset as usize;
    if gap_src.len() != gap_dst.len() {
        return Err(FormatError::Corrupt(format!(
            "stored gap ({} bytes) does not match logical gap ({} bytes)",
            gap_src.len(),
            gap_dst.len()
        )));
    }
    if gap_src.end > raw.len() || gap_dst.end > image.len() {
        return Err(FormatError::Corrupt("chunk table outside file bounds".into()));
    }
    image[gap_dst].copy_from_slice(&raw[gap_src]);

    let mut jobs = Vec::new();
    for chunk in &summary.compressed_chunks {
        collect_chunk_jobs(raw, chunk, image_len, &mut jobs)?;
    }

    let decoded = run_jobs(jobs, parallel)?;
    for (dest_offset, bytes) in decoded {
        image[dest_offset..dest_offset + bytes.len()].copy_from_slice(&bytes);
    }

    debug!(
        chunks = summary.compressed_chunks.len(),
        image_bytes = image.len(),
        "decompressed package image"
    );
    Ok(image)
}

/// Compress a logical image into stored-package bytes.
///
/// Everything after the logical summary is split into `block_size` blocks,
/// grouped into chunks, and zlib-coded in parallel. The returned bytes start
/// with the summary re-encoded with the ZLIB flag and the chunk table.
pub fn compress_image(image: &[u8], block_size: u32, parallel: bool) -> FormatResult<Vec<u8>> {
    if block_size == 0 {
        return Err(FormatError::Corrupt("block size must be non-zero".into()));
    }
    let logical = PackageSummary::read(&mut Cursor::new(image))?;
    let head_len = logical.serialized_len();
    let payload = &image[head_len.min(image.len())..];

    let mut physical = logical.clone();
    physical.compression = CompressionFlags::ZLIB;
    physical.package_flags |= PackageFlags::STORE_COMPRESSED;

    // Chunk/block geometry is a pure function of the payload size, so the
    // physical header length is known before any offsets are assigned.
    let chunk_span = block_size as usize * BLOCKS_PER_CHUNK;
    let chunk_sizes: Vec<usize> = split_sizes(payload.len(), chunk_span);
    physical.compressed_chunks = chunk_sizes
        .iter()
        .map(|_| CompressedChunk {
            decompressed_offset: 0,
            decompressed_size: 0,
            compressed_offset: 0,
            compressed_size: 0,
        })
        .collect();
    let phys_head_len = physical.serialized_len();

    // Compress every block of every chunk in one fan-out.
    let block_ranges: Vec<(usize, usize)> = split_ranges(payload.len(), block_size as usize);
    let encode = |range: &(usize, usize)| -> FormatResult<Vec<u8>> {
        compress_block(&payload[range.0..range.1])
    };
    let encoded: Vec<Vec<u8>> = if parallel {
        block_ranges
            .par_iter()
            .map(encode)
            .collect::<FormatResult<_>>()?
    } else {
        block_ranges
            .iter()
            .map(encode)
            .collect::<FormatResult<_>>()?
    };

    // Assemble chunk streams and the chunk table.
    let mut out = Vec::with_capacity(phys_head_len + payload.len() / 2);
    out.resize(phys_head_len, 0);
    let mut block_cursor = 0usize;
    let mut payload_cursor = 0usize;
    let mut chunks = Vec::with_capacity(chunk_sizes.len());
    for chunk_len in chunk_sizes {
        let block_count = chunk_len.div_ceil(block_size as usize);
        let chunk_blocks = &encoded[block_cursor..block_cursor + block_count];
        let chunk_ranges = &block_ranges[block_cursor..block_cursor + block_count];
        block_cursor += block_count;

        let total_compressed: usize = chunk_blocks.iter().map(Vec::len).sum();
        let compressed_offset = out.len();

        out.write_u32::<LE>(BLOCK_MAGIC)?;
        out.write_u32::<LE>(block_size)?;
        out.write_u32::<LE>(total_compressed as u32)?;
        out.write_u32::<LE>(chunk_len as u32)?;
        for (block, range) in chunk_blocks.iter().zip(chunk_ranges) {
            out.write_u32::<LE>(block.len() as u32)?;
            out.write_u32::<LE>((range.1 - range.0) as u32)?;
        }
        for block in chunk_blocks {
            out.write_all(block)?;
        }

        chunks.push(CompressedChunk {
            decompressed_offset: (head_len + payload_cursor) as u32,
            decompressed_size: chunk_len as u32,
            compressed_offset: compressed_offset as u32,
            compressed_size: (out.len() - compressed_offset) as u32,
        });
        payload_cursor += chunk_len;
    }

    physical.compressed_chunks = chunks;
    let mut head = Vec::with_capacity(phys_head_len);
    physical.write(&mut head)?;
    debug_assert_eq!(head.len(), phys_head_len);
    out[..head.len()].copy_from_slice(&head);

    debug!(
        payload_bytes = payload.len(),
        stored_bytes = out.len(),
        chunks = physical.compressed_chunks.len(),
        "compressed package image"
    );
    Ok(out)
}

/// Decode one chunk stream's headers into block jobs.
fn collect_chunk_jobs<'a>(
    raw: &'a [u8],
    chunk: &CompressedChunk,
    image_len: usize,
    jobs: &mut Vec<BlockJob<'a>>,
) -> FormatResult<()> {
    let start = chunk.compressed_offset as usize;
    let end = start + chunk.compressed_size as usize;
    if end > raw.len() {
        return Err(FormatError::Corrupt(format!(
            "chunk stream {}..{} outside file of {} bytes",
            start,
            end,
            raw.len()
        )));
    }
    let mut r = Cursor::new(&raw[start..end]);

    let magic = r.read_u32::<LE>()?;
    if magic != BLOCK_MAGIC {
        return Err(FormatError::CorruptBlock {
            offset: start as u64,
            reason: format!("bad block magic {:#010x}", magic),
        });
    }
    let block_size = r.read_u32::<LE>()?;
    let total_compressed = r.read_u32::<LE>()? as usize;
    let total_decompressed = r.read_u32::<LE>()? as usize;
    if block_size == 0 {
        return Err(FormatError::CorruptBlock {
            offset: start as u64,
            reason: "zero block size".into(),
        });
    }
    if total_decompressed != chunk.decompressed_size as usize {
        return Err(FormatError::CorruptBlock {
            offset: start as u64,
            reason: format!(
                "chunk table says {} decompressed bytes, stream says {}",
                chunk.decompressed_size, total_decompressed
            ),
        });
    }

    let block_count = total_decompressed.div_ceil(block_size as usize);
    let mut pairs = Vec::with_capacity(block_count);
    for _ in 0..block_count {
        let compressed = r.read_u32::<LE>()? as usize;
        let decompressed = r.read_u32::<LE>()? as usize;
        pairs.push((compressed, decompressed));
    }
    let compressed_sum: usize = pairs.iter().map(|p| p.0).sum();
    let decompressed_sum: usize = pairs.iter().map(|p| p.1).sum();
    if compressed_sum != total_compressed || decompressed_sum != total_decompressed {
        return Err(FormatError::CorruptBlock {
            offset: start as u64,
            reason: "block size table does not sum to chunk totals".into(),
        });
    }

    let mut src_cursor = start + r.position() as usize;
    let mut dest_offset = chunk.decompressed_offset as usize;
    for (compressed, decompressed) in pairs {
        if src_cursor + compressed > end || dest_offset + decompressed > image_len {
            return Err(FormatError::CorruptBlock {
                offset: src_cursor as u64,
                reason: "block extends past its chunk or image bounds".into(),
            });
        }
        jobs.push(BlockJob {
            dest_offset,
            decompressed_size: decompressed,
            src: &raw[src_cursor..src_cursor + compressed],
            src_offset: src_cursor as u64,
        });
        src_cursor += compressed;
        dest_offset += decompressed;
    }
    Ok(())
}

fn run_jobs(jobs: Vec<BlockJob<'_>>, parallel: bool) -> FormatResult<Vec<(usize, Vec<u8>)>> {
    let decode = |job: &BlockJob<'_>| -> FormatResult<(usize, Vec<u8>)> {
        let bytes = decompress_block(job.src, job.decompressed_size, job.src_offset)?;
        Ok((job.dest_offset, bytes))
    };
    if parallel {
        jobs.par_iter().map(decode).collect()
    } else {
        jobs.iter().map(decode).collect()
    }
}

/// zlib-code one block.
fn compress_block(data: &[u8]) -> FormatResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decode one block, verifying the advertised decompressed size.
fn decompress_block(src: &[u8], expected: usize, src_offset: u64) -> FormatResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(src)
        .read_to_end(&mut out)
        .map_err(|e| FormatError::CorruptBlock {
            offset: src_offset,
            reason: e.to_string(),
        })?;
    if out.len() != expected {
        return Err(FormatError::CorruptBlock {
            offset: src_offset,
            reason: format!("expected {} decompressed bytes, got {}", expected, out.len()),
        });
    }
    Ok(out)
}

/// Split `total` into spans of at most `span`, returning lengths.
fn split_sizes(total: usize, span: usize) -> Vec<usize> {
    split_ranges(total, span).iter().map(|r| r.1 - r.0).collect()
}

/// Split `0..total` into ranges of at most `span`.
fn split_ranges(total: usize, span: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(total.div_ceil(span.max(1)));
    let mut cursor = 0;
    while cursor < total {
        let end = (cursor + span).min(total);
        ranges.push((cursor, end));
        cursor = end;
    }
    ranges
}
