use std::io::Read;

use crate::error::{Result, VzipError};
use crate::frame::{read_exact_or_truncated, read_framed, write_framed, FRAME_PREFIX};

/// Magic bytes at offset 0 of every VZIP archive.
pub const MAGIC: &[u8; 11] = b"VZIP-BLOCKS";

/// Default raw bytes per block: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Most blocks one archive can index; the on-disk count is an `i32`.
pub const MAX_BLOCKS: u32 = i32::MAX as u32;

/// Header body: block_count:i32 followed by block_count × offset:i64.
const COUNT_SIZE: usize = 4;
const OFFSET_SIZE: usize = 8;

/// Number of blocks a source of `source_len` bytes splits into.
pub fn block_count_for(source_len: u64, block_size: usize) -> u64 {
    let block_size = block_size as u64;
    source_len.div_ceil(block_size)
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded archive header: one absolute file offset per block, index-aligned.
///
/// `offsets[i]` points at the length prefix of block record `i`. The encoded
/// size depends only on the number of blocks, so a zeroed placeholder can be
/// written first and overwritten in place once the real offsets are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    offsets: Vec<u64>,
}

impl ArchiveHeader {
    /// Build a header from per-block offsets.
    ///
    /// Fails with an internal error for more than [`MAX_BLOCKS`] offsets.
    pub fn new(offsets: Vec<u64>) -> Result<Self> {
        check_block_count(offsets.len())?;
        Ok(Self { offsets })
    }

    /// A header for `block_count` blocks with every offset zeroed.
    pub fn placeholder(block_count: u32) -> Result<Self> {
        check_block_count(block_count as usize)?;
        Ok(Self {
            offsets: vec![0; block_count as usize],
        })
    }

    #[inline]
    pub fn block_count(&self) -> u32 {
        // Every constructor caps the length at MAX_BLOCKS.
        self.offsets.len() as u32
    }

    #[inline]
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn offset(&self, index: u32) -> Option<u64> {
        self.offsets.get(index as usize).copied()
    }

    /// Total encoded length of a header for `block_count` blocks, magic and
    /// frame prefix included.
    pub fn encoded_len(block_count: u32) -> u64 {
        (MAGIC.len() + FRAME_PREFIX + COUNT_SIZE) as u64
            + block_count as u64 * OFFSET_SIZE as u64
    }

    /// Serialize as `[MAGIC][len:i32][block_count:i32][offset:i64 …]`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let count = self.block_count() as i32;

        let mut body = Vec::with_capacity(COUNT_SIZE + self.offsets.len() * OFFSET_SIZE);
        body.extend_from_slice(&count.to_le_bytes());
        for &offset in &self.offsets {
            let offset = i64::try_from(offset)
                .map_err(|_| VzipError::internal(format!("offset {offset} exceeds i64")))?;
            body.extend_from_slice(&offset.to_le_bytes());
        }

        let mut buf = Vec::with_capacity(Self::encoded_len(count as u32) as usize);
        buf.extend_from_slice(MAGIC);
        write_framed(&mut buf, &body)?;
        Ok(buf)
    }

    /// Deserialize from an in-memory buffer starting at the magic.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut src = buf;
        Self::read_from(&mut src, buf.len() as u64)
    }

    /// Read and validate a header from the current position of `src`.
    ///
    /// `limit` bounds the header body length so a corrupt length prefix cannot
    /// trigger an oversized allocation; pass the archive length.
    pub fn read_from<R: Read>(src: &mut R, limit: u64) -> Result<Self> {
        let mut magic = [0u8; MAGIC.len()];
        read_exact_or_truncated(src, &mut magic, "archive magic")?;
        if &magic != MAGIC {
            return Err(VzipError::format("bad magic bytes, not a VZIP archive"));
        }

        let body = read_framed(src, limit)?;
        Self::decode_body(&body)
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < COUNT_SIZE {
            return Err(VzipError::format("truncated header: missing block count"));
        }
        let count = i32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        let count = usize::try_from(count)
            .map_err(|_| VzipError::format(format!("negative block count {count}")))?;

        let expected = COUNT_SIZE + count * OFFSET_SIZE;
        if body.len() != expected {
            return Err(VzipError::format(format!(
                "header declares {} blocks ({} bytes) but holds {} bytes",
                count,
                expected,
                body.len()
            )));
        }

        let offsets = body[COUNT_SIZE..]
            .chunks_exact(OFFSET_SIZE)
            .map(|chunk| {
                let mut raw = [0u8; OFFSET_SIZE];
                raw.copy_from_slice(chunk);
                let offset = i64::from_le_bytes(raw);
                u64::try_from(offset)
                    .map_err(|_| VzipError::format(format!("negative block offset {offset}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(offsets)
    }
}

fn check_block_count(count: usize) -> Result<()> {
    if count > MAX_BLOCKS as usize {
        return Err(VzipError::internal(format!(
            "{count} blocks exceed the archive limit of {MAX_BLOCKS}"
        )));
    }
    Ok(())
}
