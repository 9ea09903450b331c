use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::block::Block;
use crate::codec::Codec;
use crate::error::{IoResultExt, Result, VzipError};
use crate::format::ArchiveHeader;
use crate::frame::{read_framed, FRAME_PREFIX};

/// Random-access reader for VZIP archives.
///
/// # Open sequence
/// 1. Check the 11 magic bytes.
/// 2. Read the framed header: block count and one offset per block.
/// 3. Check that every offset lands inside the file, past the header.
///
/// # Access pattern
/// [`read_block`](Self::read_block) seeks directly to the record's offset and
/// reads that one framed record. No other records are touched.
pub struct ArchiveReader {
    file: BufReader<File>,
    path: PathBuf,
    header: ArchiveHeader,
    file_len: u64,
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).io_context(|| format!("opening archive {}", path.display()))?;
        let file_len = file
            .metadata()
            .io_context(|| format!("reading metadata of {}", path.display()))?
            .len();
        let mut file = BufReader::new(file);

        let header = ArchiveHeader::read_from(&mut file, file_len)?;
        let header_len = ArchiveHeader::encoded_len(header.block_count());

        for (index, &offset) in header.offsets().iter().enumerate() {
            if offset < header_len || offset + FRAME_PREFIX as u64 > file_len {
                return Err(VzipError::format(format!(
                    "block {index} offset {offset} is outside the record area \
                     ({header_len}..{file_len}); archive may be unfinished"
                )));
            }
        }

        Ok(Self {
            file,
            path,
            header,
            file_len,
        })
    }

    #[inline]
    pub fn block_count(&self) -> u32 {
        self.header.block_count()
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    pub fn offsets(&self) -> &[u64] {
        self.header.offsets()
    }

    /// Archive size on disk in bytes.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Read the (still compressed) record of block `index`.
    pub fn read_block(&mut self, index: u32) -> Result<Block> {
        let offset = self.header.offset(index).ok_or_else(|| {
            VzipError::internal(format!(
                "block index {} out of range (total {})",
                index,
                self.header.block_count()
            ))
        })?;

        self.file
            .seek(SeekFrom::Start(offset))
            .io_context(|| format!("seeking to block {} in {}", index, self.path.display()))?;
        let limit = self.file_len - offset - FRAME_PREFIX as u64;
        let record = read_framed(&mut self.file, limit)?;
        let block = Block::decode(&record)?;

        if block.index() != index {
            return Err(VzipError::format(format!(
                "header slot {} points at a record for block {}",
                index,
                block.index()
            )));
        }
        Ok(block)
    }

    /// Decode the original bytes of block `index` only.
    pub fn decompress_block(&mut self, index: u32, codec: &dyn Codec) -> Result<Vec<u8>> {
        let block = self.read_block(index)?;
        codec
            .decompress_block(block.payload())
            .map_err(|source| VzipError::Codec { index, source })
    }
}
