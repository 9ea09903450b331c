use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::block::Block;
use crate::error::{IoResultExt, Result, VzipError};
use crate::format::ArchiveHeader;
use crate::frame::write_framed;

/// Append-only writer for VZIP archives.
///
/// # Write contract
/// The block count must be known up front. Blocks may be appended in any
/// index order; each index exactly once. [`finish`](Self::finish) fails if a
/// slot was never filled.
///
/// # Format layout written
/// ```text
/// [MAGIC][HEADER: placeholder, all offsets zero]
/// [RECORD k] [RECORD j] ...            ← framed block records, arrival order
/// ← seek back to 0, overwrite header with real offsets (same length)
/// ```
pub struct ArchiveWriter {
    file: BufWriter<File>,
    path: PathBuf,
    offsets: Vec<u64>,
    filled: Vec<bool>,
    placeholder_len: u64,
    /// Current append position (mirrors the file cursor).
    current_offset: u64,
}

impl ArchiveWriter {
    /// Create a new archive at `path` sized for `block_count` blocks.
    ///
    /// Refuses to overwrite an existing file.
    pub fn create(path: impl AsRef<Path>, block_count: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let placeholder = ArchiveHeader::placeholder(block_count)?.encode()?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .io_context(|| format!("creating archive {}", path.display()))?;
        let mut file = BufWriter::new(file);
        file.write_all(&placeholder)
            .io_context(|| format!("writing placeholder header to {}", path.display()))?;

        let placeholder_len = placeholder.len() as u64;
        Ok(Self {
            file,
            path,
            offsets: vec![0; block_count as usize],
            filled: vec![false; block_count as usize],
            placeholder_len,
            current_offset: placeholder_len,
        })
    }

    pub fn block_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    /// Bytes written so far, header included.
    pub fn position(&self) -> u64 {
        self.current_offset
    }

    /// Append one framed block record and remember where it starts.
    ///
    /// Returns the absolute offset of the record's length prefix.
    pub fn append(&mut self, block: &Block) -> Result<u64> {
        let slot = block.index() as usize;
        match self.filled.get(slot) {
            None => {
                return Err(VzipError::internal(format!(
                    "block index {} outside archive of {} blocks",
                    block.index(),
                    self.offsets.len()
                )))
            }
            Some(true) => {
                return Err(VzipError::internal(format!(
                    "block {} written twice",
                    block.index()
                )))
            }
            Some(false) => {}
        }

        let record = block.encode()?;
        let offset = self.current_offset;
        let written = write_framed(&mut self.file, &record).map_err(|e| match e {
            VzipError::Io(source) => VzipError::IoContext {
                context: format!("appending block {} to {}", block.index(), self.path.display()),
                source,
            },
            other => other,
        })?;

        self.offsets[slot] = offset;
        self.filled[slot] = true;
        self.current_offset += written;
        Ok(offset)
    }

    /// Rewrite the header with the recorded offsets and flush to disk.
    pub fn finish(mut self) -> Result<ArchiveHeader> {
        if let Some(missing) = self.filled.iter().position(|filled| !filled) {
            return Err(VzipError::internal(format!(
                "block {} was never written ({} expected)",
                missing,
                self.offsets.len()
            )));
        }

        let header = ArchiveHeader::new(std::mem::take(&mut self.offsets))?;
        let bytes = header.encode()?;
        if bytes.len() as u64 != self.placeholder_len {
            return Err(VzipError::internal(format!(
                "final header is {} bytes but placeholder reserved {}",
                bytes.len(),
                self.placeholder_len
            )));
        }

        let path = self.path.clone();
        let ctx = || format!("finalizing header of {}", path.display());
        self.file.seek(SeekFrom::Start(0)).io_context(ctx)?;
        self.file.write_all(&bytes).io_context(ctx)?;
        self.file.flush().io_context(ctx)?;
        self.file.get_ref().sync_all().io_context(ctx)?;

        Ok(header)
    }
}
