use crate::error::{Result, VzipError};

/// Size of the fixed part of a block record: index:i32 + size:i32.
pub const BLOCK_RECORD_PREFIX: usize = 8;

/// One indexed unit of file data moving through the pipeline.
///
/// A `Block` is owned by exactly one pipeline stage at a time; handing it to
/// the next stage moves it. Source blocks carry at most `block_size` raw
/// bytes, transformed blocks carry whatever the codec produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    index: u32,
    payload: Vec<u8>,
}

impl Block {
    pub fn new(index: u32, payload: Vec<u8>) -> Self {
        Self { index, payload }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Build the block that replaces this one after a transform.
    pub fn with_payload(&self, payload: Vec<u8>) -> Self {
        Self::new(self.index, payload)
    }

    /// Serialize as `[index:i32][size:i32][payload]`, little-endian.
    ///
    /// The record is not framed here; see [`crate::frame`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let index = i32::try_from(self.index)
            .map_err(|_| VzipError::internal(format!("block index {} exceeds i32", self.index)))?;
        let size = i32::try_from(self.payload.len()).map_err(|_| {
            VzipError::internal(format!(
                "block {} payload of {} bytes exceeds i32",
                self.index,
                self.payload.len()
            ))
        })?;

        let mut buf = Vec::with_capacity(BLOCK_RECORD_PREFIX + self.payload.len());
        buf.extend_from_slice(&index.to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Inverse of [`Block::encode`]. The declared size must match the bytes
    /// that follow exactly.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < BLOCK_RECORD_PREFIX {
            return Err(VzipError::format(format!(
                "block record is {} bytes, shorter than its {}-byte prefix",
                buf.len(),
                BLOCK_RECORD_PREFIX
            )));
        }
        let index = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let size = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let index = u32::try_from(index)
            .map_err(|_| VzipError::format(format!("negative block index {index}")))?;
        let size = usize::try_from(size)
            .map_err(|_| VzipError::format(format!("block {index} has negative size {size}")))?;

        let data = &buf[BLOCK_RECORD_PREFIX..];
        if data.len() != size {
            return Err(VzipError::format(format!(
                "block {} declares {} payload bytes but record holds {}",
                index,
                size,
                data.len()
            )));
        }

        Ok(Self::new(index, data.to_vec()))
    }
}
