//! Length-prefix framing: a 4-byte little-endian count followed by that many
//! bytes. Every framed blob can be located and read by its absolute offset
//! without touching its neighbours.

use std::io::{self, Read, Write};

use crate::error::{Result, VzipError};

pub const FRAME_PREFIX: usize = 4;

/// Write `blob` with its length prefix. Returns the number of bytes written.
pub fn write_framed<W: Write>(dst: &mut W, blob: &[u8]) -> Result<u64> {
    let len = i32::try_from(blob.len()).map_err(|_| {
        VzipError::internal(format!("framed blob of {} bytes exceeds i32", blob.len()))
    })?;
    dst.write_all(&len.to_le_bytes())?;
    dst.write_all(blob)?;
    Ok((FRAME_PREFIX + blob.len()) as u64)
}

/// Read one framed blob. A frame longer than `limit` bytes, or one that ends
/// before its declared length, is a format error.
pub fn read_framed<R: Read>(src: &mut R, limit: u64) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; FRAME_PREFIX];
    read_exact_or_truncated(src, &mut len_buf, "frame length prefix")?;

    let len = i32::from_le_bytes(len_buf);
    let len = u64::try_from(len)
        .map_err(|_| VzipError::format(format!("negative frame length {len}")))?;
    if len > limit {
        return Err(VzipError::format(format!(
            "frame declares {len} bytes but at most {limit} are available"
        )));
    }

    let mut blob = vec![0u8; len as usize];
    read_exact_or_truncated(src, &mut blob, "framed blob")?;
    Ok(blob)
}

/// `read_exact` that reports a short read as truncation rather than as I/O.
pub(crate) fn read_exact_or_truncated<R: Read>(
    src: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<()> {
    match src.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(VzipError::format(format!(
            "truncated {what}: expected {} bytes",
            buf.len()
        ))),
        Err(e) => Err(e.into()),
    }
}
