use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use vzip_core::Codec;

/// Gzip block codec.
///
/// Every block becomes one complete gzip member, so any block can be
/// inflated on its own. Ratio is lower than zstd but the output of a single
/// block is readable by any gzip tool.
///
/// Best for: interoperability, the default codec.
pub struct GzipCodec {
    level: Compression,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl GzipCodec {
    /// Compression level 0 (store) to 9 (best).
    pub fn new(level: u32) -> anyhow::Result<Self> {
        if level > 9 {
            anyhow::bail!("gzip level {} out of range 0–9", level);
        }
        Ok(Self {
            level: Compression::new(level),
        })
    }
}

impl Codec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), self.level);
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(compressed.len() * 2);
        GzDecoder::new(compressed).read_to_end(&mut raw)?;
        Ok(raw)
    }
}
