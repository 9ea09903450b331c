mod gzip_codec;
mod lz4_codec;
mod passthrough;
mod zstd_codec;

pub use gzip_codec::GzipCodec;
pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;
use vzip_core::Codec;

/// Names accepted by [`codec_by_name`].
pub const CODEC_NAMES: &[&str] = &["gzip", "zstd", "lz4", "passthrough"];

/// Resolve a codec from its CLI name.
///
/// `level` is passed to codecs that have one (gzip, zstd) and ignored by the
/// others; `None` selects the codec's default level. The archive does not
/// record which codec wrote it, so decompression must name the same codec.
pub fn codec_by_name(name: &str, level: Option<i32>) -> anyhow::Result<Arc<dyn Codec>> {
    match name {
        "gzip" | "gz" => Ok(Arc::new(match level {
            Some(level) => GzipCodec::new(u32::try_from(level)?)?,
            None => GzipCodec::default(),
        })),
        "zstd" | "z" => Ok(Arc::new(level.map(ZstdCodec::new).unwrap_or_default())),
        "lz4" | "l" => Ok(Arc::new(Lz4Codec)),
        "passthrough" | "pass" | "none" => Ok(Arc::new(PassThroughCodec)),
        other => anyhow::bail!(
            "unknown codec '{}'. Valid options: {}",
            other,
            CODEC_NAMES.join(", ")
        ),
    }
}
