/// Per-block transform injected into the pipeline.
///
/// Each `Codec` implementation:
/// - Must compress/decompress individual blocks independently, with no
///   cross-block state. This is what lets every block of an archive be
///   decoded on its own after a single seek.
/// - Must be deterministic: the same input always yields the same output.
/// - Is shared by every worker thread, hence `Send + Sync`.
pub trait Codec: Send + Sync {
    /// Human-readable codec name for CLI display and logs.
    fn name(&self) -> &'static str;

    /// Compress a single independent block.
    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decompress a single independent block produced by `compress_block`.
    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>>;
}
