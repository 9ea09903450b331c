/// End-to-end tests: run the full reader → workers → writer pipeline against
/// real files and check the archive on disk and the restored bytes.
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use vzip_codecs::{GzipCodec, Lz4Codec, PassThroughCodec, ZstdCodec};
use vzip_core::format::MAX_BLOCKS;
use vzip_core::{
    ArchiveHeader, ArchiveReader, Block, Codec, ErrorKind, Mode, Pipeline, PipelineConfig,
    VzipError,
};

const MB: usize = 1024 * 1024;

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn source(&self, data: &[u8]) -> PathBuf {
        let path = self.path("source.bin");
        fs::write(&path, data).unwrap();
        path
    }
}

fn config(block_size: usize, workers: usize, max_in_flight: usize) -> PipelineConfig {
    PipelineConfig::new(max_in_flight)
        .with_block_size(block_size)
        .with_workers(workers)
}

fn compress(src: &Path, dst: &Path, cfg: &PipelineConfig, codec: Arc<dyn Codec>) {
    vzip_core::run(src, dst, Mode::Compress, cfg, codec).unwrap();
}

/// Compress then decompress `data`, returning the restored bytes.
fn round_trip(data: &[u8], cfg: &PipelineConfig, codec: Arc<dyn Codec>) -> Vec<u8> {
    let ws = Workspace::new();
    let src = ws.source(data);
    let archive = ws.path("archive.vzip");
    let restored = ws.path("restored.bin");

    compress(&src, &archive, cfg, codec.clone());
    vzip_core::run(&archive, &restored, Mode::Decompress, cfg, codec).unwrap();
    fs::read(&restored).unwrap()
}

/// Walk the record area frame by frame, ignoring the header, and return the
/// block index found in each record in file order.
fn record_indices_in_file_order(archive: &Path, block_count: u32) -> Vec<u32> {
    let bytes = fs::read(archive).unwrap();
    let mut pos = ArchiveHeader::encoded_len(block_count) as usize;
    let mut indices = Vec::new();
    while pos < bytes.len() {
        let len = i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        let record = &bytes[pos + 4..pos + 4 + len];
        indices.push(Block::decode(record).unwrap().index());
        pos += 4 + len;
    }
    assert_eq!(pos, bytes.len(), "records must tile the file exactly");
    indices
}

/// Passes blocks through unchanged after a random pause, so workers finish
/// in a different order on every run.
struct JitterCodec {
    rng: Mutex<StdRng>,
    max_delay_ms: u64,
}

impl JitterCodec {
    fn new(seed: u64, max_delay_ms: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            max_delay_ms,
        }
    }

    fn pause(&self) {
        let ms = self.rng.lock().unwrap().gen_range(0..=self.max_delay_ms);
        thread::sleep(Duration::from_millis(ms));
    }
}

impl Codec for JitterCodec {
    fn name(&self) -> &'static str {
        "jitter"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.pause();
        GzipCodec::default().compress_block(raw)
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.pause();
        GzipCodec::default().decompress_block(compressed)
    }
}

/// Fails on one chosen block.
struct FailOnBlock {
    poisoned: Vec<u8>,
}

impl Codec for FailOnBlock {
    fn name(&self) -> &'static str {
        "fail-on-block"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        if raw == self.poisoned.as_slice() {
            anyhow::bail!("refusing poisoned block");
        }
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}

/// Pass-through that takes a fixed time per block.
struct SlowCodec(Duration);

impl Codec for SlowCodec {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        thread::sleep(self.0);
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        thread::sleep(self.0);
        Ok(compressed.to_vec())
    }
}

/// Panics inside the codec, on the chosen direction only.
struct PanicCodec {
    on_compress: bool,
}

impl Codec for PanicCodec {
    fn name(&self) -> &'static str {
        "panic"
    }

    fn compress_block(&self, raw: &[u8]) -> anyhow::Result<Vec<u8>> {
        if self.on_compress {
            panic!("codec blew up on a {}-byte block", raw.len());
        }
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
        if !self.on_compress {
            panic!("codec blew up on a {}-byte record", compressed.len());
        }
        Ok(compressed.to_vec())
    }
}

/// Run the pipeline on a helper thread and fail the test if it does not
/// return within `limit`.
fn run_with_timeout(
    src: PathBuf,
    dst: PathBuf,
    mode: Mode,
    cfg: PipelineConfig,
    codec: Arc<dyn Codec>,
    limit: Duration,
) -> vzip_core::Result<vzip_core::RunSummary> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(vzip_core::run(&src, &dst, mode, &cfg, codec));
    });
    rx.recv_timeout(limit)
        .unwrap_or_else(|_| panic!("{mode} run did not return within {limit:?}"))
}

// ── round trips ───────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_gzip() {
    let data = compressible_bytes(5 * 64 * 1024 + 1234);
    let restored = round_trip(&data, &config(64 * 1024, 4, 8), Arc::new(GzipCodec::default()));
    assert_eq!(restored, data, "gzip round-trip should be byte-exact");
}

#[test]
fn test_roundtrip_zstd_and_lz4() {
    let data = pseudo_random_bytes(300_000, 0xDEAD_BEEF);
    let cfg = config(32 * 1024, 3, 4);
    assert_eq!(round_trip(&data, &cfg, Arc::new(ZstdCodec::default())), data);
    assert_eq!(round_trip(&data, &cfg, Arc::new(Lz4Codec)), data);
}

#[test]
fn test_roundtrip_tiny_blocks_single_worker() {
    // One byte per block, one worker, one block in flight: the tightest
    // possible configuration must still make progress.
    let data = pseudo_random_bytes(2_000, 7);
    let restored = round_trip(&data, &config(1, 1, 1), Arc::new(PassThroughCodec));
    assert_eq!(restored, data);
}

#[test]
fn test_roundtrip_more_workers_than_blocks() {
    let data = b"fits in a single partial block".to_vec();
    let restored = round_trip(&data, &config(MB, 16, 2), Arc::new(GzipCodec::default()));
    assert_eq!(restored, data);
}

// ── scenarios ─────────────────────────────────────────────────────────────

#[test]
fn test_ten_megabytes_in_one_megabyte_blocks() {
    let ws = Workspace::new();
    let data = compressible_bytes(10 * MB);
    let src = ws.source(&data);
    let archive = ws.path("archive.vzip");
    let restored = ws.path("restored.bin");
    let cfg = config(MB, 4, 8);
    let codec: Arc<dyn Codec> = Arc::new(GzipCodec::new(1).unwrap());

    let summary = vzip_core::run(&src, &archive, Mode::Compress, &cfg, codec.clone()).unwrap();
    assert_eq!(summary.block_count, 10);
    assert_eq!(summary.bytes_read, data.len() as u64);
    assert_eq!(summary.bytes_written, fs::metadata(&archive).unwrap().len());

    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.block_count(), 10);
    assert!(
        reader.file_len() < data.len() as u64,
        "gzip should shrink compressible input"
    );

    vzip_core::run(&archive, &restored, Mode::Decompress, &cfg, codec).unwrap();
    assert_eq!(fs::read(&restored).unwrap(), data);
}

#[test]
fn test_partial_last_block() {
    let ws = Workspace::new();
    let data = pseudo_random_bytes(10 * MB + MB / 2, 42);
    let src = ws.source(&data);
    let archive = ws.path("archive.vzip");
    let restored = ws.path("restored.bin");
    let cfg = config(MB, 4, 6);

    compress(&src, &archive, &cfg, Arc::new(PassThroughCodec));

    let mut reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.block_count(), 11);
    for index in 0..10 {
        assert_eq!(reader.read_block(index).unwrap().len(), MB);
    }
    let last = reader.decompress_block(10, &PassThroughCodec).unwrap();
    assert_eq!(last.len(), MB / 2);
    assert_eq!(last.as_slice(), &data[10 * MB..]);

    vzip_core::run(&archive, &restored, Mode::Decompress, &cfg, Arc::new(PassThroughCodec))
        .unwrap();
    assert_eq!(fs::read(&restored).unwrap(), data);
}

// ── archive layout ────────────────────────────────────────────────────────

#[test]
fn test_indices_are_dense() {
    let ws = Workspace::new();
    let block_size = 1000;
    // Not a multiple of the block size, so the last block is short.
    let data = pseudo_random_bytes(57 * block_size + 321, 3);
    let src = ws.source(&data);
    let archive = ws.path("archive.vzip");

    compress(&src, &archive, &config(block_size, 6, 5), Arc::new(PassThroughCodec));

    let mut indices = record_indices_in_file_order(&archive, 58);
    indices.sort_unstable();
    assert_eq!(indices, (0..58).collect::<Vec<u32>>());
}

#[test]
fn test_header_offsets_point_at_matching_records() {
    let ws = Workspace::new();
    let data = compressible_bytes(40 * 4096 + 17);
    let src = ws.source(&data);
    let archive = ws.path("archive.vzip");

    compress(&src, &archive, &config(4096, 8, 6), Arc::new(JitterCodec::new(1, 2)));

    let reader = ArchiveReader::open(&archive).unwrap();
    let offsets = reader.offsets().to_vec();
    assert_eq!(offsets.len(), 41);

    // Decode each record straight from the file, without the reader.
    let mut file = File::open(&archive).unwrap();
    for (i, &offset) in offsets.iter().enumerate() {
        file.seek(SeekFrom::Start(offset)).unwrap();
        let mut len = [0u8; 4];
        file.read_exact(&mut len).unwrap();
        let mut record = vec![0u8; i32::from_le_bytes(len) as usize];
        file.read_exact(&mut record).unwrap();
        assert_eq!(Block::decode(&record).unwrap().index(), i as u32);
    }
}

#[test]
fn test_random_access_reads_single_block() {
    const BLOCK: usize = 16 * 1024;
    let ws = Workspace::new();
    let data = pseudo_random_bytes(16 * BLOCK, 0xFEED);
    let src = ws.source(&data);
    let archive = ws.path("archive.vzip");

    compress(&src, &archive, &config(BLOCK, 4, 4), Arc::new(ZstdCodec::default()));

    let mut reader = ArchiveReader::open(&archive).unwrap();
    let raw = reader.decompress_block(12, &ZstdCodec::default()).unwrap();
    assert_eq!(raw.as_slice(), &data[12 * BLOCK..13 * BLOCK]);
}

// ── ordering and backpressure ─────────────────────────────────────────────

#[test]
fn test_output_identical_under_random_worker_delays() {
    let ws = Workspace::new();
    let data = pseudo_random_bytes(64 * 512 + 99, 11);
    let src = ws.source(&data);
    let cfg = config(512, 6, 8);

    let mut outputs = Vec::new();
    for seed in 0..4u64 {
        let archive = ws.path(&format!("archive-{seed}.vzip"));
        let restored = ws.path(&format!("restored-{seed}.bin"));
        compress(&src, &archive, &cfg, Arc::new(JitterCodec::new(seed, 3)));
        vzip_core::run(
            &archive,
            &restored,
            Mode::Decompress,
            &cfg,
            Arc::new(JitterCodec::new(seed + 100, 3)),
        )
        .unwrap();
        outputs.push(fs::read(&restored).unwrap());
    }

    for output in &outputs {
        assert_eq!(output, &data);
    }
}

#[test]
fn test_in_flight_blocks_stay_within_bound() {
    let ws = Workspace::new();
    let data = pseudo_random_bytes(200 * 256, 5);
    let src = ws.source(&data);
    let archive = ws.path("archive.vzip");
    let restored = ws.path("restored.bin");
    let max_in_flight = 3;
    let cfg = config(256, 4, max_in_flight);

    let summary = vzip_core::run(
        &src,
        &archive,
        Mode::Compress,
        &cfg,
        Arc::new(JitterCodec::new(9, 1)),
    )
    .unwrap();
    assert!(summary.peak_in_flight >= 1);
    assert!(
        summary.peak_in_flight <= max_in_flight as u64,
        "compress peak {} exceeded bound {}",
        summary.peak_in_flight,
        max_in_flight
    );

    let summary = vzip_core::run(
        &archive,
        &restored,
        Mode::Decompress,
        &cfg,
        Arc::new(JitterCodec::new(10, 1)),
    )
    .unwrap();
    assert!(summary.peak_in_flight <= max_in_flight as u64);
    assert_eq!(fs::read(&restored).unwrap(), data);
}

// ── failures ──────────────────────────────────────────────────────────────

#[test]
fn test_decompress_rejects_non_archive() {
    let ws = Workspace::new();
    let src = ws.source(&compressible_bytes(10_000));
    let target = ws.path("out.bin");

    let err = vzip_core::run(
        &src,
        &target,
        Mode::Decompress,
        &config(1024, 2, 2),
        Arc::new(GzipCodec::default()),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format, "got: {err}");
    assert!(!target.exists(), "no role should start on a bad archive");
}

#[test]
fn test_decompress_rejects_corrupted_record() {
    let ws = Workspace::new();
    let src = ws.source(&compressible_bytes(8 * 1024));
    let archive = ws.path("archive.vzip");
    compress(&src, &archive, &config(1024, 2, 2), Arc::new(PassThroughCodec));

    // Point block 3's frame at a size its record cannot satisfy.
    let mut bytes = fs::read(&archive).unwrap();
    let reader = ArchiveReader::open(&archive).unwrap();
    let offset = reader.offsets()[3] as usize;
    drop(reader);
    let size_field = offset + 4 + 4;
    bytes[size_field..size_field + 4].copy_from_slice(&5000i32.to_le_bytes());
    let corrupted = ws.path("corrupted.vzip");
    fs::write(&corrupted, &bytes).unwrap();

    let err = vzip_core::run(
        &corrupted,
        ws.path("out.bin"),
        Mode::Decompress,
        &config(1024, 2, 2),
        Arc::new(PassThroughCodec),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format, "got: {err}");
}

#[test]
fn test_codec_failure_aborts_run() {
    let ws = Workspace::new();
    let block_size = 100;
    let mut data = pseudo_random_bytes(50 * block_size, 21);
    let poisoned = vec![0xAB; block_size];
    data[7 * block_size..8 * block_size].copy_from_slice(&poisoned);
    let src = ws.source(&data);

    let err = vzip_core::run(
        &src,
        ws.path("archive.vzip"),
        Mode::Compress,
        &config(block_size, 3, 4),
        Arc::new(FailOnBlock { poisoned }),
    )
    .unwrap_err();
    match err {
        VzipError::Codec { index, .. } => assert_eq!(index, 7),
        other => panic!("expected codec error, got {other}"),
    }
}

#[test]
fn test_existing_target_is_an_io_error() {
    let ws = Workspace::new();
    let src = ws.source(&compressible_bytes(5_000));
    let target = ws.path("taken.vzip");
    fs::write(&target, b"occupied").unwrap();

    let err = vzip_core::run(
        &src,
        &target,
        Mode::Compress,
        &config(1024, 2, 2),
        Arc::new(PassThroughCodec),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io, "got: {err}");
    assert_eq!(fs::read(&target).unwrap(), b"occupied");
}

#[test]
fn test_empty_source_is_rejected() {
    let ws = Workspace::new();
    let src = ws.source(&[]);
    let err = vzip_core::run(
        &src,
        ws.path("archive.vzip"),
        Mode::Compress,
        &config(1024, 2, 2),
        Arc::new(PassThroughCodec),
    )
    .unwrap_err();
    assert!(matches!(err, VzipError::EmptySource(_)), "got: {err}");
}

#[test]
fn test_invalid_configuration_is_rejected_up_front() {
    let codec: Arc<dyn Codec> = Arc::new(PassThroughCodec);
    for cfg in [config(0, 2, 2), config(1024, 0, 2), config(1024, 2, 0)] {
        let err = Pipeline::new(cfg, codec.clone()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config, "got: {err}");
    }

    let err = "zip".parse::<Mode>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!("d".parse::<Mode>().unwrap(), Mode::Decompress);
}

#[test]
fn test_abort_unwinds_without_deadlock() {
    let ws = Workspace::new();
    let src = ws.source(&pseudo_random_bytes(500 * 128, 8));
    let archive = ws.path("archive.vzip");

    let pipeline = Pipeline::new(
        config(128, 2, 4),
        Arc::new(SlowCodec(Duration::from_millis(5))),
    )
    .unwrap();
    let handle = pipeline.abort_handle();

    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.abort();
    });

    let err = pipeline.run(&src, &archive, Mode::Compress).unwrap_err();
    aborter.join().unwrap();
    assert!(matches!(err, VzipError::Cancelled), "got: {err}");

    // The header was never finalized, so the partial archive is unreadable.
    let err = ArchiveReader::open(&archive).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_worker_panic_during_compress_fails_instead_of_hanging() {
    let ws = Workspace::new();
    let src = ws.source(&pseudo_random_bytes(6_400, 12));
    let archive = ws.path("archive.vzip");

    // One worker and two credits: the reader parks on the flow controller
    // right after the worker dies.
    let err = run_with_timeout(
        src,
        archive.clone(),
        Mode::Compress,
        config(64, 1, 2),
        Arc::new(PanicCodec { on_compress: true }),
        Duration::from_secs(10),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal, "got: {err}");
    assert!(err.to_string().contains("worker"), "got: {err}");

    let err = ArchiveReader::open(&archive).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_worker_panic_during_decompress_fails_instead_of_hanging() {
    let ws = Workspace::new();
    let src = ws.source(&compressible_bytes(6_400));
    let archive = ws.path("archive.vzip");
    compress(&src, &archive, &config(64, 2, 4), Arc::new(GzipCodec::default()));

    let err = run_with_timeout(
        archive,
        ws.path("restored.bin"),
        Mode::Decompress,
        config(64, 3, 2),
        Arc::new(PanicCodec { on_compress: false }),
        Duration::from_secs(10),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal, "got: {err}");
}

#[test]
fn test_block_count_over_format_limit_is_rejected_up_front() {
    let ws = Workspace::new();
    let src = ws.path("sparse.bin");
    // Sparse: one byte per block gives more blocks than an archive can index.
    File::create(&src)
        .unwrap()
        .set_len(u64::from(MAX_BLOCKS) + 1)
        .unwrap();
    let archive = ws.path("archive.vzip");

    let err = vzip_core::run(
        &src,
        &archive,
        Mode::Compress,
        &config(1, 2, 2),
        Arc::new(PassThroughCodec),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config, "got: {err}");
    assert!(!archive.exists());
}
