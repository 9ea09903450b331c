//! The block pipeline: one reader, N transform workers and one writer joined
//! by two [`HandoffQueue`]s and a [`FlowController`].
//!
//! ```text
//! reader ──▶ source queue ──▶ workers ×N ──▶ result queue ──▶ writer
//!    ▲                                                          │
//!    └──────────── FlowController (admit_read / admit_write) ◀──┘
//! ```
//!
//! Shutdown runs front to back: the reader closes the source queue at end of
//! input, the orchestrator closes the result queue once every worker has
//! drained it, and the writer finishes when the result queue runs dry. A
//! failure anywhere aborts the run: both queues are closed and the flow
//! controller is released so no role stays parked.

use std::any::Any;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::block::Block;
use crate::codec::Codec;
use crate::config::{Mode, PipelineConfig};
use crate::error::{IoResultExt, Result, VzipError};
use crate::flow::FlowController;
use crate::format::{block_count_for, MAX_BLOCKS};
use crate::queue::HandoffQueue;
use crate::reader::ArchiveReader;
use crate::reorder::ReorderBuffer;
use crate::writer::ArchiveWriter;

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mode: Mode,
    pub block_count: u32,
    pub workers: usize,
    /// Bytes consumed from the source (raw bytes, or compressed payloads).
    pub bytes_read: u64,
    /// Bytes in the target file.
    pub bytes_written: u64,
    /// Highest number of blocks read but not yet written at any moment.
    pub peak_in_flight: u64,
    pub elapsed: Duration,
}

/// State shared by every role of one run.
struct Shared {
    source: HandoffQueue<Block>,
    results: HandoffQueue<Block>,
    flow: FlowController,
    cancelled: AtomicBool,
    failure: Mutex<Option<VzipError>>,
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VzipError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn abort(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.source.close();
        self.results.close();
        self.flow.abort();
    }

    /// Record `err` as the run's result unless an earlier failure already
    /// is, then unwind every role.
    fn fail(&self, role: &'static str, err: VzipError) {
        if !matches!(err, VzipError::Cancelled) {
            warn!(role, error = %err, "pipeline role failed, aborting run");
            let mut failure = self
                .failure
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            failure.get_or_insert(err);
        }
        self.abort();
    }

    fn take_failure(&self) -> Option<VzipError> {
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Run one role body, turning its error or panic into a pipeline-wide
    /// abort.
    ///
    /// A panic is caught here, on the role's own thread, so the remaining
    /// roles are released before the orchestrator joins any of them.
    fn supervise<T>(&self, role: &'static str, body: impl FnOnce() -> Result<T>) -> Option<T> {
        debug!(role, "started");
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => {
                debug!(role, "finished");
                Some(value)
            }
            Ok(Err(err)) => {
                self.fail(role, err);
                None
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                self.fail(
                    role,
                    VzipError::internal(format!("{role} thread panicked: {message}")),
                );
                None
            }
        }
    }

    fn join<T>(&self, role: &'static str, handle: ScopedJoinHandle<'_, Option<T>>) -> Option<T> {
        match handle.join() {
            Ok(value) => value,
            Err(_) => {
                self.fail(role, VzipError::internal(format!("{role} thread panicked")));
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Cancels a running [`Pipeline`] from another thread.
///
/// Aborting closes both queues and releases the flow controller; every role
/// notices, stops, and the run returns [`VzipError::Cancelled`]. The partial
/// target file is left on disk.
#[derive(Clone)]
pub struct AbortHandle {
    shared: Arc<Shared>,
}

impl AbortHandle {
    pub fn abort(&self) {
        info!("pipeline abort requested");
        self.shared.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.is_cancelled()
    }
}

/// One compress or decompress pass over a single file.
pub struct Pipeline {
    config: PipelineConfig,
    codec: Arc<dyn Codec>,
    shared: Arc<Shared>,
}

/// Input side of a run, prepared before any thread starts.
enum Input {
    Raw { len: u64 },
    Archive(ArchiveReader),
}

impl Pipeline {
    /// Validate `config` and prepare the queues and flow controller.
    pub fn new(config: PipelineConfig, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;
        let flow = FlowController::new(config.max_in_flight)?;
        Ok(Self {
            config,
            codec,
            shared: Arc::new(Shared {
                source: HandoffQueue::new(),
                results: HandoffQueue::new(),
                flow,
                cancelled: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the pipeline to completion.
    ///
    /// `source` must exist and be non-empty; `target` must not exist yet.
    pub fn run(self, source: &Path, target: &Path, mode: Mode) -> Result<RunSummary> {
        let started = Instant::now();
        let source_len = fs::metadata(source)
            .io_context(|| format!("reading metadata of {}", source.display()))?
            .len();
        if source_len == 0 {
            return Err(VzipError::EmptySource(source.to_path_buf()));
        }

        let (input, block_count) = match mode {
            Mode::Compress => {
                let count = block_count_for(source_len, self.config.block_size);
                let count = u32::try_from(count)
                    .ok()
                    .filter(|&c| c <= MAX_BLOCKS)
                    .ok_or_else(|| {
                        VzipError::config(format!(
                            "{} bytes in {}-byte blocks exceeds the format's block limit",
                            source_len, self.config.block_size
                        ))
                    })?;
                (Input::Raw { len: source_len }, count)
            }
            Mode::Decompress => {
                let archive = ArchiveReader::open(source)?;
                let count = archive.block_count();
                (Input::Archive(archive), count)
            }
        };

        info!(
            %mode,
            codec = self.codec.name(),
            source = %source.display(),
            target = %target.display(),
            block_count,
            workers = self.config.workers,
            max_in_flight = self.config.max_in_flight,
            "pipeline started"
        );

        let shared = &*self.shared;
        let codec = &*self.codec;
        let block_size = self.config.block_size;
        let max_in_flight = self.config.max_in_flight;

        let (bytes_read, bytes_written) = thread::scope(|scope| {
            let writer = scope.spawn(move || {
                shared.supervise("writer", || match mode {
                    Mode::Compress => write_archive(shared, target, block_count),
                    Mode::Decompress => write_restored(shared, target, block_count, max_in_flight),
                })
            });

            let reader = scope.spawn(move || {
                shared.supervise("reader", || match input {
                    Input::Raw { len } => read_source(shared, source, len, block_size, block_count),
                    Input::Archive(archive) => read_archive(shared, archive),
                })
            });

            let workers: Vec<_> = (0..self.config.workers)
                .map(|_| scope.spawn(move || shared.supervise("worker", || work(shared, codec, mode))))
                .collect();

            let bytes_read = shared.join("reader", reader);
            debug!("input exhausted, waiting for workers");
            for worker in workers {
                shared.join("worker", worker);
            }
            shared.results.close();
            let bytes_written = shared.join("writer", writer);
            (bytes_read, bytes_written)
        });

        if let Some(err) = shared.take_failure() {
            return Err(err);
        }
        shared.check_cancelled()?;

        let (bytes_read, bytes_written) = bytes_read
            .zip(bytes_written)
            .ok_or_else(|| VzipError::internal("pipeline role finished without a result"))?;

        let summary = RunSummary {
            mode,
            block_count,
            workers: self.config.workers,
            bytes_read,
            bytes_written,
            peak_in_flight: shared.flow.peak_in_flight(),
            elapsed: started.elapsed(),
        };
        info!(
            %mode,
            block_count,
            bytes_read,
            bytes_written,
            peak_in_flight = summary.peak_in_flight,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pipeline finished"
        );
        Ok(summary)
    }
}

/// Run one full pass with a fresh [`Pipeline`].
pub fn run(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
    mode: Mode,
    config: &PipelineConfig,
    codec: Arc<dyn Codec>,
) -> Result<RunSummary> {
    Pipeline::new(config.clone(), codec)?.run(source.as_ref(), target.as_ref(), mode)
}

// ── Readers ────────────────────────────────────────────────────────────────

/// Split the raw source into `block_size` chunks with dense indices.
fn read_source(
    shared: &Shared,
    path: &Path,
    source_len: u64,
    block_size: usize,
    block_count: u32,
) -> Result<u64> {
    let mut file = File::open(path).io_context(|| format!("opening source {}", path.display()))?;
    let mut consumed = 0u64;

    for index in 0..block_count {
        shared.flow.admit_read()?;

        let len = (source_len - consumed).min(block_size as u64) as usize;
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .io_context(|| format!("reading block {} of {}", index, path.display()))?;
        consumed += len as u64;

        trace!(index, len, "read source block");
        shared.check_cancelled()?;
        shared.source.enqueue(Block::new(index, payload));
    }

    let mut extra = [0u8; 1];
    if file.read(&mut extra)? != 0 {
        return Err(VzipError::internal(format!(
            "{} grew past {} bytes while being read",
            path.display(),
            source_len
        )));
    }

    shared.source.close();
    Ok(consumed)
}

/// Load every block record of the archive in index order.
fn read_archive(shared: &Shared, mut archive: ArchiveReader) -> Result<u64> {
    let mut consumed = 0u64;
    for index in 0..archive.block_count() {
        shared.flow.admit_read()?;
        let block = archive.read_block(index)?;
        consumed += block.len() as u64;

        trace!(index, len = block.len(), "read archive block");
        shared.check_cancelled()?;
        shared.source.enqueue(block);
    }
    shared.source.close();
    Ok(consumed)
}

// ── Workers ────────────────────────────────────────────────────────────────

fn work(shared: &Shared, codec: &dyn Codec, mode: Mode) -> Result<()> {
    while let Some(block) = shared.source.try_dequeue() {
        shared.check_cancelled()?;

        let transformed = match mode {
            Mode::Compress => codec.compress_block(block.payload()),
            Mode::Decompress => codec.decompress_block(block.payload()),
        }
        .map_err(|source| VzipError::Codec {
            index: block.index(),
            source,
        })?;

        trace!(index = block.index(), from = block.len(), to = transformed.len(), "transformed block");
        shared.results.enqueue(block.with_payload(transformed));
    }
    Ok(())
}

// ── Writers ────────────────────────────────────────────────────────────────

/// Append compressed records in arrival order, then fix up the header.
fn write_archive(shared: &Shared, target: &Path, block_count: u32) -> Result<u64> {
    let mut writer = ArchiveWriter::create(target, block_count)?;

    while let Some(block) = shared.results.try_dequeue() {
        shared.check_cancelled()?;
        let offset = writer.append(&block)?;
        trace!(index = block.index(), offset, "appended block record");
        shared.flow.admit_write();
    }
    shared.check_cancelled()?;

    let written = writer.position();
    writer.finish()?;
    Ok(written)
}

/// Write decompressed payloads back in original index order.
fn write_restored(
    shared: &Shared,
    target: &Path,
    block_count: u32,
    max_pending: usize,
) -> Result<u64> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .io_context(|| format!("creating {}", target.display()))?;
    let mut out = BufWriter::new(file);
    let mut reorder = ReorderBuffer::new(block_count, max_pending);
    let mut written = 0u64;

    while let Some(block) = shared.results.try_dequeue() {
        shared.check_cancelled()?;
        reorder.insert(block.index(), block)?;

        while let Some(ready) = reorder.pop_ready() {
            out.write_all(ready.payload())
                .io_context(|| format!("writing block {} to {}", ready.index(), target.display()))?;
            written += ready.len() as u64;
            trace!(index = ready.index(), "restored block");
            shared.flow.admit_write();
        }
    }
    shared.check_cancelled()?;

    if !reorder.is_complete() {
        return Err(VzipError::internal(format!(
            "result queue closed at block {} of {} with {} blocks still pending",
            reorder.next_expected(),
            block_count,
            reorder.pending_len()
        )));
    }

    out.flush()
        .io_context(|| format!("flushing {}", target.display()))?;
    out.get_ref()
        .sync_all()
        .io_context(|| format!("syncing {}", target.display()))?;
    Ok(written)
}
