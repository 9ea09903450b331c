use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vzip_codecs::codec_by_name;
use vzip_core::config::default_workers;
use vzip_core::format::DEFAULT_BLOCK_SIZE;
use vzip_core::{ArchiveHeader, ArchiveReader, Codec, Mode, PipelineConfig, RunSummary};

/// In-flight bound used when the caller does not pass `--max-in-flight`.
const DEFAULT_MAX_IN_FLIGHT: usize = 64;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "vzip",
    about = "Parallel block compressor: compress, decompress, and randomly access VZIP archives",
    version
)]
struct Cli {
    /// Log pipeline progress at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PipelineArgs {
    /// Source file
    input: PathBuf,
    /// Destination file (must not exist)
    output: PathBuf,
    /// Codec to use: gzip | zstd | lz4 | passthrough
    #[arg(short, long, default_value = "gzip")]
    codec: String,
    /// Codec compression level (gzip 0–9, zstd 1–22)
    #[arg(long)]
    level: Option<i32>,
    /// Raw bytes per block
    #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
    /// Transform worker threads (default: 2 × cores)
    #[arg(short, long)]
    workers: Option<usize>,
    /// Blocks read but not yet written before the reader pauses
    #[arg(short, long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a VZIP archive
    Compress(PipelineArgs),
    /// Restore the original file from a VZIP archive
    Decompress(PipelineArgs),
    /// Print the archive header and block offsets
    Inspect {
        /// VZIP archive to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Decompress a single block by index
    ///
    /// Only the requested block is read from disk.
    ReadBlock {
        /// VZIP archive
        file: PathBuf,
        /// Zero-based block index to read
        #[arg(short, long)]
        index: u32,
        /// Codec the archive was written with
        #[arg(short, long, default_value = "gzip")]
        codec: String,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

/// The checks the pipeline leaves to its caller.
fn check_paths(input: &Path, output: &Path) -> anyhow::Result<()> {
    let meta = fs::metadata(input).with_context(|| format!("source file {:?}", input))?;
    if !meta.is_file() {
        anyhow::bail!("source {:?} is not a regular file", input);
    }
    if meta.len() == 0 {
        anyhow::bail!("source file {:?} is empty", input);
    }
    if output.exists() {
        anyhow::bail!("target {:?} already exists", output);
    }
    Ok(())
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_pipeline(args: PipelineArgs, mode: Mode) -> anyhow::Result<()> {
    check_paths(&args.input, &args.output)?;

    let codec = codec_by_name(&args.codec, args.level)?;
    let config = PipelineConfig::new(args.max_in_flight)
        .with_block_size(args.block_size)
        .with_workers(args.workers.unwrap_or_else(default_workers));

    let summary = vzip_core::run(&args.input, &args.output, mode, &config, codec)
        .with_context(|| format!("{} {:?} -> {:?}", mode, args.input, args.output))?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let secs = summary.elapsed.as_secs_f64().max(f64::EPSILON);
    eprintln!("  mode        : {}", summary.mode);
    eprintln!("  blocks      : {}", summary.block_count);
    eprintln!("  workers     : {}", summary.workers);
    eprintln!("  read        : {}", human_bytes(summary.bytes_read));
    eprintln!("  written     : {}", human_bytes(summary.bytes_written));
    eprintln!("  peak blocks : {}", summary.peak_in_flight);
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((summary.bytes_read as f64 / secs) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", summary.elapsed.as_secs_f64());
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let mut reader = ArchiveReader::open(&file)?;
    let block_count = reader.block_count();

    println!("=== VZIP archive: {:?} ===", file);
    println!();
    println!("  block count    : {}", block_count);
    println!(
        "  header size    : {}",
        human_bytes(ArchiveHeader::encoded_len(block_count))
    );
    println!("  file on disk   : {}", human_bytes(reader.file_len()));

    if show_blocks {
        println!();
        println!("  {:>8}  {:>14}  {:>12}", "block", "file offset", "stored");
        println!("  {}", "-".repeat(38));
        for index in 0..block_count {
            let offset = reader.offsets()[index as usize];
            let block = reader.read_block(index)?;
            println!(
                "  {:>8}  {:>14}  {:>12}",
                index,
                offset,
                human_bytes(block.len() as u64)
            );
        }
    }

    Ok(())
}

fn run_read_block(
    file: PathBuf,
    index: u32,
    codec: Arc<dyn Codec>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut reader = ArchiveReader::open(&file)?;
    let offset = reader
        .header()
        .offset(index)
        .with_context(|| format!("block {} out of range (total {})", index, reader.block_count()))?;
    tracing::info!(index, offset, "seeking to block");

    let raw = reader.decompress_block(index, codec.as_ref())?;

    match output {
        Some(path) => {
            fs::write(&path, &raw)?;
            eprintln!("  written {} to {:?}", human_bytes(raw.len() as u64), path);
        }
        None => {
            let preview = &raw[..raw.len().min(256)];
            println!("--- block {} ({} bytes, first {} shown) ---", index, raw.len(), preview.len());
            for (i, chunk) in preview.chunks(16).enumerate() {
                print!("  {:04x}  ", i * 16);
                for b in chunk {
                    print!("{:02x} ", b);
                }
                for _ in chunk.len()..16 {
                    print!("   ");
                }
                print!("  |");
                for b in chunk {
                    if b.is_ascii_graphic() || *b == b' ' {
                        print!("{}", *b as char);
                    } else {
                        print!(".");
                    }
                }
                println!("|");
            }
            if raw.len() > 256 {
                println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
            }
        }
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Compress(args) => run_pipeline(args, Mode::Compress),
        Commands::Decompress(args) => run_pipeline(args, Mode::Decompress),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::ReadBlock {
            file,
            index,
            codec,
            output,
        } => run_read_block(file, index, codec_by_name(&codec, None)?, output),
    }
}
