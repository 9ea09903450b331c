pub mod block;
pub mod codec;
pub mod config;
pub mod error;
pub mod flow;
pub mod format;
pub mod frame;
pub mod pipeline;
pub mod queue;
pub mod reader;
pub mod reorder;
pub mod writer;

pub use block::Block;
pub use codec::Codec;
pub use config::{Mode, PipelineConfig};
pub use error::{ErrorKind, Result, VzipError};
pub use flow::FlowController;
pub use format::{ArchiveHeader, MAGIC};
pub use pipeline::{run, AbortHandle, Pipeline, RunSummary};
pub use queue::{HandoffQueue, QueueState};
pub use reader::ArchiveReader;
pub use reorder::ReorderBuffer;
pub use writer::ArchiveWriter;
