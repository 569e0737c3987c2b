//! # vcfstream
//!
//! Streaming, batching parser for VCF variant-call files.
//!
//! A [`VcfReader`] pulls fixed-size chunks from a plain, memory-mapped or
//! gzip/zstd-compressed file, reassembles lines split across chunks, runs them through
//! a line-oriented state machine and hands out sealed [`Batch`]es of records.
//!
//! ## Batch layouts
//!
//! * [`Layout::Owned`] - every [`Record`] owns its fields (the default)
//! * [`Layout::Shared`] - one text buffer per batch; records are [`RecordRef`]s
//!   borrowing it
//! * [`Layout::Light`] - raw data lines, parsed on demand with
//!   [`Batch::for_each_record`]
//!
//! ## Reading
//!
//! * Pull batches from a [`VcfReader`] with [`VcfReader::next_batch`]
//! * Read a file on a worker thread with [`BatchStream`]
//! * Fan records out to worker threads with [`ParallelReader::process_parallel`]
//! * Read several files in lockstep with [`MultiReader`]
//!
//! Lines that are structurally broken are skipped and reported in the
//! [`ReadSummary`]; I/O and decompression failures end the read.

mod config;
pub mod core;
pub mod error;
mod parallel;
pub mod parser;
pub mod reassemble;
mod reader;
pub mod source;
mod sync;

pub use config::{ReaderConfig, DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_CAPACITY};
pub use crate::core::{
    Batch, BatchIter, BatchPolicy, HeaderEntry, Layout, Record, RecordRef, Span, VcfHeader,
    VcfRecord, DEFAULT_BATCH_SIZE,
};
pub use error::{Error, IntoVcfError, Result};
pub use parallel::{ParallelProcessor, ParallelReader};
pub use reader::{BatchStream, CancelToken, ReadSummary, VcfReader, MAX_RECORDED_ERRORS};
pub use source::{Backend, BufferedSource, ChunkSource, DecompressSource, MappedSource, Source};
pub use sync::{MultiReader, Round};
