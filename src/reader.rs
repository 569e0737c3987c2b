//! Single-file pipeline: source, reassembly, parsing and batching

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use log::{debug, trace, warn};

use crate::config::ReaderConfig;
use crate::core::{Batch, BatchAssembler, FieldSpans, HeaderEntry, RecordRef, Span, VcfHeader};
use crate::error::{ReadError, RecordError, Result};
use crate::parser::{ParseSink, ReaderStatus};
use crate::reassemble::CarryOver;
use crate::source::{Backend, ChunkSource, Source};

/// Maximum number of per-line errors kept in a [`ReadSummary`]
pub const MAX_RECORDED_ERRORS: usize = 1024;

/// Outcome of a completed read
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Records placed into batches
    pub records: usize,
    /// Batches sealed
    pub batches: usize,
    /// Lines skipped because of a structural error
    pub malformed: usize,
    /// The first [`MAX_RECORDED_ERRORS`] skipped lines
    pub errors: Vec<RecordError>,
}
impl ReadSummary {
    /// Counts a skipped line, keeping its details while below the cap
    pub fn record_error(&mut self, error: RecordError) {
        self.malformed += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            warn!("Skipping {error}");
            self.errors.push(error);
        }
    }

    /// Folds in lines that failed when a light batch was parsed
    ///
    /// Each of those lines was counted as a record when it was batched.
    pub fn merge_errors(&mut self, errors: impl IntoIterator<Item = RecordError>) {
        let before = self.malformed;
        for error in errors {
            self.records = self.records.saturating_sub(1);
            self.record_error(error);
        }
        if self.malformed != before {
            self.errors.sort_by_key(|error| error.line);
        }
    }

    /// True when no line was skipped
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.malformed == 0
    }
}

/// Shared flag that stops a read at its next chunk boundary
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Routes parser output into the header, the batch assembler and the output queue
struct PipelineSink<'a> {
    header: &'a mut VcfHeader,
    assembler: &'a mut BatchAssembler,
    queue: &'a mut VecDeque<Batch>,
    summary: &'a mut ReadSummary,
}
impl PipelineSink<'_> {
    fn enqueue(&mut self, batch: Option<Batch>) {
        if let Some(batch) = batch {
            debug!("Sealed {batch}");
            self.summary.batches += 1;
            self.queue.push_back(batch);
        }
    }
}
impl ParseSink for PipelineSink<'_> {
    fn file_format(&mut self, value: &[u8]) {
        self.header.set_file_format(value);
    }

    fn header_entry(&mut self, entry: HeaderEntry) {
        self.header.add_entry(entry);
    }

    fn samples(&mut self, samples: Vec<String>) {
        debug!(
            "Header complete: {} entries, {} samples",
            self.header.num_header_entries(),
            samples.len()
        );
        self.assembler.set_num_samples(samples.len());
        self.header.set_samples(samples);
    }

    fn record(&mut self, line: &[u8], fields: &FieldSpans, samples: &[Span]) {
        self.summary.records += 1;
        let sealed = self.assembler.push_record(line, fields, samples);
        self.enqueue(sealed);
    }

    fn raw_record(&mut self, line_number: usize, line: &[u8], last: bool) {
        self.summary.records += 1;
        let sealed = self.assembler.push_line(line_number, line, last);
        self.enqueue(sealed);
    }

    fn malformed(&mut self, error: RecordError) {
        self.summary.record_error(error);
    }
}

/// Streaming reader for one VCF file
///
/// Batches are pulled with [`VcfReader::next_batch`] (or by iterating the reader). Each
/// call reads only as many chunks as it takes to seal the next batch.
///
/// ```rust,no_run
/// use vcfstream::{ReaderConfig, VcfReader, VcfRecord};
///
/// let mut reader = VcfReader::from_path("calls.vcf.gz", ReaderConfig::default())?;
/// println!("{} samples", reader.read_header()?.num_samples());
/// while let Some(batch) = reader.next_batch()? {
///     for record in &batch {
///         let _ = (record.chromosome(), record.position());
///     }
/// }
/// # Ok::<(), vcfstream::Error>(())
/// ```
pub struct VcfReader<S: ChunkSource = Source> {
    source: S,
    config: ReaderConfig,
    path: Option<PathBuf>,
    status: ReaderStatus,
    carry: CarryOver,
    assembler: BatchAssembler,
    header: VcfHeader,

    /// Sealed batches awaiting consumption
    queue: VecDeque<Batch>,
    summary: ReadSummary,
    batches_emitted: usize,

    /// Set once the source is exhausted or has failed
    eof: bool,
    cancel: Option<CancelToken>,
}

impl VcfReader<Source> {
    /// Opens `path` with the backend chosen by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The configuration is invalid
    /// * The file cannot be opened or is not a regular file
    /// * Compression detection fails
    pub fn from_path<P: AsRef<Path>>(path: P, config: ReaderConfig) -> Result<Self> {
        config.validate()?;
        let source = Source::open(path.as_ref(), config.backend, config.chunk_size)?;
        let mut reader = Self::from_source(source, config)?;
        reader.path = Some(path.as_ref().to_path_buf());
        Ok(reader)
    }

    /// The backend the file was opened with
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.source.backend()
    }
}

impl<S: ChunkSource> VcfReader<S> {
    /// Builds a reader over an already opened source
    ///
    /// The source's own chunk size applies; `config.chunk_size` is only used when
    /// opening files.
    pub fn from_source(source: S, config: ReaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            path: None,
            status: ReaderStatus::new(config.store_samples, config.self_contained, config.light),
            carry: CarryOver::new(),
            assembler: BatchAssembler::new(config.policy, config.layout(), config.store_samples),
            header: VcfHeader::default(),
            queue: VecDeque::new(),
            summary: ReadSummary::default(),
            batches_emitted: 0,
            eof: false,
            cancel: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The header as parsed so far
    #[must_use]
    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    /// Reads until the `#CHROM` line has been parsed
    ///
    /// Returns an incomplete header if the input ends first.
    pub fn read_header(&mut self) -> Result<&VcfHeader> {
        while !self.status.header_complete() && !self.eof {
            self.pump()?;
        }
        Ok(&self.header)
    }

    /// Installs a token that cancels the read at the next chunk boundary
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = Some(token);
    }

    /// The installed cancel token, installing a fresh one if there is none
    pub(crate) fn cancel_token(&mut self) -> CancelToken {
        self.cancel.get_or_insert_with(CancelToken::new).clone()
    }

    /// Returns the next sealed batch, reading more input as needed
    ///
    /// Returns `Ok(None)` once the input is exhausted. After an error the reader is
    /// finished; batches returned before it remain valid and
    /// [`VcfReader::batches_emitted`] tells how many there were.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        loop {
            if let Some(batch) = self.pop_batch() {
                return Ok(Some(batch));
            }
            if self.eof {
                return Ok(None);
            }
            self.pump()?;
        }
    }

    /// Takes the oldest sealed batch without reading more input
    pub fn pop_batch(&mut self) -> Option<Batch> {
        let batch = self.queue.pop_front()?;
        self.batches_emitted += 1;
        Some(batch)
    }

    /// Number of sealed batches waiting in the queue
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.queue.len()
    }

    /// Number of batches handed out so far
    #[must_use]
    pub fn batches_emitted(&self) -> usize {
        self.batches_emitted
    }

    #[must_use]
    pub fn num_header_entries(&self) -> usize {
        self.header.num_header_entries()
    }

    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.header.num_samples()
    }

    /// Number of data lines accepted so far
    #[must_use]
    pub fn num_records(&self) -> usize {
        self.status.num_records()
    }

    /// Counts and errors gathered so far
    ///
    /// Lines of light batches are counted as records until they are parsed with
    /// [`VcfReader::visit_batch`].
    #[must_use]
    pub fn summary(&self) -> &ReadSummary {
        &self.summary
    }

    /// Visits every record of a batch from this reader
    ///
    /// Light lines that fail to parse are skipped and added to the summary.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first error returned by `visit`.
    pub fn visit_batch<F>(&mut self, batch: &Batch, visit: F) -> Result<()>
    where
        F: FnMut(RecordRef<'_>) -> Result<()>,
    {
        let errors = batch.for_each_record(visit)?;
        self.summary.merge_errors(errors);
        Ok(())
    }

    pub fn into_summary(self) -> ReadSummary {
        self.summary
    }

    /// Pulls one chunk and pushes it through the pipeline
    fn pump(&mut self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            self.eof = true;
            return Err(ReadError::Cancelled.into());
        }
        let Self {
            source,
            status,
            carry,
            assembler,
            header,
            queue,
            summary,
            eof,
            ..
        } = self;
        let chunk = match source.next_chunk() {
            Ok(chunk) => chunk,
            Err(e) => {
                *eof = true;
                return Err(e);
            }
        };
        trace!("Pulled a chunk of {} bytes", chunk.len());

        let mut sink = PipelineSink {
            header,
            assembler,
            queue,
            summary,
        };
        if chunk.is_empty() {
            carry.finish(|line| status.finish(line, &mut sink));
            let last = sink.assembler.finish();
            sink.enqueue(last);
            *eof = true;
            debug!(
                "End of input: {} records in {} batches, {} malformed lines",
                status.num_records(),
                sink.summary.batches,
                sink.summary.malformed
            );
        } else {
            carry.push(chunk, |block| status.consume(block, &mut sink));
        }
        Ok(())
    }
}

impl<S: ChunkSource> Iterator for VcfReader<S> {
    type Item = Result<Batch>;
    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

/// Batches of one file read on a dedicated worker thread
///
/// The worker runs ahead of the consumer by at most the configured queue capacity.
/// Dropping the stream cancels the worker and waits for it to stop.
pub struct BatchStream {
    header: VcfHeader,
    rx: Option<Receiver<Result<Batch>>>,
    handle: Option<JoinHandle<ReadSummary>>,
    cancel: CancelToken,
    received: usize,
    summary: Option<ReadSummary>,

    /// Light parse errors waiting for the worker's summary
    pending: Vec<RecordError>,
}

impl BatchStream {
    /// Opens `path` on a new thread and waits for its header
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or if the file cannot be
    /// opened or its header read.
    pub fn spawn<P: AsRef<Path>>(path: P, config: ReaderConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let cancel = CancelToken::new();
        let (header_tx, header_rx) = bounded::<Result<VcfHeader>>(1);
        let (tx, rx) = bounded(config.queue_capacity);

        let token = cancel.clone();
        let handle = thread::spawn(move || {
            // the source is opened here since decompressing readers are not `Send`
            let mut reader = match VcfReader::from_path(&path, config) {
                Ok(reader) => reader,
                Err(e) => {
                    let _ = header_tx.send(Err(e));
                    return ReadSummary::default();
                }
            };
            reader.set_cancel_token(token);
            let header = reader.read_header().cloned();
            let failed = header.is_err();
            let _ = header_tx.send(header);
            if failed {
                return reader.into_summary();
            }
            drop(header_tx);

            loop {
                match reader.next_batch() {
                    Ok(Some(batch)) => {
                        if tx.send(Ok(batch)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
            reader.into_summary()
        });

        let mut stream = Self {
            header: VcfHeader::default(),
            rx: Some(rx),
            handle: Some(handle),
            cancel,
            received: 0,
            summary: None,
            pending: Vec::new(),
        };
        match header_rx.recv() {
            Ok(Ok(header)) => {
                stream.header = header;
                Ok(stream)
            }
            Ok(Err(e)) => {
                stream.close()?;
                Err(e)
            }
            Err(_) => {
                stream.close()?;
                Err(ReadError::WorkerPanic.into())
            }
        }
    }

    #[must_use]
    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    /// Waits for the next batch
    ///
    /// A failure of the worker's read is returned as [`ReadError::Aborted`], carrying
    /// the number of batches received before it.
    pub fn recv(&mut self) -> Result<Option<Batch>> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(Ok(batch)) => {
                self.received += 1;
                Ok(Some(batch))
            }
            Ok(Err(e)) => {
                self.close()?;
                Err(ReadError::Aborted {
                    batches: self.received,
                    source: Box::new(e),
                }
                .into())
            }
            Err(_) => {
                self.close()?;
                Ok(None)
            }
        }
    }

    /// Takes a batch the worker has already queued, without waiting
    ///
    /// Returns `None` when nothing is queued or the worker has failed.
    pub(crate) fn try_recv(&mut self) -> Option<Batch> {
        match self.rx.as_ref()?.try_recv() {
            Ok(Ok(batch)) => {
                self.received += 1;
                Some(batch)
            }
            _ => None,
        }
    }

    /// Visits every record of a batch from this stream
    ///
    /// Light lines that fail to parse are skipped and added to the summary once the
    /// stream has ended.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first error returned by `visit`.
    pub fn visit_batch<F>(&mut self, batch: &Batch, visit: F) -> Result<()>
    where
        F: FnMut(RecordRef<'_>) -> Result<()>,
    {
        let errors = batch.for_each_record(visit)?;
        match self.summary.as_mut() {
            Some(summary) => summary.merge_errors(errors),
            None => self.pending.extend(errors),
        }
        Ok(())
    }

    /// Number of batches received so far
    #[must_use]
    pub fn batches_received(&self) -> usize {
        self.received
    }

    /// The worker's summary, available once the stream has ended
    #[must_use]
    pub fn summary(&self) -> Option<&ReadSummary> {
        self.summary.as_ref()
    }

    /// Asks the worker to stop at its next chunk boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn close(&mut self) -> Result<()> {
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            let mut summary = handle.join().map_err(|_| ReadError::WorkerPanic)?;
            summary.merge_errors(std::mem::take(&mut self.pending));
            self.summary = Some(summary);
        }
        Ok(())
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;
    fn next(&mut self) -> Option<Self::Item> {
        self.recv().transpose()
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = self.close();
    }
}
