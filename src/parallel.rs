use std::thread;

use crossbeam_channel::bounded;
use log::debug;

use crate::{
    error::{ReadError, RecordError},
    Batch, ChunkSource, ReadSummary, Result, VcfReader, VcfRecord,
};

/// Resolves a requested thread count; zero means one per available core
pub(crate) fn resolve_threads(num_threads: usize) -> usize {
    if num_threads == 0 {
        num_cpus::get()
    } else {
        num_threads.min(num_cpus::get())
    }
}

/// Trait for VCF readers that can process records in parallel
///
/// This is implemented by the **reader** not by the **processor**.
/// For the **processor**, see the [`ParallelProcessor`] trait.
pub trait ParallelReader {
    /// Processes every record of the input across `num_threads` worker threads
    ///
    /// # Returns
    ///
    /// * `Ok(ReadSummary)` - If the whole input was read and processed
    /// * `Err(Error)` - If the read failed or a processor returned an error
    fn process_parallel<P: ParallelProcessor + 'static>(
        self,
        processor: P,
        num_threads: usize,
    ) -> Result<ReadSummary>;
}

/// Trait for types that can process records in parallel.
///
/// This is implemented by the **processor** not by the **reader**.
/// For the **reader**, see the [`ParallelReader`] trait.
pub trait ParallelProcessor: Send + Clone {
    /// Process a single record
    fn process_record<R: VcfRecord>(&mut self, record: R) -> Result<()>;

    /// Called when a thread finishes processing a batch
    /// Default implementation does nothing
    fn on_batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set the thread ID for this processor
    ///
    /// Each thread should call this method with its own unique ID.
    fn set_tid(&mut self, _tid: usize) {
        // Default implementation does nothing
    }

    /// Get the thread ID for this processor
    fn get_tid(&self) -> Option<usize> {
        None
    }
}

/// Runs one worker: processes batches until the queue closes
fn process_batches<P: ParallelProcessor>(
    processor: &mut P,
    batches: impl IntoIterator<Item = Batch>,
) -> Result<Vec<RecordError>> {
    let mut failed = Vec::new();
    for batch in batches {
        let mut errors = batch.for_each_record(|record| processor.process_record(record))?;
        failed.append(&mut errors);
        processor.on_batch_complete()?;
    }
    Ok(failed)
}

impl<S: ChunkSource> ParallelReader for VcfReader<S> {
    /// Reads batches on the calling thread and hands them to worker threads
    ///
    /// Each worker owns a clone of `processor` and receives whole batches through a
    /// bounded queue, so records within a batch are processed in order by one thread.
    /// Light batches are parsed by the workers; lines that fail there are added to the
    /// returned summary.
    ///
    /// A failing processor cancels the read and its error is returned. A read failure
    /// is returned as [`ReadError::Aborted`].
    fn process_parallel<P: ParallelProcessor + 'static>(
        mut self,
        processor: P,
        num_threads: usize,
    ) -> Result<ReadSummary> {
        let num_threads = resolve_threads(num_threads);
        let cancel = self.cancel_token();
        let (tx, rx) = bounded::<Batch>(self.config().queue_capacity);
        debug!("Processing with {num_threads} worker threads");

        let mut handles = Vec::with_capacity(num_threads);
        for tid in 0..num_threads {
            let mut processor = processor.clone();
            processor.set_tid(tid);
            let rx = rx.clone();
            let cancel = cancel.clone();
            handles.push(thread::spawn(move || {
                let result = process_batches(&mut processor, rx);
                if result.is_err() {
                    cancel.cancel();
                }
                result
            }));
        }
        drop(rx);

        let produced = loop {
            match self.next_batch() {
                Ok(Some(batch)) => {
                    // every worker has exited
                    if tx.send(batch).is_err() {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        drop(tx);

        let batches = self.batches_emitted();
        let mut summary = self.into_summary();
        let mut worker_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(errors)) => summary.merge_errors(errors),
                Ok(Err(e)) => {
                    worker_error.get_or_insert(e);
                }
                Err(_) => {
                    worker_error.get_or_insert(ReadError::WorkerPanic.into());
                }
            }
        }
        if let Some(e) = worker_error {
            return Err(e);
        }
        if let Err(e) = produced {
            return Err(ReadError::Aborted {
                batches,
                source: Box::new(e),
            }
            .into());
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{error::Error, BatchPolicy, BufferedSource, ReaderConfig};

    #[derive(Clone, Default)]
    struct TestProcessor {
        pub n_records: Arc<Mutex<usize>>,
        pub positions: Arc<Mutex<Vec<u64>>>,
        pub n_batches: Arc<Mutex<usize>>,
        tid: Option<usize>,
    }
    impl ParallelProcessor for TestProcessor {
        fn process_record<R: VcfRecord>(&mut self, record: R) -> Result<()> {
            *self.n_records.lock() += 1;
            self.positions.lock().push(record.position());
            Ok(())
        }

        fn on_batch_complete(&mut self) -> Result<()> {
            *self.n_batches.lock() += 1;
            Ok(())
        }

        fn set_tid(&mut self, tid: usize) {
            self.tid = Some(tid);
        }

        fn get_tid(&self) -> Option<usize> {
            self.tid
        }
    }

    /// Fails on the record at a given position
    #[derive(Clone)]
    struct FailingProcessor {
        fail_at: u64,
    }
    impl ParallelProcessor for FailingProcessor {
        fn process_record<R: VcfRecord>(&mut self, record: R) -> Result<()> {
            if record.position() == self.fail_at {
                return Err(std::io::Error::other("processor failed").into());
            }
            Ok(())
        }
    }

    fn input(n_records: usize) -> Vec<u8> {
        let mut text = b"##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n"
            .to_vec();
        for pos in 1..=n_records {
            text.extend_from_slice(format!("chr1\t{pos}\t.\tA\tC\t.\tPASS\t.\tGT\t0/1\n").as_bytes());
        }
        text
    }

    fn reader(text: Vec<u8>, config: ReaderConfig) -> VcfReader<BufferedSource<Cursor<Vec<u8>>>> {
        let source = BufferedSource::with_chunk_size(Cursor::new(text), 256);
        VcfReader::from_source(source, config).unwrap()
    }

    #[test]
    fn test_parallel_processor() {
        for num_threads in [0, 1, 4] {
            let config = ReaderConfig::default().with_policy(BatchPolicy::Records(16));
            let processor = TestProcessor::default();
            let summary = reader(input(200), config)
                .process_parallel(processor.clone(), num_threads)
                .unwrap();
            assert_eq!(*processor.n_records.lock(), 200);
            assert_eq!(*processor.n_batches.lock(), 13);
            assert_eq!(summary.records, 200);
            assert_eq!(summary.batches, 13);

            let mut positions = processor.positions.lock().clone();
            positions.sort_unstable();
            assert_eq!(positions, (1..=200).collect::<Vec<u64>>());
        }
    }

    #[test]
    fn test_parallel_processor_shared_layout() {
        let config = ReaderConfig::default()
            .self_contained(false)
            .with_policy(BatchPolicy::Bytes(300));
        let processor = TestProcessor::default();
        let summary = reader(input(100), config)
            .process_parallel(processor.clone(), 2)
            .unwrap();
        assert_eq!(*processor.n_records.lock(), 100);
        assert!(summary.is_clean());
    }

    #[test]
    fn test_parallel_processor_light_batches() {
        let mut text = input(50);
        text.extend_from_slice(b"chr1\t51\t.\tA\n");
        let config = ReaderConfig::default()
            .light(true)
            .with_policy(BatchPolicy::Records(8));
        let processor = TestProcessor::default();
        let summary = reader(text, config)
            .process_parallel(processor.clone(), 3)
            .unwrap();
        assert_eq!(*processor.n_records.lock(), 50);
        assert_eq!(summary.records, 50);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.errors[0].line, 53);
    }

    #[test]
    fn test_parallel_processor_error() {
        let config = ReaderConfig::default().with_policy(BatchPolicy::Records(4));
        let result = reader(input(100), config).process_parallel(FailingProcessor { fail_at: 10 }, 2);
        match result {
            Err(Error::IoError(e)) => assert_eq!(e.to_string(), "processor failed"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_threads() {
        assert_eq!(resolve_threads(0), num_cpus::get());
        assert_eq!(resolve_threads(1), 1);
        assert!(resolve_threads(usize::MAX) <= num_cpus::get());
    }
}
