use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;
use parking_lot::Mutex;
use vcfstream::{
    Backend, BatchPolicy, MultiReader, ParallelProcessor, ParallelReader, ReaderConfig, VcfHeader,
    VcfReader, VcfRecord, DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_SIZE,
};

mod logging;

#[derive(Clone, Default)]
pub struct RecordCounter {
    // (thread) local variables
    local_records: usize,
    local_pass: usize,

    // global variables
    records: Arc<Mutex<usize>>,
    pass: Arc<Mutex<usize>>,
}
impl ParallelProcessor for RecordCounter {
    fn process_record<R: VcfRecord>(&mut self, record: R) -> vcfstream::Result<()> {
        self.local_records += 1;
        if record.filter() == b"PASS" {
            self.local_pass += 1;
        }
        Ok(())
    }

    fn on_batch_complete(&mut self) -> vcfstream::Result<()> {
        *self.records.lock() += self.local_records;
        *self.pass.lock() += self.local_pass;
        self.local_records = 0;
        self.local_pass = 0;
        Ok(())
    }
}

#[derive(Parser)]
#[clap(version, about = "Stream VCF files into record batches")]
struct Args {
    /// Input VCF paths (plain, gzip or zstd); several files are read in lockstep
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// Chunk source [auto, buffered, mapped, compressed]
    #[clap(short, long, default_value_t = Backend::Auto)]
    backend: Backend,

    /// Bytes pulled from the source per chunk
    #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Seal batches after this many records
    #[clap(long, conflicts_with = "batch_bytes")]
    batch_records: Option<usize>,

    /// Seal batches once their raw text reaches this many bytes
    #[clap(long)]
    batch_bytes: Option<usize>,

    /// Do not parse or store sample columns
    #[clap(long)]
    skip_samples: bool,

    /// Records borrow from one buffer per batch instead of owning their fields
    #[clap(long)]
    shared: bool,

    /// Batch raw lines and parse them in the worker threads
    #[clap(long)]
    light: bool,

    /// Threads to use [0: auto]
    #[clap(short = 'T', long, default_value_t = 0)]
    threads: usize,

    /// Increase log verbosity (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}
impl Args {
    fn config(&self) -> ReaderConfig {
        let policy = match (self.batch_records, self.batch_bytes) {
            (_, Some(bytes)) => BatchPolicy::Bytes(bytes),
            (Some(records), None) => BatchPolicy::Records(records),
            (None, None) => BatchPolicy::Records(DEFAULT_BATCH_SIZE),
        };
        ReaderConfig::default()
            .with_backend(self.backend)
            .with_chunk_size(self.chunk_size)
            .with_policy(policy)
            .store_samples(!self.skip_samples)
            .self_contained(!self.shared)
            .light(self.light)
    }
}

fn print_header(name: &str, header: &VcfHeader) {
    println!("{name}");
    println!("  format:\t{}", header.file_format().unwrap_or("unknown"));
    println!("  header entries:\t{}", header.num_header_entries());
    println!(
        "  samples:\t{} [{}]",
        header.num_samples(),
        header.samples().join(", ")
    );
}

fn count_single(args: &Args, config: ReaderConfig) -> Result<()> {
    let mut reader = VcfReader::from_path(&args.inputs[0], config)?;
    info!("Reading {} with {} backend", args.inputs[0].display(), reader.backend());
    print_header(&args.inputs[0].display().to_string(), reader.read_header()?);

    let counter = RecordCounter::default();
    let summary = reader.process_parallel(counter.clone(), args.threads)?;
    println!("  records:\t{}", counter.records.lock());
    println!("  passing:\t{}", counter.pass.lock());
    println!("  batches:\t{}", summary.batches);
    println!("  malformed:\t{}", summary.malformed);
    Ok(())
}

fn count_synchronized(args: &Args, config: ReaderConfig) -> Result<()> {
    let mut reader = MultiReader::spawn(&args.inputs, config, args.threads)?;
    info!(
        "Reading {} files {}",
        reader.num_files(),
        if reader.is_threaded() {
            "on worker threads"
        } else {
            "sequentially"
        }
    );
    let mut records = vec![0; reader.num_files()];
    let mut batches = vec![0; reader.num_files()];
    while let Some(round) = reader.next_round()? {
        for (lane, batch) in round.batches.iter().enumerate() {
            if batch.is_some() {
                batches[lane] += 1;
            }
        }
        reader.visit_round(&round, |lane, _| {
            records[lane] += 1;
            Ok(())
        })?;
    }
    for (lane, path) in args.inputs.iter().enumerate() {
        if let Some(header) = reader.header(lane) {
            print_header(&path.display().to_string(), header);
        }
        println!("  records:\t{}", records[lane]);
        println!("  batches:\t{}", batches[lane]);
        if let Some(summary) = reader.summary(lane) {
            println!("  malformed:\t{}", summary.malformed);
        }
    }
    println!("rounds:\t{}", reader.rounds());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logger(args.verbose);

    let config = args.config();
    config.validate()?;
    if args.inputs.len() == 1 {
        count_single(&args, config)
    } else {
        count_synchronized(&args, config)
    }
}
