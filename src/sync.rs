//! Reading several VCF files in lockstep

use std::path::Path;

use log::debug;

use crate::config::ReaderConfig;
use crate::core::{Batch, RecordRef, VcfHeader};
use crate::error::{ConfigError, ReadError, Result};
use crate::parallel::resolve_threads;
use crate::reader::{BatchStream, ReadSummary, VcfReader};

/// One file of a synchronized read
enum Lane {
    Local(Box<VcfReader>),
    Threaded(BatchStream),
}
impl Lane {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        match self {
            Self::Local(reader) => reader.next_batch(),
            Self::Threaded(stream) => stream.recv(),
        }
    }

    fn header(&self) -> &VcfHeader {
        match self {
            Self::Local(reader) => reader.header(),
            Self::Threaded(stream) => stream.header(),
        }
    }

    fn summary(&self) -> Option<&ReadSummary> {
        match self {
            Self::Local(reader) => Some(reader.summary()),
            Self::Threaded(stream) => stream.summary(),
        }
    }

    /// Takes a batch that is already sealed and queued, without reading further
    fn drain(&mut self) -> Option<Batch> {
        match self {
            Self::Local(reader) => reader.pop_batch(),
            Self::Threaded(stream) => stream.try_recv(),
        }
    }

    fn visit_batch<F>(&mut self, batch: &Batch, visit: F) -> Result<()>
    where
        F: FnMut(RecordRef<'_>) -> Result<()>,
    {
        match self {
            Self::Local(reader) => reader.visit_batch(batch, visit),
            Self::Threaded(stream) => stream.visit_batch(batch, visit),
        }
    }

    fn cancel(&self) {
        if let Self::Threaded(stream) = self {
            stream.cancel();
        }
    }
}

/// One batch per file, all taken at the same step of a synchronized read
#[derive(Debug)]
pub struct Round {
    /// Zero-based round number
    pub index: usize,
    /// One entry per file, in open order; `None` once that file is exhausted
    pub batches: Vec<Option<Batch>>,
}
impl Round {
    /// Number of files that contributed a batch to this round
    #[must_use]
    pub fn num_active(&self) -> usize {
        self.batches.iter().filter(|b| b.is_some()).count()
    }

    /// Total records across the round's batches
    #[must_use]
    pub fn num_records(&self) -> usize {
        self.batches.iter().flatten().map(Batch::len).sum()
    }
}

/// Advances one pipeline per file by exactly one batch per round
///
/// Round `i` of every file is delivered before round `i + 1` of any file. A fatal
/// failure in any file ends the whole read with [`ReadError::LaneFailed`]. The batches
/// the failing round had already taken stay available through
/// [`MultiReader::take_partial_round`], and batches still queued in the other files
/// through [`MultiReader::drain`].
pub struct MultiReader {
    lanes: Vec<Lane>,
    exhausted: Vec<bool>,
    rounds: usize,
    failed: Option<usize>,
    partial: Option<Round>,
}

impl MultiReader {
    /// Opens every file on the calling thread; rounds are read sequentially
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyFileList`] for an empty path list and
    /// [`ReadError::LaneFailed`] if any file cannot be opened or its header read.
    pub fn open<P: AsRef<Path>>(paths: &[P], config: ReaderConfig) -> Result<Self> {
        if paths.is_empty() {
            return Err(ConfigError::EmptyFileList.into());
        }
        let mut lanes = Vec::with_capacity(paths.len());
        for (lane, path) in paths.iter().enumerate() {
            let opened = VcfReader::from_path(path, config).and_then(|mut reader| {
                reader.read_header()?;
                Ok(reader)
            });
            match opened {
                Ok(reader) => lanes.push(Lane::Local(Box::new(reader))),
                Err(e) => return Err(lane_failed(lane, e)),
            }
        }
        Ok(Self::from_lanes(lanes))
    }

    /// Opens every file on its own worker thread
    ///
    /// Falls back to [`MultiReader::open`] when `num_threads` (zero meaning one per
    /// core) does not cover one thread per file.
    pub fn spawn<P: AsRef<Path>>(
        paths: &[P],
        config: ReaderConfig,
        num_threads: usize,
    ) -> Result<Self> {
        if paths.is_empty() {
            return Err(ConfigError::EmptyFileList.into());
        }
        let num_threads = resolve_threads(num_threads);
        if num_threads < paths.len() {
            debug!(
                "{} threads cannot cover {} files; reading sequentially",
                num_threads,
                paths.len()
            );
            return Self::open(paths, config);
        }
        let mut lanes = Vec::with_capacity(paths.len());
        for (lane, path) in paths.iter().enumerate() {
            match BatchStream::spawn(path, config) {
                Ok(stream) => lanes.push(Lane::Threaded(stream)),
                Err(e) => {
                    lanes.iter().for_each(Lane::cancel);
                    return Err(lane_failed(lane, e));
                }
            }
        }
        Ok(Self::from_lanes(lanes))
    }

    fn from_lanes(lanes: Vec<Lane>) -> Self {
        Self {
            exhausted: vec![false; lanes.len()],
            lanes,
            rounds: 0,
            failed: None,
            partial: None,
        }
    }

    #[must_use]
    pub fn num_files(&self) -> usize {
        self.lanes.len()
    }

    /// True when every file is read on its own thread
    #[must_use]
    pub fn is_threaded(&self) -> bool {
        self.lanes.iter().all(|lane| matches!(lane, Lane::Threaded(_)))
    }

    #[must_use]
    pub fn header(&self, lane: usize) -> Option<&VcfHeader> {
        self.lanes.get(lane).map(Lane::header)
    }

    pub fn headers(&self) -> impl Iterator<Item = &VcfHeader> {
        self.lanes.iter().map(Lane::header)
    }

    /// The read summary of one file
    ///
    /// Threaded files only report a summary once they are exhausted.
    #[must_use]
    pub fn summary(&self, lane: usize) -> Option<&ReadSummary> {
        self.lanes.get(lane).and_then(Lane::summary)
    }

    /// Number of rounds delivered so far
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// True once the file has delivered its last batch
    #[must_use]
    pub fn is_exhausted(&self, lane: usize) -> bool {
        self.exhausted.get(lane).copied().unwrap_or(true)
    }

    /// The file whose failure ended the read
    #[must_use]
    pub fn failed_lane(&self) -> Option<usize> {
        self.failed
    }

    /// Takes the next batch of every file
    ///
    /// Returns `Ok(None)` once all files are exhausted, and after a failure has been
    /// reported.
    pub fn next_round(&mut self) -> Result<Option<Round>> {
        if self.failed.is_some() {
            return Ok(None);
        }
        let mut batches = Vec::with_capacity(self.lanes.len());
        for lane in 0..self.lanes.len() {
            if self.exhausted[lane] {
                batches.push(None);
                continue;
            }
            match self.lanes[lane].next_batch() {
                Ok(Some(batch)) => batches.push(Some(batch)),
                Ok(None) => {
                    debug!("File {lane} exhausted after {} rounds", self.rounds);
                    self.exhausted[lane] = true;
                    batches.push(None);
                }
                Err(e) => {
                    self.failed = Some(lane);
                    self.exhausted[lane] = true;
                    self.lanes.iter().for_each(Lane::cancel);
                    batches.resize_with(self.lanes.len(), || None);
                    if batches.iter().any(Option::is_some) {
                        self.partial = Some(Round {
                            index: self.rounds,
                            batches,
                        });
                    }
                    return Err(lane_failed(lane, e));
                }
            }
        }
        if batches.iter().all(Option::is_none) {
            return Ok(None);
        }
        let round = Round {
            index: self.rounds,
            batches,
        };
        self.rounds += 1;
        Ok(Some(round))
    }

    /// Takes the batches the failed round had collected before the failure
    ///
    /// Files at or after the failed one have no batch in this round.
    pub fn take_partial_round(&mut self) -> Option<Round> {
        self.partial.take()
    }

    /// Takes a batch of `lane` that was sealed but not yet delivered
    ///
    /// Never reads more input. Meant for collecting what the surviving files had
    /// already produced when the read failed.
    pub fn drain(&mut self, lane: usize) -> Option<Batch> {
        self.lanes.get_mut(lane).and_then(Lane::drain)
    }

    /// Visits every record of a round, file by file
    ///
    /// Lines of light batches that fail to parse are skipped and added to the summary
    /// of their file.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first error returned by `visit`.
    pub fn visit_round<F>(&mut self, round: &Round, mut visit: F) -> Result<()>
    where
        F: FnMut(usize, RecordRef<'_>) -> Result<()>,
    {
        let lanes = self.lanes.iter_mut().zip(&round.batches).enumerate();
        for (lane, (reader, batch)) in lanes {
            if let Some(batch) = batch {
                reader.visit_batch(batch, |record| visit(lane, record))?;
            }
        }
        Ok(())
    }
}

impl Iterator for MultiReader {
    type Item = Result<Round>;
    fn next(&mut self) -> Option<Self::Item> {
        self.next_round().transpose()
    }
}

fn lane_failed(lane: usize, source: crate::Error) -> crate::Error {
    ReadError::LaneFailed {
        lane,
        source: Box::new(source),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::core::{BatchPolicy, VcfRecord};
    use crate::error::Error;

    fn vcf(sample: &str, n_records: usize) -> Vec<u8> {
        let mut text = format!(
            "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{sample}\n"
        )
        .into_bytes();
        for pos in 1..=n_records {
            text.extend_from_slice(format!("chr1\t{pos}\t.\tA\tC\t.\tPASS\t.\tGT\t0/1\n").as_bytes());
        }
        text
    }

    fn temp_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn config() -> ReaderConfig {
        ReaderConfig::default()
            .with_policy(BatchPolicy::Records(2))
            .with_chunk_size(64)
    }

    fn round_sizes(reader: &mut MultiReader) -> Vec<Vec<Option<usize>>> {
        std::iter::from_fn(|| reader.next_round().unwrap())
            .map(|round| round.batches.iter().map(|b| b.as_ref().map(Batch::len)).collect())
            .collect()
    }

    #[test]
    fn test_equal_files_advance_together() {
        let a = temp_with(&vcf("A", 5));
        let b = temp_with(&vcf("B", 5));
        let mut reader = MultiReader::open(&[a.path(), b.path()], config()).unwrap();
        assert_eq!(reader.num_files(), 2);
        assert_eq!(reader.header(1).map(VcfHeader::samples), Some(&["B".to_string()][..]));

        let mut index = 0;
        while let Some(round) = reader.next_round().unwrap() {
            assert_eq!(round.index, index);
            assert_eq!(round.num_active(), 2);
            let [Some(left), Some(right)] = &round.batches[..] else {
                panic!("both files should contribute");
            };
            let l: Vec<u64> = left.iter().map(|r| r.position()).collect();
            let r: Vec<u64> = right.iter().map(|r| r.position()).collect();
            assert_eq!(l, r);
            index += 1;
        }
        assert_eq!(index, 3);
        assert!(reader.next_round().unwrap().is_none());
    }

    #[test]
    fn test_shorter_file_reports_exhaustion() {
        let short = temp_with(&vcf("A", 3));
        let long = temp_with(&vcf("B", 7));
        let mut reader = MultiReader::open(&[short.path(), long.path()], config()).unwrap();
        assert_eq!(
            round_sizes(&mut reader),
            vec![
                vec![Some(2), Some(2)],
                vec![Some(1), Some(2)],
                vec![None, Some(2)],
                vec![None, Some(1)],
            ]
        );
        assert!(reader.is_exhausted(0));
        assert!(reader.is_exhausted(1));
        assert_eq!(reader.summary(1).map(|s| s.records), Some(7));
    }

    #[test]
    fn test_threaded_matches_sequential() {
        let files: Vec<NamedTempFile> = [4, 9, 1].iter().map(|&n| temp_with(&vcf("S", n))).collect();
        let paths: Vec<&Path> = files.iter().map(NamedTempFile::path).collect();
        let expected = round_sizes(&mut MultiReader::open(&paths, config()).unwrap());

        let mut threaded = MultiReader::spawn(&paths, config(), 3).unwrap();
        if num_cpus::get() >= 3 {
            assert!(threaded.is_threaded());
        }
        assert_eq!(round_sizes(&mut threaded), expected);
    }

    #[test]
    fn test_insufficient_threads_fall_back() {
        let a = temp_with(&vcf("A", 2));
        let b = temp_with(&vcf("B", 2));
        let reader = MultiReader::spawn(&[a.path(), b.path()], config(), 1).unwrap();
        assert!(!reader.is_threaded());
    }

    #[test]
    fn test_light_multi_file_read() {
        let a = temp_with(&vcf("A", 3));
        let b = temp_with(&vcf("B", 3));
        let mut reader = MultiReader::open(&[a.path(), b.path()], config().light(true)).unwrap();
        let round = reader.next_round().unwrap().unwrap();
        assert_eq!(round.num_records(), 4);
        let first = round.batches[0].as_ref().unwrap();
        assert_eq!(first.lines().count(), 2);
    }

    #[test]
    fn test_empty_file_list() {
        let paths: [&Path; 0] = [];
        assert!(matches!(
            MultiReader::open(&paths, config()),
            Err(Error::ConfigError(ConfigError::EmptyFileList))
        ));
    }

    #[test]
    fn test_missing_file_fails_its_lane() {
        let a = temp_with(&vcf("A", 2));
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.vcf");
        let result = MultiReader::open(&[a.path(), missing.as_path()], config());
        assert!(matches!(
            result,
            Err(Error::ReadError(ReadError::LaneFailed { lane: 1, .. }))
        ));
    }

    fn corrupt_gzip(text: &[u8]) -> NamedTempFile {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(text).unwrap();
        let mut gz = encoder.finish().unwrap();
        // break the CRC32 in the gzip trailer
        let crc = gz.len() - 8;
        gz[crc] ^= 0xff;
        temp_with(&gz)
    }

    #[test]
    fn test_mid_read_failure_fails_whole_read() {
        let good = temp_with(&vcf("A", 200));
        let bad = corrupt_gzip(&vcf("B", 200));

        let mut reader = MultiReader::open(&[good.path(), bad.path()], config()).unwrap();
        let error = loop {
            match reader.next_round() {
                Ok(Some(_)) => {}
                Ok(None) => panic!("the corrupt file should fail the read"),
                Err(e) => break e,
            }
        };
        assert!(matches!(
            error,
            Error::ReadError(ReadError::LaneFailed { lane: 1, .. })
        ));
        assert_eq!(reader.failed_lane(), Some(1));
        assert!(reader.is_exhausted(1));
        assert!(reader.next_round().unwrap().is_none());
    }

    #[test]
    fn test_failure_keeps_delivered_batches() {
        let good = temp_with(&vcf("A", 300));
        let bad = corrupt_gzip(&vcf("B", 200));
        let config = ReaderConfig::default()
            .with_policy(BatchPolicy::Records(1))
            .with_chunk_size(64);

        let mut reader = MultiReader::open(&[good.path(), bad.path()], config).unwrap();
        let mut positions = Vec::new();
        let failed_round = loop {
            match reader.next_round() {
                Ok(Some(round)) => {
                    if let Some(batch) = &round.batches[0] {
                        positions.extend(batch.iter().map(|r| r.position()));
                    }
                }
                Ok(None) => panic!("the corrupt file should fail the read"),
                Err(_) => break reader.rounds(),
            }
        };

        let partial = reader.take_partial_round().unwrap();
        assert_eq!(partial.index, failed_round);
        assert_eq!(partial.num_active(), 1);
        assert!(partial.batches[1].is_none());
        let batch = partial.batches[0].as_ref().unwrap();
        positions.extend(batch.iter().map(|r| r.position()));
        assert!(reader.take_partial_round().is_none());

        while let Some(batch) = reader.drain(0) {
            positions.extend(batch.iter().map(|r| r.position()));
        }
        assert!(reader.drain(1).is_none());

        // every record lane 0 parsed reached the caller, in order
        let parsed = reader.summary(0).map(|s| s.records).unwrap();
        assert!(parsed < 300);
        assert_eq!(positions, (1..=parsed as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_light_round_errors_reach_summary() {
        let mut broken = vcf("A", 3);
        broken.extend_from_slice(b"chr1\tXX\t.\tA\tC\t.\tPASS\t.\tGT\t0/1\n");
        let a = temp_with(&broken);
        let b = temp_with(&vcf("B", 4));
        let mut reader = MultiReader::open(&[a.path(), b.path()], config().light(true)).unwrap();

        let mut records = [0; 2];
        while let Some(round) = reader.next_round().unwrap() {
            reader
                .visit_round(&round, |lane, _| {
                    records[lane] += 1;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(records, [3, 4]);
        let summary = reader.summary(0).unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.errors[0].line, 6);
        assert!(reader.summary(1).unwrap().is_clean());
    }
}
