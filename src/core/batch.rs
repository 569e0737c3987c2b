use std::fmt;
use std::ops::Range;

use super::record::{FieldSpans, Record, RecordRef};
use super::utils::Span;
use crate::error::{RecordError, Result};
use crate::parser::{parse_record_line, truncated};

/// Default number of records per batch
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// When a batch under construction is sealed
///
/// The two thresholds are mutually exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Seal once the batch holds this many records
    Records(usize),
    /// Seal once the batch's raw text exceeds this many bytes
    ///
    /// Every line counts with one terminator byte. A sealed batch exceeds the threshold
    /// by less than its last line.
    Bytes(usize),
}
impl Default for BatchPolicy {
    fn default() -> Self {
        Self::Records(DEFAULT_BATCH_SIZE)
    }
}
impl BatchPolicy {
    #[must_use]
    pub fn threshold(&self) -> usize {
        match self {
            Self::Records(n) | Self::Bytes(n) => *n,
        }
    }

    fn is_satisfied(self, records: usize, bytes: usize) -> bool {
        match self {
            Self::Records(n) => records >= n,
            Self::Bytes(n) => bytes > n,
        }
    }
}

/// How a batch stores its records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Layout {
    /// Every record owns its fields
    #[default]
    Owned,
    /// One text buffer per batch, records hold spans into it
    Shared,
    /// Raw data lines, parsed on demand
    Light,
}
impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned => f.write_str("owned"),
            Self::Shared => f.write_str("shared"),
            Self::Light => f.write_str("light"),
        }
    }
}

/// Spans of one record in a shared batch
#[derive(Clone, Debug)]
struct SharedRecord {
    fields: FieldSpans,
    /// Range into the batch's sample span list
    samples: Range<usize>,
}

/// One unparsed line in a light batch
#[derive(Clone, Copy, Debug)]
struct RawLine {
    number: usize,
    span: Span,
    /// Unterminated final line of the input
    last: bool,
}

/// A sealed, ordered group of records from one file
///
/// Batches are produced by a [`VcfReader`](crate::VcfReader) and never change after
/// they are handed out.
#[derive(Clone, Debug)]
pub struct Batch {
    index: usize,
    layout: Layout,
    policy: BatchPolicy,

    /// Owned layout
    records: Vec<Record>,

    /// Shared and light layouts
    text: Vec<u8>,
    shared: Vec<SharedRecord>,
    sample_spans: Vec<Span>,
    lines: Vec<RawLine>,

    /// Needed to parse light lines on demand
    num_samples: usize,
    store_samples: bool,

    raw_bytes: usize,
}

impl Batch {
    fn empty(
        index: usize,
        layout: Layout,
        policy: BatchPolicy,
        num_samples: usize,
        store_samples: bool,
    ) -> Self {
        Self {
            index,
            layout,
            policy,
            records: Vec::new(),
            text: Vec::new(),
            shared: Vec::new(),
            sample_spans: Vec::new(),
            lines: Vec::new(),
            num_samples,
            store_samples,
            raw_bytes: 0,
        }
    }

    /// Zero-based position of this batch within its file
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Number of records (or raw lines, for light batches)
    #[must_use]
    pub fn len(&self) -> usize {
        match self.layout {
            Layout::Owned => self.records.len(),
            Layout::Shared => self.shared.len(),
            Layout::Light => self.lines.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the batch reached its sealing threshold
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.policy.is_satisfied(self.len(), self.raw_bytes)
    }

    /// Size of the raw text of the batch's lines, one terminator byte per line
    #[must_use]
    pub fn raw_bytes(&self) -> usize {
        self.raw_bytes
    }

    /// Iterates over the parsed records of an owned or shared batch
    ///
    /// Light batches hold no parsed records and yield nothing here; use
    /// [`Batch::for_each_record`] or [`Batch::lines`] instead.
    #[must_use]
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            batch: self,
            pos: 0,
        }
    }

    /// Returns the record at `idx` of an owned or shared batch
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<RecordRef<'_>> {
        match self.layout {
            Layout::Owned => self.records.get(idx).map(Record::as_ref_record),
            Layout::Shared => self.shared.get(idx).map(|record| {
                RecordRef::from_spans(
                    &self.text,
                    &record.fields,
                    &self.sample_spans[record.samples.clone()],
                )
            }),
            Layout::Light => None,
        }
    }

    /// Iterates over the raw lines of a light batch
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.lines.iter().map(|line| line.span.slice(&self.text))
    }

    /// Visits every record of the batch in order, whatever its layout
    ///
    /// Light lines are parsed here; a line that fails to parse is skipped and returned
    /// in the error list instead of being visited. Owned and shared batches never
    /// produce errors.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first error returned by `visit`.
    pub fn for_each_record<F>(&self, mut visit: F) -> Result<Vec<RecordError>>
    where
        F: FnMut(RecordRef<'_>) -> Result<()>,
    {
        if self.layout != Layout::Light {
            for record in self {
                visit(record)?;
            }
            return Ok(Vec::new());
        }
        let mut errors = Vec::new();
        let mut samples = Vec::new();
        for raw in &self.lines {
            let line = raw.span.slice(&self.text);
            match parse_record_line(line, self.num_samples, self.store_samples, &mut samples) {
                Ok(fields) => visit(RecordRef::from_spans(line, &fields, &samples))?,
                Err(kind) => errors.push(RecordError::new(raw.number, truncated(kind, raw.last))),
            }
        }
        Ok(errors)
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = RecordRef<'a>;
    type IntoIter = BatchIter<'a>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One-line summary of the batch
impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {}: {} records, {} bytes, {} layout",
            self.index,
            self.len(),
            self.raw_bytes,
            self.layout
        )
    }
}

/// Iterator over the records of a batch
pub struct BatchIter<'a> {
    batch: &'a Batch,
    pos: usize,
}
impl<'a> Iterator for BatchIter<'a> {
    type Item = RecordRef<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let record = self.batch.get(self.pos)?;
        self.pos += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.batch.layout {
            Layout::Light => 0,
            _ => self.batch.len() - self.pos,
        };
        (remaining, Some(remaining))
    }
}
impl ExactSizeIterator for BatchIter<'_> {}

/// Accumulates records into batches and seals them by policy
#[derive(Debug)]
pub(crate) struct BatchAssembler {
    policy: BatchPolicy,
    layout: Layout,
    store_samples: bool,
    num_samples: usize,
    current: Batch,
}

impl BatchAssembler {
    pub fn new(policy: BatchPolicy, layout: Layout, store_samples: bool) -> Self {
        Self {
            policy,
            layout,
            store_samples,
            num_samples: 0,
            current: Batch::empty(0, layout, policy, 0, store_samples),
        }
    }

    /// Sets the declared sample count; called once the column header is known
    pub fn set_num_samples(&mut self, num_samples: usize) {
        self.num_samples = num_samples;
        self.current.num_samples = num_samples;
    }

    /// Index the next sealed batch will carry
    pub fn next_index(&self) -> usize {
        self.current.index
    }

    /// Adds a parsed record; returns the batch if this record sealed it
    pub fn push_record(&mut self, line: &[u8], fields: &FieldSpans, samples: &[Span]) -> Option<Batch> {
        let batch = &mut self.current;
        match self.layout {
            Layout::Owned => batch.records.push(Record::from_spans(line, fields, samples)),
            Layout::Shared | Layout::Light => {
                let offset = batch.text.len();
                batch.text.extend_from_slice(line);
                let first = batch.sample_spans.len();
                batch
                    .sample_spans
                    .extend(samples.iter().map(|span| span.shift(offset)));
                batch.shared.push(SharedRecord {
                    fields: fields.shift(offset),
                    samples: first..batch.sample_spans.len(),
                });
            }
        }
        self.account(line.len())
    }

    /// Adds an unparsed line; returns the batch if this line sealed it
    ///
    /// `last` marks the unterminated final line of the input.
    pub fn push_line(&mut self, number: usize, line: &[u8], last: bool) -> Option<Batch> {
        let batch = &mut self.current;
        let offset = batch.text.len();
        batch.text.extend_from_slice(line);
        batch.lines.push(RawLine {
            number,
            span: Span::new(offset, line.len()),
            last,
        });
        self.account(line.len())
    }

    fn account(&mut self, line_len: usize) -> Option<Batch> {
        self.current.raw_bytes += line_len + 1;
        if self.current.is_full() {
            Some(self.seal())
        } else {
            None
        }
    }

    fn seal(&mut self) -> Batch {
        let next = Batch::empty(
            self.current.index + 1,
            self.layout,
            self.policy,
            self.num_samples,
            self.store_samples,
        );
        std::mem::replace(&mut self.current, next)
    }

    /// Seals the partial batch at end of input; an empty batch is never emitted
    pub fn finish(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.seal())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VcfRecord;
    use crate::error::ParseError;

    const LINES: [&[u8]; 3] = [
        b"chr1\t10\t.\tA\tC\t.\tPASS\tDP=1\tGT\t0/1",
        b"chr1\t20\t.\tG\tT\t9\tPASS\tDP=2\tGT\t1/1",
        b"chr2\t30\t.\tT\tA\t.\tq10\tDP=3\tGT\t0/0",
    ];

    fn push_all(assembler: &mut BatchAssembler) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut samples = Vec::new();
        for line in LINES {
            let fields = parse_record_line(line, 1, true, &mut samples).unwrap();
            batches.extend(assembler.push_record(line, &fields, &samples));
        }
        batches.extend(assembler.finish());
        batches
    }

    // ==================== BatchPolicy Tests ====================

    #[test]
    fn test_record_policy_seals_at_count() {
        let mut assembler = BatchAssembler::new(BatchPolicy::Records(2), Layout::Owned, true);
        assembler.set_num_samples(1);
        let batches = push_all(&mut assembler);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert!(batches[0].is_full());
        assert!(!batches[1].is_full());
        assert_eq!(batches[1].index(), 1);
    }

    #[test]
    fn test_byte_policy_seals_past_size() {
        // the third line is one byte shorter than the first two
        let threshold = LINES[0].len();
        let mut assembler =
            BatchAssembler::new(BatchPolicy::Bytes(threshold), Layout::Shared, true);
        assembler.set_num_samples(1);
        let batches = push_all(&mut assembler);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1));
        assert_eq!(batches[0].raw_bytes(), threshold + 1);
        assert!(batches[0].is_full());

        // reaching the threshold exactly does not seal
        assert_eq!(batches[2].raw_bytes(), threshold);
        assert!(!batches[2].is_full());
    }

    #[test]
    fn test_empty_final_batch_is_not_emitted() {
        let mut assembler = BatchAssembler::new(BatchPolicy::Records(3), Layout::Owned, true);
        assembler.set_num_samples(1);
        let batches = push_all(&mut assembler);
        assert_eq!(batches.len(), 1);
        assert_eq!(assembler.finish().map(|b| b.len()), None);
        assert_eq!(assembler.next_index(), 1);
    }

    // ==================== Layout Tests ====================

    #[test]
    fn test_owned_and_shared_layouts_agree() {
        let mut owned = BatchAssembler::new(BatchPolicy::Records(10), Layout::Owned, true);
        let mut shared = BatchAssembler::new(BatchPolicy::Records(10), Layout::Shared, true);
        owned.set_num_samples(1);
        shared.set_num_samples(1);
        let owned = push_all(&mut owned).remove(0);
        let shared = push_all(&mut shared).remove(0);
        assert_eq!(owned.layout(), Layout::Owned);
        assert_eq!(shared.layout(), Layout::Shared);
        let a: Vec<Record> = owned.iter().map(|r| r.to_record()).collect();
        let b: Vec<Record> = shared.iter().map(|r| r.to_record()).collect();
        assert_eq!(a, b);
        assert_eq!(b[2].chromosome(), b"chr2");
        assert_eq!(b[1].sample(0), Some(&b"1/1"[..]));
    }

    #[test]
    fn test_light_batch_parses_on_demand() {
        let mut assembler = BatchAssembler::new(BatchPolicy::Records(10), Layout::Light, true);
        assembler.set_num_samples(1);
        for (idx, line) in LINES.iter().enumerate() {
            assert!(assembler.push_line(idx + 1, line, false).is_none());
        }
        assert!(assembler.push_line(4, b"chr3\t40", false).is_none());
        let batch = assembler.finish().unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.iter().count(), 0);
        assert_eq!(batch.lines().next(), Some(LINES[0]));

        let mut positions = Vec::new();
        let errors = batch
            .for_each_record(|record| {
                positions.push(record.position());
                Ok(())
            })
            .unwrap();
        assert_eq!(positions, vec![10, 20, 30]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 4);
        assert!(matches!(errors[0].kind, ParseError::MissingField(_)));
    }

    #[test]
    fn test_light_unterminated_line_is_truncated() {
        let mut assembler = BatchAssembler::new(BatchPolicy::Records(10), Layout::Light, true);
        assembler.set_num_samples(1);
        assert!(assembler.push_line(1, LINES[0], false).is_none());
        assert!(assembler.push_line(2, b"chr1\t3\t.", true).is_none());
        let batch = assembler.finish().unwrap();
        let errors = batch.for_each_record(|_| Ok(())).unwrap();
        assert_eq!(errors, vec![RecordError::new(2, ParseError::TruncatedRecord)]);
    }

    #[test]
    fn test_for_each_record_stops_on_error() {
        let mut assembler = BatchAssembler::new(BatchPolicy::Records(10), Layout::Owned, true);
        assembler.set_num_samples(1);
        let batch = push_all(&mut assembler).remove(0);
        let mut seen = 0;
        let result = batch.for_each_record(|_| {
            seen += 1;
            Err(std::io::Error::other("stop").into())
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_display_summary() {
        let mut assembler = BatchAssembler::new(BatchPolicy::Records(2), Layout::Shared, true);
        assembler.set_num_samples(1);
        let batch = push_all(&mut assembler).remove(0);
        let summary = batch.to_string();
        assert!(summary.starts_with("batch 0: 2 records"));
        assert!(summary.contains("shared"));
    }
}
