use super::utils::Span;

/// Read-only access to the columns of one VCF data line
///
/// Implemented by the owning [`Record`] and the borrowing [`RecordRef`], so consumers
/// (e.g. a [`ParallelProcessor`](crate::ParallelProcessor)) can be written once for both
/// batch layouts.
pub trait VcfRecord {
    /// CHROM
    fn chromosome(&self) -> &[u8];

    /// POS, 1-based
    fn position(&self) -> u64;

    /// ID
    fn id(&self) -> &[u8];

    /// REF
    fn reference(&self) -> &[u8];

    /// ALT
    fn alternate(&self) -> &[u8];

    /// QUAL; `None` when missing (`.`) or not numeric
    fn quality(&self) -> Option<f32>;

    /// FILTER
    fn filter(&self) -> &[u8];

    /// INFO
    fn info(&self) -> &[u8];

    /// FORMAT; empty when the line has no FORMAT column
    fn format(&self) -> &[u8];

    /// Number of stored sample columns (zero when samples were skipped)
    fn num_samples(&self) -> usize;

    /// The raw text of sample column `idx`
    fn sample(&self, idx: usize) -> Option<&[u8]>;

    /// Iterates over the stored sample columns in order
    fn samples(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.num_samples()).filter_map(move |idx| self.sample(idx))
    }

    /// Copies every column into an owning [`Record`]
    fn to_record(&self) -> Record {
        Record {
            chromosome: self.chromosome().to_vec(),
            position: self.position(),
            id: self.id().to_vec(),
            reference: self.reference().to_vec(),
            alternate: self.alternate().to_vec(),
            quality: self.quality(),
            filter: self.filter().to_vec(),
            info: self.info().to_vec(),
            format: self.format().to_vec(),
            samples: self.samples().map(<[u8]>::to_vec).collect(),
        }
    }
}

/// Spans of the fixed columns of one line, plus its parsed numeric columns
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FieldSpans {
    pub chromosome: Span,
    pub position: u64,
    pub id: Span,
    pub reference: Span,
    pub alternate: Span,
    pub quality: Option<f32>,
    pub filter: Span,
    pub info: Span,
    pub format: Span,
}
impl FieldSpans {
    /// Moves every span `by` bytes further into the buffer
    #[must_use]
    pub fn shift(self, by: usize) -> Self {
        Self {
            chromosome: self.chromosome.shift(by),
            id: self.id.shift(by),
            reference: self.reference.shift(by),
            alternate: self.alternate.shift(by),
            filter: self.filter.shift(by),
            info: self.info.shift(by),
            format: self.format.shift(by),
            ..self
        }
    }
}

/// A fully owned VCF data line; every column is its own allocation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    chromosome: Vec<u8>,
    position: u64,
    id: Vec<u8>,
    reference: Vec<u8>,
    alternate: Vec<u8>,
    quality: Option<f32>,
    filter: Vec<u8>,
    info: Vec<u8>,
    format: Vec<u8>,
    samples: Vec<Vec<u8>>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the columns located by `fields` and `samples` out of `text`
    pub(crate) fn from_spans(text: &[u8], fields: &FieldSpans, samples: &[Span]) -> Self {
        Self {
            chromosome: fields.chromosome.slice(text).to_vec(),
            position: fields.position,
            id: fields.id.slice(text).to_vec(),
            reference: fields.reference.slice(text).to_vec(),
            alternate: fields.alternate.slice(text).to_vec(),
            quality: fields.quality,
            filter: fields.filter.slice(text).to_vec(),
            info: fields.info.slice(text).to_vec(),
            format: fields.format.slice(text).to_vec(),
            samples: samples.iter().map(|s| s.slice(text).to_vec()).collect(),
        }
    }

    /// Borrows this record as a [`RecordRef`]
    #[must_use]
    pub fn as_ref_record(&self) -> RecordRef<'_> {
        RecordRef {
            chromosome: &self.chromosome,
            position: self.position,
            id: &self.id,
            reference: &self.reference,
            alternate: &self.alternate,
            quality: self.quality,
            filter: &self.filter,
            info: &self.info,
            format: &self.format,
            samples: SampleSlice::Owned(&self.samples),
        }
    }

    pub fn set_chromosome(&mut self, chromosome: &[u8]) {
        self.chromosome = chromosome.to_vec();
    }

    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn set_id(&mut self, id: &[u8]) {
        self.id = id.to_vec();
    }

    pub fn set_reference(&mut self, reference: &[u8]) {
        self.reference = reference.to_vec();
    }

    pub fn set_alternate(&mut self, alternate: &[u8]) {
        self.alternate = alternate.to_vec();
    }

    pub fn set_quality(&mut self, quality: Option<f32>) {
        self.quality = quality;
    }

    pub fn set_filter(&mut self, filter: &[u8]) {
        self.filter = filter.to_vec();
    }

    pub fn set_info(&mut self, info: &[u8]) {
        self.info = info.to_vec();
    }

    pub fn set_format(&mut self, format: &[u8]) {
        self.format = format.to_vec();
    }

    pub fn add_sample(&mut self, sample: &[u8]) {
        self.samples.push(sample.to_vec());
    }

    /// Drops the sample columns, keeping the fixed ones
    pub fn clear_samples(&mut self) {
        self.samples.clear();
    }
}

impl VcfRecord for Record {
    fn chromosome(&self) -> &[u8] {
        &self.chromosome
    }
    fn position(&self) -> u64 {
        self.position
    }
    fn id(&self) -> &[u8] {
        &self.id
    }
    fn reference(&self) -> &[u8] {
        &self.reference
    }
    fn alternate(&self) -> &[u8] {
        &self.alternate
    }
    fn quality(&self) -> Option<f32> {
        self.quality
    }
    fn filter(&self) -> &[u8] {
        &self.filter
    }
    fn info(&self) -> &[u8] {
        &self.info
    }
    fn format(&self) -> &[u8] {
        &self.format
    }
    fn num_samples(&self) -> usize {
        self.samples.len()
    }
    fn sample(&self, idx: usize) -> Option<&[u8]> {
        self.samples.get(idx).map(Vec::as_slice)
    }
    fn to_record(&self) -> Record {
        self.clone()
    }
}

/// Sample columns as seen through a [`RecordRef`]
#[derive(Clone, Copy, Debug)]
enum SampleSlice<'a> {
    /// Samples of an owned [`Record`]
    Owned(&'a [Vec<u8>]),
    /// Samples located by spans in a shared text buffer
    Shared { text: &'a [u8], spans: &'a [Span] },
}
impl<'a> SampleSlice<'a> {
    fn len(&self) -> usize {
        match self {
            Self::Owned(samples) => samples.len(),
            Self::Shared { spans, .. } => spans.len(),
        }
    }

    fn get(&self, idx: usize) -> Option<&'a [u8]> {
        match *self {
            Self::Owned(samples) => samples.get(idx).map(Vec::as_slice),
            Self::Shared { text, spans } => spans.get(idx).map(|s| s.slice(text)),
        }
    }
}

/// A VCF data line borrowed from the batch (or [`Record`]) that holds its text
///
/// A `RecordRef` cannot outlive the batch it was read from; call
/// [`VcfRecord::to_record`] to keep a record beyond that.
#[derive(Clone, Copy, Debug)]
pub struct RecordRef<'a> {
    chromosome: &'a [u8],
    position: u64,
    id: &'a [u8],
    reference: &'a [u8],
    alternate: &'a [u8],
    quality: Option<f32>,
    filter: &'a [u8],
    info: &'a [u8],
    format: &'a [u8],
    samples: SampleSlice<'a>,
}

impl<'a> RecordRef<'a> {
    /// Resolves `fields` and `samples` against the shared `text` buffer
    pub(crate) fn from_spans(text: &'a [u8], fields: &FieldSpans, samples: &'a [Span]) -> Self {
        Self {
            chromosome: fields.chromosome.slice(text),
            position: fields.position,
            id: fields.id.slice(text),
            reference: fields.reference.slice(text),
            alternate: fields.alternate.slice(text),
            quality: fields.quality,
            filter: fields.filter.slice(text),
            info: fields.info.slice(text),
            format: fields.format.slice(text),
            samples: SampleSlice::Shared {
                text,
                spans: samples,
            },
        }
    }
}

impl VcfRecord for RecordRef<'_> {
    fn chromosome(&self) -> &[u8] {
        self.chromosome
    }
    fn position(&self) -> u64 {
        self.position
    }
    fn id(&self) -> &[u8] {
        self.id
    }
    fn reference(&self) -> &[u8] {
        self.reference
    }
    fn alternate(&self) -> &[u8] {
        self.alternate
    }
    fn quality(&self) -> Option<f32> {
        self.quality
    }
    fn filter(&self) -> &[u8] {
        self.filter
    }
    fn info(&self) -> &[u8] {
        self.info
    }
    fn format(&self) -> &[u8] {
        self.format
    }
    fn num_samples(&self) -> usize {
        self.samples.len()
    }
    fn sample(&self, idx: usize) -> Option<&[u8]> {
        self.samples.get(idx)
    }
}
