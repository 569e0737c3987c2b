//! Line-oriented VCF state machine
//!
//! [`ReaderStatus`] consumes blocks of complete lines (as produced by
//! [`CarryOver`](crate::reassemble::CarryOver)) and reports what it finds to a
//! [`ParseSink`]. It never fails: structural problems on a line are reported through
//! [`ParseSink::malformed`] and the line is skipped.

use std::fmt;

use auto_impl::auto_impl;
use memchr::{memchr, memchr_iter};

use crate::core::{trim_cr, FieldSpans, HeaderEntry, Span, MANDATORY_COLUMNS};
use crate::error::{ParseError, RecordError};

/// The columns of a data line, in file order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Chromosome,
    Position,
    Id,
    Reference,
    Alternate,
    Quality,
    Filter,
    Info,
    Format,
    /// Zero-based sample column
    Sample(usize),
}
impl Field {
    /// The column following this one
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Chromosome => Self::Position,
            Self::Position => Self::Id,
            Self::Id => Self::Reference,
            Self::Reference => Self::Alternate,
            Self::Alternate => Self::Quality,
            Self::Quality => Self::Filter,
            Self::Filter => Self::Info,
            Self::Info => Self::Format,
            Self::Format => Self::Sample(0),
            Self::Sample(n) => Self::Sample(n + 1),
        }
    }
}
impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chromosome => f.write_str("CHROM"),
            Self::Position => f.write_str("POS"),
            Self::Id => f.write_str("ID"),
            Self::Reference => f.write_str("REF"),
            Self::Alternate => f.write_str("ALT"),
            Self::Quality => f.write_str("QUAL"),
            Self::Filter => f.write_str("FILTER"),
            Self::Info => f.write_str("INFO"),
            Self::Format => f.write_str("FORMAT"),
            Self::Sample(n) => write!(f, "sample column {n}"),
        }
    }
}

/// Parser states
///
/// `BeforeHeader` and `BetweenRecords` hold between lines; the others are entered while
/// a line is being consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    BeforeHeader,
    InHeaderLine,
    InColumnHeaderLine,
    InRecord(Field),
    BetweenRecords,
}

/// Receives everything the state machine extracts from the input
#[auto_impl(&mut, Box)]
pub trait ParseSink {
    /// The value of the `##fileformat=` line
    fn file_format(&mut self, value: &[u8]);

    /// One parsed `##` meta-line
    fn header_entry(&mut self, entry: HeaderEntry);

    /// The sample names of the `#CHROM` line; called exactly once
    fn samples(&mut self, samples: Vec<String>);

    /// One parsed data line; all spans are relative to `line`
    fn record(&mut self, line: &[u8], fields: &FieldSpans, samples: &[Span]);

    /// One unparsed data line (light mode); `last` marks an unterminated final line
    fn raw_record(&mut self, line_number: usize, line: &[u8], last: bool);

    /// A line that was skipped because of a structural error
    fn malformed(&mut self, error: RecordError);
}

/// Persistent parse context for one file
#[derive(Clone, Debug)]
pub struct ReaderStatus {
    state: State,
    num_samples: usize,
    num_records: usize,
    line: usize,
    store_samples: bool,
    self_contained: bool,
    light: bool,

    /// Reusable sample span buffer
    sample_spans: Vec<Span>,
}

impl ReaderStatus {
    #[must_use]
    pub fn new(store_samples: bool, self_contained: bool, light: bool) -> Self {
        Self {
            state: State::BeforeHeader,
            num_samples: 0,
            num_records: 0,
            line: 0,
            store_samples,
            self_contained,
            light,
            sample_spans: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Number of samples declared by the column header
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Number of data lines accepted so far
    #[must_use]
    pub fn num_records(&self) -> usize {
        self.num_records
    }

    /// Number of lines consumed so far, empty ones included
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line
    }

    #[must_use]
    pub fn store_samples(&self) -> bool {
        self.store_samples
    }

    #[must_use]
    pub fn self_contained(&self) -> bool {
        self.self_contained
    }

    #[must_use]
    pub fn light(&self) -> bool {
        self.light
    }

    /// True once the `#CHROM` line has been consumed
    #[must_use]
    pub fn header_complete(&self) -> bool {
        self.state == State::BetweenRecords
    }

    /// Consumes a block of complete lines
    ///
    /// The block is expected to end with `\n`; any bytes after the last `\n` are
    /// treated as one more complete line.
    pub fn consume<S: ParseSink>(&mut self, block: &[u8], sink: &mut S) {
        let mut start = 0;
        for end in memchr_iter(b'\n', block) {
            self.consume_line(&block[start..end], false, sink);
            start = end + 1;
        }
        if start < block.len() {
            self.consume_line(&block[start..], false, sink);
        }
    }

    /// Consumes the unterminated final line of the input
    pub fn finish<S: ParseSink>(&mut self, line: &[u8], sink: &mut S) {
        self.consume_line(line, true, sink);
    }

    fn consume_line<S: ParseSink>(&mut self, line: &[u8], last: bool, sink: &mut S) {
        self.line += 1;
        let line = trim_cr(line);
        if line.is_empty() {
            return;
        }
        loop {
            match self.state {
                State::BeforeHeader => {
                    if line.starts_with(b"##") {
                        self.state = State::InHeaderLine;
                    } else if line.starts_with(b"#") {
                        self.state = State::InColumnHeaderLine;
                    } else {
                        self.reject(ParseError::MissingColumnHeader, sink);
                        return;
                    }
                }
                State::InHeaderLine => {
                    self.on_header_line(line, sink);
                    self.state = State::BeforeHeader;
                    return;
                }
                State::InColumnHeaderLine => {
                    self.on_column_header_line(line, sink);
                    self.state = State::BetweenRecords;
                    return;
                }
                State::BetweenRecords => {
                    if line.starts_with(b"#") {
                        self.reject(ParseError::UnexpectedHeaderLine, sink);
                        return;
                    }
                    if self.light {
                        self.num_records += 1;
                        sink.raw_record(self.line, line, last);
                        return;
                    }
                    self.state = State::InRecord(Field::Chromosome);
                }
                State::InRecord(_) => {
                    self.on_record_line(line, last, sink);
                    self.state = State::BetweenRecords;
                    return;
                }
            }
        }
    }

    fn reject<S: ParseSink>(&self, kind: ParseError, sink: &mut S) {
        sink.malformed(RecordError::new(self.line, kind));
    }

    fn on_header_line<S: ParseSink>(&mut self, line: &[u8], sink: &mut S) {
        match parse_header_line(line) {
            Ok(HeaderLine::FileFormat(value)) => sink.file_format(value),
            Ok(HeaderLine::Entry(entry)) => sink.header_entry(entry),
            Err(kind) => self.reject(kind, sink),
        }
    }

    fn on_column_header_line<S: ParseSink>(&mut self, line: &[u8], sink: &mut S) {
        let columns: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
        let valid = columns.len() >= MANDATORY_COLUMNS.len()
            && columns[0] == b"#CHROM"
            && columns[1..MANDATORY_COLUMNS.len()]
                .iter()
                .zip(&MANDATORY_COLUMNS[1..])
                .all(|(found, expected)| *found == expected.as_bytes())
            && columns.get(8).is_none_or(|format| *format == b"FORMAT");
        if !valid {
            let text = String::from_utf8_lossy(line).into_owned();
            self.reject(ParseError::InvalidColumnHeader(text), sink);
        }
        // without a FORMAT column the sample names start right after INFO
        let first_sample = match columns.get(8) {
            Some(column) if *column != b"FORMAT" => 8,
            _ => 9,
        };
        let samples: Vec<String> = columns
            .iter()
            .skip(first_sample)
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect();
        self.num_samples = samples.len();
        sink.samples(samples);
    }

    fn on_record_line<S: ParseSink>(&mut self, line: &[u8], last: bool, sink: &mut S) {
        let state = &mut self.state;
        let parsed = split_fields(
            line,
            self.num_samples,
            self.store_samples,
            &mut self.sample_spans,
            |field| *state = State::InRecord(field),
        );
        match parsed {
            Ok(fields) => {
                self.num_records += 1;
                sink.record(line, &fields, &self.sample_spans);
            }
            Err(kind) => self.reject(truncated(kind, last), sink),
        }
    }
}

/// Splits one data line into its columns
///
/// Used for lines deferred by light mode. `samples` is cleared and refilled with the
/// sample column spans; all spans are relative to `line`.
///
/// # Arguments
///
/// * `line` - The data line, without its terminator
/// * `num_samples` - The number of samples declared by the column header
/// * `store_samples` - Whether to locate (and count) the sample columns
/// * `samples` - Output buffer for sample spans
pub fn parse_record_line(
    line: &[u8],
    num_samples: usize,
    store_samples: bool,
    samples: &mut Vec<Span>,
) -> Result<FieldSpans, ParseError> {
    split_fields(trim_cr(line), num_samples, store_samples, samples, |_| {})
}

/// A final line that ends before its mandatory fields is a truncated record
pub(crate) fn truncated(kind: ParseError, last: bool) -> ParseError {
    match kind {
        ParseError::MissingField(_) if last => ParseError::TruncatedRecord,
        kind => kind,
    }
}

fn split_fields<F: FnMut(Field)>(
    line: &[u8],
    num_samples: usize,
    store_samples: bool,
    samples: &mut Vec<Span>,
    mut enter: F,
) -> Result<FieldSpans, ParseError> {
    samples.clear();
    let mut fields = FieldSpans::default();
    let mut field = Field::Chromosome;
    let mut tabs = memchr_iter(b'\t', line);
    let mut start = 0;
    let mut count = 0;
    loop {
        enter(field);
        let end = tabs.next();
        let span = Span::from_range(start..end.unwrap_or(line.len()));
        match field {
            Field::Chromosome => fields.chromosome = span,
            Field::Position => fields.position = parse_position(span.slice(line))?,
            Field::Id => fields.id = span,
            Field::Reference => fields.reference = span,
            Field::Alternate => fields.alternate = span,
            Field::Quality => fields.quality = parse_quality(span.slice(line)),
            Field::Filter => fields.filter = span,
            Field::Info => fields.info = span,
            Field::Format => fields.format = span,
            Field::Sample(_) => samples.push(span),
        }
        count += 1;
        let Some(end) = end else { break };
        if field == Field::Format && !store_samples {
            break;
        }
        start = end + 1;
        field = field.next();
    }

    if count < MANDATORY_COLUMNS.len() {
        return Err(ParseError::MissingField(field.next()));
    }
    if store_samples {
        let found = count.saturating_sub(9);
        let accepted = if num_samples == 0 {
            count <= 9
        } else {
            found == num_samples
        };
        if !accepted {
            return Err(ParseError::SampleCountMismatch {
                expected: num_samples,
                found,
            });
        }
    }
    Ok(fields)
}

fn parse_position(bytes: &[u8]) -> Result<u64, ParseError> {
    let invalid = || ParseError::InvalidPosition(String::from_utf8_lossy(bytes).into_owned());
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)
}

fn parse_quality(bytes: &[u8]) -> Option<f32> {
    if bytes == b"." {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

enum HeaderLine<'a> {
    FileFormat(&'a [u8]),
    Entry(HeaderEntry),
}

/// Parses a `##` meta-line (without its terminator)
fn parse_header_line(line: &[u8]) -> Result<HeaderLine<'_>, ParseError> {
    let malformed = || ParseError::MalformedHeaderLine(String::from_utf8_lossy(line).into_owned());
    let body = &line[2..];
    let eq = memchr(b'=', body).ok_or_else(malformed)?;
    let (name, value) = (&body[..eq], &body[eq + 1..]);
    if name.is_empty() {
        return Err(malformed());
    }
    if name == b"fileformat" {
        return Ok(HeaderLine::FileFormat(value));
    }

    let name = String::from_utf8_lossy(name).into_owned();
    let Some(inner) = value.strip_prefix(b"<") else {
        return Ok(HeaderLine::Entry(HeaderEntry::bare(
            name,
            String::from_utf8_lossy(value),
        )));
    };

    let mut entry = HeaderEntry::new();
    entry.set_name(name);
    let mut pos = 0;
    loop {
        // key runs up to '='
        let key_len = inner[pos..]
            .iter()
            .position(|&b| matches!(b, b'=' | b',' | b'>'))
            .ok_or_else(malformed)?;
        if inner[pos + key_len] != b'=' || key_len == 0 {
            return Err(malformed());
        }
        let key = &inner[pos..pos + key_len];

        // value runs up to an unquoted ',' or '>'
        let start = pos + key_len + 1;
        let mut idx = start;
        let mut quoted = false;
        loop {
            let Some(&b) = inner.get(idx) else {
                return Err(malformed());
            };
            if quoted {
                match b {
                    b'\\' => idx += 1,
                    b'"' => quoted = false,
                    _ => {}
                }
            } else {
                match b {
                    b'"' => quoted = true,
                    b',' | b'>' => break,
                    _ => {}
                }
            }
            idx += 1;
        }
        entry.add_key(String::from_utf8_lossy(key));
        entry.add_value(String::from_utf8_lossy(&inner[start..idx]));

        if inner[idx] == b'>' {
            if idx + 1 != inner.len() {
                return Err(malformed());
            }
            return Ok(HeaderLine::Entry(entry));
        }
        pos = idx + 1;
    }
}
