use std::error::Error as StdError;

use crate::parser::Field;

/// Custom Result type for vcfstream operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the vcfstream library, encompassing all possible error cases
/// that can occur while reading and batching VCF data.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Fatal errors that abort a read
    #[error("Error reading file: {0}")]
    ReadError(#[from] ReadError),

    /// Structural errors on a single line
    ///
    /// These are normally recorded in a [`ReadSummary`](crate::ReadSummary) rather than
    /// returned; they surface as an `Error` only from on-demand parsing of light batches.
    #[error("Error parsing line: {0}")]
    ParseError(#[from] ParseError),

    /// Invalid reader configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// Errors from compression detection while opening a file
    #[error("Error detecting compression: {0}")]
    CompressionError(#[from] niffler::Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error ended a read because it was cancelled
    ///
    /// # Returns
    ///
    /// * `true` if the error is a `ReadError::Cancelled`, directly or as the source of an
    ///   aborted read
    /// * `false` for all other error types
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::ReadError(ReadError::Cancelled) => true,
            Self::ReadError(ReadError::Aborted { source, .. } | ReadError::LaneFailed { source, .. }) => {
                source.is_cancelled()
            }
            _ => false,
        }
    }
}

/// Fatal errors that end the read of a file
///
/// Batches delivered before one of these errors remain valid.
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The file being read is not a regular file (e.g., it might be a directory)
    #[error("File is not regular")]
    IncompatibleFile,

    /// The decompression stream reported corrupt or truncated input
    #[error("Corrupt compressed stream: {0}")]
    Decompression(std::io::Error),

    /// The read was cancelled at a chunk boundary
    #[error("Read cancelled")]
    Cancelled,

    /// A read running on a worker thread failed after delivering some batches
    #[error("Read aborted after {batches} batches: {source}")]
    Aborted {
        batches: usize,
        #[source]
        source: Box<Error>,
    },

    /// One file of a synchronized multi-file read failed
    #[error("File {lane} of a synchronized read failed: {source}")]
    LaneFailed {
        lane: usize,
        #[source]
        source: Box<Error>,
    },

    /// A worker thread panicked
    #[error("A worker thread panicked")]
    WorkerPanic,
}

/// Structural errors found on a single line
///
/// The offending line is skipped and parsing resumes at the next line.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line ended before a mandatory field
    #[error("Missing mandatory field: {0}")]
    MissingField(Field),

    /// The final line of the input was cut short before its mandatory fields
    #[error("Truncated record at end of input")]
    TruncatedRecord,

    /// The POS column is not a decimal integer
    #[error("Invalid position: {0:?}")]
    InvalidPosition(String),

    /// The number of sample columns does not match the column header
    #[error("Expected {expected} sample columns, found {found}")]
    SampleCountMismatch { expected: usize, found: usize },

    /// A `##` meta-line that cannot be split into a name and value(s)
    #[error("Malformed header line: {0}")]
    MalformedHeaderLine(String),

    /// The `#CHROM` line does not start with the mandatory column names
    #[error("Invalid column header: {0}")]
    InvalidColumnHeader(String),

    /// A data line appeared before the `#CHROM` column header
    #[error("Data line found before the column header")]
    MissingColumnHeader,

    /// A `#` line appeared after the column header
    #[error("Header line found after the column header")]
    UnexpectedHeaderLine,
}

/// A [`ParseError`] tagged with the 1-based line number it was found on
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct RecordError {
    pub line: usize,
    pub kind: ParseError,
}
impl RecordError {
    #[must_use]
    pub fn new(line: usize, kind: ParseError) -> Self {
        Self { line, kind }
    }
}

/// Errors in a [`ReaderConfig`](crate::ReaderConfig)
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("Batch threshold must be greater than zero")]
    ZeroBatchThreshold,

    #[error("Queue capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("At least one input file is required")]
    EmptyFileList,
}

/// Trait for converting arbitrary errors into `Error`
///
/// Useful inside a [`ParallelProcessor`](crate::ParallelProcessor) whose own operations
/// fail with foreign error types.
pub trait IntoVcfError {
    fn into_vcf_error(self) -> Error;
}

impl<E> IntoVcfError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_vcf_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}
