//! Fixed-size chunk sources
//!
//! A [`ChunkSource`] hands out successive byte chunks of an input. Chunks end at
//! arbitrary byte positions; reassembling lines is left to
//! [`CarryOver`](crate::reassemble::CarryOver).

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use auto_impl::auto_impl;
use log::{debug, warn};
use memmap2::Mmap;
use niffler::compression::Format;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{ReadError, Result};

/// Minimum number of bytes needed to sniff a compression format
const MAGIC_LEN: u64 = 5;

/// Pull interface over an input
#[auto_impl(&mut, Box)]
pub trait ChunkSource {
    /// Returns the next chunk of input
    ///
    /// A zero-length chunk means end of input. The returned slice is only valid until
    /// the next call.
    fn next_chunk(&mut self) -> Result<&[u8]>;
}

/// Reads into `buffer` until it is full or the reader is exhausted
fn fill_buffer<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Chunks read through a reusable buffer from any [`Read`]
pub struct BufferedSource<R: Read> {
    reader: R,
    buffer: Vec<u8>,
}
impl<R: Read> BufferedSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            buffer: vec![0; chunk_size],
        }
    }
}
impl<R: Read> ChunkSource for BufferedSource<R> {
    fn next_chunk(&mut self) -> Result<&[u8]> {
        let filled = fill_buffer(&mut self.reader, &mut self.buffer)?;
        Ok(&self.buffer[..filled])
    }
}

/// Chunks sliced out of a memory-mapped file without copying
pub struct MappedSource {
    /// `None` for an empty file, which cannot be mapped
    mmap: Option<Mmap>,
    pos: usize,
    chunk_size: usize,
}
impl MappedSource {
    /// Maps the file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be opened
    /// * The file is not a regular file
    /// * The mapping fails
    pub fn new<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let file = open_regular(path.as_ref())?;
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // Safety: the file is open and won't be modified while mapped
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self {
            mmap,
            pos: 0,
            chunk_size,
        })
    }

    /// Total mapped length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |mmap| mmap.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl ChunkSource for MappedSource {
    fn next_chunk(&mut self) -> Result<&[u8]> {
        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(&[]);
        };
        let start = self.pos;
        let end = (start + self.chunk_size).min(mmap.len());
        self.pos = end;
        Ok(&mmap[start..end])
    }
}

/// Chunks pulled from a decompressing reader
///
/// Corrupt or truncated compressed input surfaces as [`ReadError::Decompression`].
pub struct DecompressSource {
    reader: Box<dyn Read>,
    buffer: Vec<u8>,
}
impl DecompressSource {
    /// Wraps an already decompressing reader
    pub fn new(reader: Box<dyn Read>, chunk_size: usize) -> Self {
        Self {
            reader,
            buffer: vec![0; chunk_size],
        }
    }

    /// Opens `path` and detects its compression format
    ///
    /// Plain input passes through unchanged.
    pub fn from_path<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<(Self, Format)> {
        let (reader, format) = niffler::from_path(path)?;
        Ok((Self::new(reader, chunk_size), format))
    }
}
impl ChunkSource for DecompressSource {
    fn next_chunk(&mut self) -> Result<&[u8]> {
        match fill_buffer(&mut self.reader, &mut self.buffer) {
            Ok(filled) => Ok(&self.buffer[..filled]),
            Err(e) if is_corruption(&e) => Err(ReadError::Decompression(e).into()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_corruption(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
    )
}

fn open_regular(path: &Path) -> Result<File> {
    let file = File::open(path)?;
    if !file.metadata()?.is_file() {
        return Err(ReadError::IncompatibleFile.into());
    }
    Ok(file)
}

/// Which kind of source to open a file with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Decompress gzip/zstd input, read anything else through a buffer
    #[default]
    Auto,
    Buffered,
    Mapped,
    Compressed,
}
impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Buffered => f.write_str("buffered"),
            Self::Mapped => f.write_str("mapped"),
            Self::Compressed => f.write_str("compressed"),
        }
    }
}
impl FromStr for Backend {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "buffered" => Ok(Self::Buffered),
            "mapped" | "mmap" => Ok(Self::Mapped),
            "compressed" => Ok(Self::Compressed),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// The source a file was opened with
pub enum Source {
    Buffered(BufferedSource<File>),
    Mapped(MappedSource),
    Compressed(DecompressSource),
}

impl Source {
    /// Opens `path` with the given backend
    ///
    /// [`Backend::Auto`] sniffs the file's magic bytes and never resolves to
    /// [`Backend::Mapped`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be opened
    /// * The file is not a regular file
    /// * Compression detection fails
    pub fn open<P: AsRef<Path>>(path: P, backend: Backend, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let source = match backend {
            Backend::Buffered => Self::buffered(path, chunk_size)?,
            Backend::Mapped => Self::Mapped(MappedSource::new(path, chunk_size)?),
            Backend::Auto | Backend::Compressed => {
                let file = open_regular(path)?;
                if file.metadata()?.len() < MAGIC_LEN {
                    if backend == Backend::Compressed {
                        warn!("{} is too short to be compressed", path.display());
                    }
                    Self::Buffered(BufferedSource::with_chunk_size(file, chunk_size))
                } else {
                    drop(file);
                    let (source, format) = DecompressSource::from_path(path, chunk_size)?;
                    match (format, backend) {
                        (Format::No, Backend::Auto) => Self::buffered(path, chunk_size)?,
                        (Format::No, _) => {
                            warn!(
                                "Compressed backend requested but {} is not compressed",
                                path.display()
                            );
                            Self::Compressed(source)
                        }
                        _ => Self::Compressed(source),
                    }
                }
            }
        };
        debug!("Opened {} with {} backend", path.display(), source.backend());
        Ok(source)
    }

    fn buffered(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = open_regular(path)?;
        Ok(Self::Buffered(BufferedSource::with_chunk_size(
            file, chunk_size,
        )))
    }

    /// The backend actually in use
    #[must_use]
    pub fn backend(&self) -> Backend {
        match self {
            Self::Buffered(_) => Backend::Buffered,
            Self::Mapped(_) => Backend::Mapped,
            Self::Compressed(_) => Backend::Compressed,
        }
    }
}
impl ChunkSource for Source {
    fn next_chunk(&mut self) -> Result<&[u8]> {
        match self {
            Self::Buffered(source) => source.next_chunk(),
            Self::Mapped(source) => source.next_chunk(),
            Self::Compressed(source) => source.next_chunk(),
        }
    }
}
