use std::ops::Range;

/// A byte range into a text buffer, stored as offset and length
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    offset: usize,
    length: usize,
}
impl Span {
    #[must_use]
    pub fn new(offset: usize, length: usize) -> Self {
        Span { offset, length }
    }

    /// Builds a span from a `start..end` byte range
    #[must_use]
    pub fn from_range(range: Range<usize>) -> Self {
        Span::new(range.start, range.end - range.start)
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the same span moved `by` bytes further into the buffer
    #[must_use]
    pub fn shift(self, by: usize) -> Self {
        Span::new(self.offset + by, self.length)
    }

    /// Slices `bytes` with this span
    ///
    /// # Panics
    ///
    /// Panics if the span reaches past the end of `bytes`.
    #[inline]
    #[must_use]
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.range()]
    }
}

/// Removes one trailing `\r`, if present
#[inline]
pub(crate) fn trim_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_range_and_slice() {
        let text = b"chr1\t100";
        let span = Span::new(5, 3);
        assert_eq!(span.range(), 5..8);
        assert_eq!(span.slice(text), b"100");
    }

    #[test]
    fn test_span_shift() {
        let span = Span::from_range(2..6).shift(10);
        assert_eq!(span.offset(), 12);
        assert_eq!(span.len(), 4);
    }

    #[test]
    fn test_trim_cr() {
        assert_eq!(trim_cr(b"abc\r"), b"abc");
        assert_eq!(trim_cr(b"abc"), b"abc");
        assert_eq!(trim_cr(b""), b"");
        assert_eq!(trim_cr(b"\r"), b"");
    }
}
