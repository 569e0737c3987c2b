//! Line reassembly across chunk boundaries

use memchr::memrchr;

/// Holds the unterminated tail of the previous chunk
///
/// Every call to `push` hands the parser a block that ends with `\n`, so no line is
/// ever split between two parser invocations. The carry-over grows as needed for lines
/// longer than a chunk.
#[derive(Debug, Default)]
pub struct CarryOver {
    carry: Vec<u8>,
}

impl CarryOver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes currently held back
    #[must_use]
    pub fn len(&self) -> usize {
        self.carry.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.carry.is_empty()
    }

    /// Feeds one chunk, calling `parse` with the complete lines it finishes (if any)
    ///
    /// When nothing is carried over the complete lines are passed straight from `chunk`
    /// without copying.
    pub fn push<F: FnMut(&[u8])>(&mut self, chunk: &[u8], mut parse: F) {
        let Some(last) = memrchr(b'\n', chunk) else {
            self.carry.extend_from_slice(chunk);
            return;
        };
        let (complete, tail) = chunk.split_at(last + 1);
        if self.carry.is_empty() {
            parse(complete);
        } else {
            self.carry.extend_from_slice(complete);
            parse(&self.carry);
            self.carry.clear();
        }
        self.carry.extend_from_slice(tail);
    }

    /// Hands any leftover bytes to `parse` as the final, unterminated line
    pub fn finish<F: FnOnce(&[u8])>(&mut self, parse: F) {
        if !self.carry.is_empty() {
            parse(&self.carry);
            self.carry.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(input: &[u8], chunk_size: usize) -> (Vec<Vec<u8>>, Option<Vec<u8>>) {
        let mut carry = CarryOver::new();
        let mut blocks = Vec::new();
        for chunk in input.chunks(chunk_size) {
            carry.push(chunk, |block| blocks.push(block.to_vec()));
        }
        let mut last = None;
        carry.finish(|line| last = Some(line.to_vec()));
        (blocks, last)
    }

    #[test]
    fn test_blocks_end_on_newline() {
        let input = b"aaa\nbbbb\ncc\ndddddd";
        for size in 1..=input.len() {
            let (blocks, last) = reassemble(input, size);
            assert!(blocks.iter().all(|b| b.ends_with(b"\n")));
            let joined: Vec<u8> = blocks.concat();
            assert_eq!(joined, b"aaa\nbbbb\ncc\n");
            assert_eq!(last.as_deref(), Some(&b"dddddd"[..]));
        }
    }

    #[test]
    fn test_line_longer_than_chunk() {
        let mut carry = CarryOver::new();
        let mut blocks = Vec::new();
        carry.push(b"abc", |b| blocks.push(b.to_vec()));
        carry.push(b"def", |b| blocks.push(b.to_vec()));
        assert_eq!(carry.len(), 6);
        carry.push(b"g\nh", |b| blocks.push(b.to_vec()));
        assert_eq!(blocks, vec![b"abcdefg\n".to_vec()]);
        assert_eq!(carry.len(), 1);
    }

    #[test]
    fn test_crlf_split_keeps_cr_in_carry() {
        let mut carry = CarryOver::new();
        let mut blocks = Vec::new();
        carry.push(b"line\r", |b| blocks.push(b.to_vec()));
        assert!(blocks.is_empty());
        carry.push(b"\nnext", |b| blocks.push(b.to_vec()));
        assert_eq!(blocks, vec![b"line\r\n".to_vec()]);
    }

    #[test]
    fn test_finish_without_leftover() {
        let (_, last) = reassemble(b"a\nb\n", 3);
        assert!(last.is_none());
    }
}
