use std::fmt;
use std::ops::Range;
use std::time::Instant;

use bytes::Bytes;
use log::{debug, trace};

use crate::bounded_buffer::{BoundedBuffer, Token};
use crate::error::{PipelineError, Result};
use crate::partition::Partition;
use crate::stats::LogHistogram;

const DEFAULT_DELIMITERS: &[u8] = b" ;:!?'\"(),.-\n\t\r";

/// Byte class table for word boundaries.
#[derive(Clone, PartialEq, Eq)]
pub struct Delimiters {
    table: [bool; 256],
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters::from_bytes(DEFAULT_DELIMITERS)
    }
}

impl Delimiters {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut table = [false; 256];
        for &b in bytes {
            table[b as usize] = true;
        }
        Delimiters { table }
    }

    pub fn whitespace() -> Self {
        Delimiters::from_bytes(b" \t\n\r\x0c")
    }

    /// Parses a delimiter list as typed on a command line.
    pub fn parse_escaped(list: &str) -> Result<Self> {
        let mut bytes = Vec::with_capacity(list.len());
        let mut iter = list.bytes();
        while let Some(b) = iter.next() {
            if b != b'\\' {
                bytes.push(b);
                continue;
            }
            match iter.next() {
                Some(b'n') => bytes.push(b'\n'),
                Some(b't') => bytes.push(b'\t'),
                Some(b'r') => bytes.push(b'\r'),
                Some(b's') => bytes.push(b' '),
                Some(b'\\') => bytes.push(b'\\'),
                Some(other) => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "unknown delimiter escape \\{}",
                        other as char
                    )))
                }
                None => {
                    return Err(PipelineError::InvalidConfig(
                        "dangling \\ in delimiters".to_owned(),
                    ))
                }
            }
        }
        if bytes.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "delimiter set is empty".to_owned(),
            ));
        }
        Ok(Delimiters::from_bytes(&bytes))
    }

    #[inline]
    pub fn contains(&self, b: u8) -> bool {
        self.table[b as usize]
    }
}

impl fmt::Debug for Delimiters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<u8> = (0..=255u8).filter(|&b| self.contains(b)).collect();
        write!(f, "Delimiters({:?})", String::from_utf8_lossy(&set))
    }
}

/// Iterator over the words of `text[range]`, as slices of `text`.
pub struct Words<'a> {
    text: &'a Bytes,
    delimiters: &'a Delimiters,
    pos: usize,
    end: usize,
}

impl<'a> Iterator for Words<'a> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let bytes = &self.text[..self.end];
        while self.pos < self.end && self.delimiters.contains(bytes[self.pos]) {
            self.pos += 1;
        }
        if self.pos == self.end {
            return None;
        }
        let start = self.pos;
        while self.pos < self.end && !self.delimiters.contains(bytes[self.pos]) {
            self.pos += 1;
        }
        Some(self.text.slice(start..self.pos))
    }
}

pub fn words<'a>(text: &'a Bytes, range: Range<usize>, delimiters: &'a Delimiters) -> Words<'a> {
    let end = range.end.min(text.len());
    Words {
        text,
        delimiters,
        pos: range.start.min(end),
        end,
    }
}

/// Number of words in the whole text, used to size frequency tables.
pub fn count_words(text: &Bytes, delimiters: &Delimiters) -> usize {
    words(text, 0..text.len(), delimiters).count()
}

#[derive(Debug, Default)]
pub struct TokenizerReport {
    pub tokens: u64,
    pub wait: LogHistogram,
}

/// First stage of a replica: the only writer of `output`.
pub struct Tokenizer<'a> {
    text: &'a Bytes,
    partition: Partition,
    delimiters: &'a Delimiters,
}

impl<'a> Tokenizer<'a> {
    pub fn new(text: &'a Bytes, partition: Partition, delimiters: &'a Delimiters) -> Self {
        Tokenizer {
            text,
            partition,
            delimiters,
        }
    }

    /// Pushes every word as a count-1 token, blocking while `output` is full,
    /// then completes `output`. On error `output` is left incomplete.
    pub fn run(self, output: &BoundedBuffer) -> Result<TokenizerReport> {
        let mut report = TokenizerReport::default();
        debug!(
            "tokenizer {}: scanning bytes {}..{}",
            self.partition.replica, self.partition.start, self.partition.end
        );

        for word in words(self.text, self.partition.range(), self.delimiters) {
            let start = Instant::now();
            let waited = output.push(Token::new(word))?;
            if waited {
                report.wait.sample_now(&start);
            }
            report.tokens += 1;
        }

        output.complete()?;
        trace!(
            "tokenizer {}: completed after {} tokens",
            self.partition.replica,
            report.tokens
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    fn collect(text: &str, delimiters: &Delimiters) -> Vec<String> {
        let text = Bytes::from(text.to_owned());
        words(&text, 0..text.len(), delimiters)
            .map(|w| String::from_utf8(w.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn splits_on_default_delimiters() {
        let words = collect("Hello, world! (it's) a-b\tc\r\nd", &Delimiters::default());
        assert_eq!(words, vec!["Hello", "world", "it", "s", "a", "b", "c", "d"]);
    }

    #[test]
    fn whitespace_only_keeps_punctuation() {
        let words = collect("  Hello, world!  ", &Delimiters::whitespace());
        assert_eq!(words, vec!["Hello,", "world!"]);
    }

    #[test]
    fn range_is_respected() {
        let text = Bytes::from_static(b"aa bb cc");
        let d = Delimiters::default();
        let got: Vec<Bytes> = words(&text, 3..8, &d).collect();
        assert_eq!(got, vec![Bytes::from_static(b"bb"), Bytes::from_static(b"cc")]);
        assert_eq!(words(&text, 8..8, &d).count(), 0);
    }

    #[test]
    fn tokenization_is_repeatable() {
        let text = Bytes::from_static(b"one two, three; two one");
        let d = Delimiters::default();
        let first: Vec<Bytes> = words(&text, 0..text.len(), &d).collect();
        let second: Vec<Bytes> = words(&text, 0..text.len(), &d).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn parse_escaped_delimiters() {
        let d = Delimiters::parse_escaped(",\\n\\t\\\\").unwrap();
        assert!(d.contains(b','));
        assert!(d.contains(b'\n'));
        assert!(d.contains(b'\t'));
        assert!(d.contains(b'\\'));
        assert!(!d.contains(b' '));
        assert!(Delimiters::parse_escaped("\\q").is_err());
        assert!(Delimiters::parse_escaped("").is_err());
    }

    #[test]
    fn pushes_tokens_in_scan_order_then_completes() {
        let text = Bytes::from_static(b"the cat sat");
        let d = Delimiters::default();
        let buffer = BoundedBuffer::new(1, Stage::Tokens, 8);
        let report = Tokenizer::new(&text, Partition::new(1, 0, text.len()), &d)
            .run(&buffer)
            .unwrap();
        assert_eq!(report.tokens, 3);
        assert!(buffer.is_completed());
        let table = buffer.into_table().unwrap();
        let words: Vec<&[u8]> = table.entries().iter().map(|t| &t.word[..]).collect();
        assert_eq!(words, vec![&b"the"[..], b"cat", b"sat"]);
        assert!(table.entries().iter().all(|t| t.count == 1));
    }
}
