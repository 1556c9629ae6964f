//! Incremental text decoding and delimiter-based line reassembly.
//!
//! Bytes arrive from a channel in arbitrary chunks. [`TextDecoder`] turns
//! them into text without splitting multi-byte characters, and
//! [`LineFramer`] reassembles that text into complete lines regardless of
//! where the chunk boundaries fall.

use scalelink_core::Delimiter;
use tracing::warn;

/// Longest partial line kept without seeing a delimiter. Anything longer is
/// almost certainly garbage from a wrong baud rate or delimiter.
pub const MAX_PARTIAL_LINE: usize = 4096;

// ---------------------------------------------------------------------------
// TextDecoder
// ---------------------------------------------------------------------------

/// Streaming UTF-8 decoder.
///
/// An incomplete multi-byte sequence at the end of a chunk is held back
/// until the next chunk completes it. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk of bytes, returning whatever text is complete.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;

        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(s) => {
                    out.push_str(s);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // valid_up_to() guarantees this prefix is UTF-8.
                    out.push_str(&String::from_utf8_lossy(
                        &self.pending[start..start + valid],
                    ));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start += valid + bad;
                        }
                        None => {
                            // Truncated sequence at the end; wait for more.
                            start += valid;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        out
    }

    /// Flush any held-back bytes at end of stream.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

// ---------------------------------------------------------------------------
// LineFramer
// ---------------------------------------------------------------------------

/// Delimiter-based line reassembly over arbitrarily chunked text.
///
/// Holds at most one incomplete line. Empty segments between consecutive
/// delimiters are emitted as empty lines; filtering them is the caller's
/// job. One framer is used per channel open.
#[derive(Debug)]
pub struct LineFramer {
    delimiter: Delimiter,
    buf: String,
    max_partial: usize,
}

impl LineFramer {
    pub fn new(delimiter: Delimiter) -> Self {
        LineFramer {
            delimiter,
            buf: String::new(),
            max_partial: MAX_PARTIAL_LINE,
        }
    }

    /// Override the partial-line overflow limit.
    pub fn with_max_partial(mut self, max_partial: usize) -> Self {
        self.max_partial = max_partial.max(1);
        self
    }

    pub fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    /// The incomplete tail currently buffered.
    pub fn pending(&self) -> &str {
        &self.buf
    }

    /// Append a chunk and iterate over the lines it completes.
    ///
    /// Lines are split off lazily as the iterator is advanced. Dropping the
    /// iterator early leaves the remaining text buffered for the next call.
    pub fn push(&mut self, chunk: &str) -> Lines<'_> {
        self.buf.push_str(chunk);
        Lines { framer: self }
    }

    /// Split off the next complete line, if the buffer holds one.
    pub fn next_line(&mut self) -> Option<String> {
        let delim = self.delimiter.as_str();
        match self.buf.find(delim) {
            Some(pos) => {
                let line = self.buf[..pos].to_string();
                self.buf.drain(..pos + delim.len());
                Some(line)
            }
            None => {
                if self.buf.len() > self.max_partial {
                    warn!(
                        len = self.buf.len(),
                        delimiter = %self.delimiter,
                        "partial line overflow, discarding"
                    );
                    self.buf.clear();
                }
                None
            }
        }
    }

    /// End of stream: return the buffered tail as a final line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

/// Iterator over the lines completed by one [`LineFramer::push`].
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT_LINES: [&str; 4] = ["P 12345", "N 00120", "", "+12,7 kg"];

    fn joined(delim: Delimiter) -> String {
        let mut s = String::new();
        for line in TEXT_LINES {
            s.push_str(line);
            s.push_str(delim.as_str());
        }
        s
    }

    fn feed(framer: &mut LineFramer, chunks: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(framer.push(chunk));
        }
        out
    }

    #[test]
    fn chunk_boundary_independence_every_split_point() {
        for delim in Delimiter::ALL {
            let text = joined(delim);
            // Every two-way and three-way split at char boundaries.
            for i in 1..text.len() {
                for j in i + 1..text.len() {
                    let mut framer = LineFramer::new(delim);
                    let lines = feed(&mut framer, &[&text[..i], &text[i..j], &text[j..]]);
                    assert_eq!(lines, TEXT_LINES, "delim {delim} split {i}/{j}");
                    assert_eq!(framer.finish(), None);
                }
            }
        }
    }

    #[test]
    fn single_char_chunks() {
        for delim in Delimiter::ALL {
            let text = joined(delim);
            let chunks: Vec<String> = text.chars().map(|c| c.to_string()).collect();
            let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let mut framer = LineFramer::new(delim);
            assert_eq!(feed(&mut framer, &refs), TEXT_LINES);
        }
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut framer = LineFramer::new(Delimiter::CrLf);
        assert!(feed(&mut framer, &["abc\r"]).is_empty());
        assert_eq!(framer.pending(), "abc\r");
        assert_eq!(feed(&mut framer, &["\ndef\r\n"]), vec!["abc", "def"]);
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut framer = LineFramer::new(Delimiter::Lf);
        assert_eq!(feed(&mut framer, &["one\ntw", "o"]), vec!["one"]);
        assert_eq!(framer.finish().as_deref(), Some("two"));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn empty_segments_are_emitted() {
        let mut framer = LineFramer::new(Delimiter::Cr);
        assert_eq!(feed(&mut framer, &["\r\r1\r"]), vec!["", "", "1"]);
    }

    #[test]
    fn overflow_discards_partial_line() {
        let mut framer = LineFramer::new(Delimiter::Lf).with_max_partial(8);
        assert!(feed(&mut framer, &["0123456789"]).is_empty());
        assert_eq!(framer.pending(), "");
        assert_eq!(feed(&mut framer, &["ok\n"]), vec!["ok"]);
    }

    #[test]
    fn lines_are_lazy() {
        let mut framer = LineFramer::new(Delimiter::Lf);
        let first = framer.push("a\nb\nc").next();
        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(framer.pending(), "b\nc");
        assert_eq!(framer.next_line().as_deref(), Some("b"));
        assert_eq!(framer.finish().as_deref(), Some("c"));
    }

    #[test]
    fn text_decoder_holds_split_multibyte() {
        let mut dec = TextDecoder::new();
        let bytes = "1,5 kg \u{00b0}".as_bytes();
        let (a, b) = bytes.split_at(bytes.len() - 1);
        let mut s = dec.decode(a);
        assert!(!s.contains('\u{fffd}'));
        s.push_str(&dec.decode(b));
        assert_eq!(s, "1,5 kg \u{00b0}");
    }

    #[test]
    fn text_decoder_replaces_invalid_bytes() {
        let mut dec = TextDecoder::new();
        let s = dec.decode(&[b'1', 0xFF, b'2', 0x80]);
        assert_eq!(s, "1\u{fffd}2\u{fffd}");
        assert_eq!(dec.finish(), "");
    }

    #[test]
    fn text_decoder_finish_flushes_truncated() {
        let mut dec = TextDecoder::new();
        assert_eq!(dec.decode(&[b'x', 0xE2, 0x82]), "x");
        assert_eq!(dec.finish(), "\u{fffd}");
    }
}
