//! Incremental decoding of raw pipe bytes into complete text lines.
//!
//! Pipe reads can split a multi-byte UTF-8 character or a line anywhere, so
//! each stream owns a [`LineDecoder`] that carries undecodable trailing bytes
//! and the current partial line across reads. Feeding the same byte sequence
//! in any chunking produces the same line sequence.
//!
//! The downloader rewrites its progress line in place using bare carriage
//! returns, so `\r` is treated as a line boundary alongside `\n` and `\r\n`.

/// Per-stream decoder state. One instance per pipe per run; never shared.
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Bytes that did not yet form a complete UTF-8 sequence.
    carry: Vec<u8>,
    /// Decoded text still waiting for a line terminator.
    partial: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk and return every line completed by it, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut decoded = String::new();
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.carry[consumed..]) {
                Ok(text) => {
                    decoded.push_str(text);
                    consumed = self.carry.len();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(
                        &self.carry[consumed..consumed + valid],
                    ));
                    match err.error_len() {
                        // Invalid bytes in the middle of the stream: replace
                        // and keep going.
                        Some(bad) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid + bad;
                        }
                        // Truncated sequence at the end: keep it for the next
                        // read.
                        None => {
                            consumed += valid;
                            break;
                        }
                    }
                }
            }
        }
        self.carry.drain(..consumed);

        self.split_lines(&decoded)
    }

    /// Flush whatever remains (carry bytes and partial line) as a final line.
    /// Called once, after EOF.
    pub fn finish(mut self) -> Option<String> {
        if !self.carry.is_empty() {
            let tail = String::from_utf8_lossy(&self.carry).into_owned();
            self.partial.push_str(&tail);
        }
        let tail = std::mem::take(&mut self.partial);
        let tail = tail.trim_end_matches(['\r', '\n']);
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }

    fn split_lines(&mut self, decoded: &str) -> Vec<String> {
        self.partial.push_str(decoded);

        let mut lines = Vec::new();
        loop {
            let Some(idx) = self.partial.find(['\n', '\r']) else {
                break;
            };
            let bytes = self.partial.as_bytes();
            // A trailing '\r' may be the first half of "\r\n"; wait for the
            // next chunk to decide.
            if bytes[idx] == b'\r' && idx + 1 == self.partial.len() {
                break;
            }
            let mut consume = idx + 1;
            if bytes[idx] == b'\r' && bytes.get(idx + 1) == Some(&b'\n') {
                consume += 1;
            }
            lines.push(self.partial[..idx].to_string());
            self.partial.drain(..consume);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8], chunk_size: usize) -> Vec<String> {
        let mut decoder = LineDecoder::new();
        let mut lines = Vec::new();
        for chunk in input.chunks(chunk_size.max(1)) {
            lines.extend(decoder.push_chunk(chunk));
        }
        lines.extend(decoder.finish());
        lines
    }

    #[test]
    fn simple_lines() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push_chunk(b"one\ntwo\nthree");
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(decoder.finish(), Some("three".to_string()));
    }

    #[test]
    fn crlf_and_bare_cr_are_boundaries() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push_chunk(b"a\r\nb\rc\n");
        assert_eq!(lines, vec!["a", "b", "c"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn cr_split_from_lf_across_chunks_yields_one_boundary() {
        let mut decoder = LineDecoder::new();
        let mut lines = decoder.push_chunk(b"first\r");
        lines.extend(decoder.push_chunk(b"\nsecond\n"));
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn chunk_boundaries_never_change_the_line_sequence() {
        let input = "héllo wörld\n日本語のテキスト\r\ndownload:100|200|NA|4\nпоследний".as_bytes();
        let reference = decode_all(input, input.len());
        for chunk_size in 1..input.len() {
            assert_eq!(
                decode_all(input, chunk_size),
                reference,
                "chunk size {chunk_size} altered the line sequence"
            );
        }
    }

    #[test]
    fn multibyte_character_split_across_reads_is_reassembled() {
        let mut decoder = LineDecoder::new();
        let bytes = "ü\n".as_bytes();
        assert!(decoder.push_chunk(&bytes[..1]).is_empty());
        let lines = decoder.push_chunk(&bytes[1..]);
        assert_eq!(lines, vec!["ü"]);
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push_chunk(b"ok\xFF\xFEstill ok\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok"));
        assert!(lines[0].contains('\u{FFFD}'));
        assert!(lines[0].ends_with("still ok"));
    }

    #[test]
    fn finish_flushes_truncated_multibyte_tail() {
        let mut decoder = LineDecoder::new();
        let bytes = "tail é".as_bytes();
        // Feed all but the last byte of the two-byte 'é'.
        assert!(decoder.push_chunk(&bytes[..bytes.len() - 1]).is_empty());
        let flushed = decoder.finish().expect("tail line");
        assert!(flushed.starts_with("tail "));
    }

    #[test]
    fn empty_input_produces_nothing() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push_chunk(b"").is_empty());
        assert_eq!(decoder.finish(), None);
    }
}
