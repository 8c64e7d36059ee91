//! Transport charsets and the incremental encoder used for text bodies.
//!
//! Characters a charset cannot represent are replaced with `?`. The encoder
//! writes into a caller-provided buffer and reports when it fills, so large
//! strings can be split across chain segments without an intermediate copy.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

const REPLACEMENT: u8 = b'?';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    /// ISO-8859-1
    Latin1,
    Ascii,
}

impl Charset {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }

    /// Encoded form of one character, with replacement for unmappables.
    fn encode_char(self, c: char, out: &mut [u8; 4]) -> usize {
        match self {
            Charset::Utf8 => c.encode_utf8(out).len(),
            Charset::Latin1 => {
                out[0] = u8::try_from(u32::from(c)).unwrap_or(REPLACEMENT);
                1
            }
            Charset::Ascii => {
                out[0] = if c.is_ascii() { c as u8 } else { REPLACEMENT };
                1
            }
        }
    }

    /// Encode a whole string into a fresh vector.
    #[must_use]
    pub fn encode_to_vec(self, s: &str) -> Vec<u8> {
        if self == Charset::Utf8 {
            return s.as_bytes().to_vec();
        }
        let mut out = Vec::with_capacity(s.len());
        let mut tmp = [0u8; 4];
        for c in s.chars() {
            let n = self.encode_char(c, &mut tmp);
            out.extend_from_slice(&tmp[..n]);
        }
        out
    }

    /// Start streaming `input` through this charset.
    #[must_use]
    pub fn encoder(self, input: &str) -> Encoder<'_> {
        Encoder {
            charset: self,
            rest: input,
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Charset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Charset::Latin1),
            "us-ascii" | "ascii" => Ok(Charset::Ascii),
            other => Err(format!("unsupported charset '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for Charset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome of one [`Encoder::encode`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderResult {
    /// All input consumed.
    Underflow,
    /// The output buffer is full; flush it and call again.
    Overflow,
    /// No progress is possible: a single character does not fit the buffer.
    Error,
}

/// Incremental encoder over a borrowed string.
pub struct Encoder<'a> {
    charset: Charset,
    rest: &'a str,
}

impl Encoder<'_> {
    /// Encode as much input as fits into `out`, returning the bytes written.
    pub fn encode(&mut self, out: &mut [u8]) -> (usize, CoderResult) {
        let mut written = 0;
        let mut tmp = [0u8; 4];
        let mut consumed = 0;
        let rest = self.rest;
        for c in rest.chars() {
            let n = self.charset.encode_char(c, &mut tmp);
            if written + n > out.len() {
                self.rest = &rest[consumed..];
                let result = if written == 0 {
                    CoderResult::Error
                } else {
                    CoderResult::Overflow
                };
                return (written, result);
            }
            out[written..written + n].copy_from_slice(&tmp[..n]);
            written += n;
            consumed += c.len_utf8();
        }
        self.rest = "";
        (written, CoderResult::Underflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(charset: Charset, input: &str, cap: usize) -> (Vec<Vec<u8>>, CoderResult) {
        let mut enc = charset.encoder(input);
        let mut buf = vec![0u8; cap];
        let mut chunks = Vec::new();
        loop {
            let (n, result) = enc.encode(&mut buf);
            if n > 0 {
                chunks.push(buf[..n].to_vec());
            }
            if result != CoderResult::Overflow {
                return (chunks, result);
            }
        }
    }

    #[test]
    fn test_utf8_chunks_concatenate() {
        let input = "héllo wörld ✓";
        let (chunks, result) = drain(Charset::Utf8, input, 4);
        assert_eq!(result, CoderResult::Underflow);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), input.as_bytes());
    }

    #[test]
    fn test_latin1_replaces_unmappable() {
        assert_eq!(Charset::Latin1.encode_to_vec("é✓"), vec![0xE9, b'?']);
        assert_eq!(Charset::Ascii.encode_to_vec("é!"), b"?!".to_vec());
    }

    #[test]
    fn test_char_wider_than_buffer_is_error() {
        let (chunks, result) = drain(Charset::Utf8, "✓", 2);
        assert!(chunks.is_empty());
        assert_eq!(result, CoderResult::Error);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("utf-8".parse::<Charset>(), Ok(Charset::Utf8));
        assert_eq!("ISO_8859_1".parse::<Charset>(), Ok(Charset::Latin1));
        assert!("ebcdic".parse::<Charset>().is_err());
    }
}
