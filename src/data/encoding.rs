//! Encoding Detection Module
//! Samples a file's bytes and picks the most plausible charset from a fixed candidate set.

use encoding_rs::{Decoder, DecoderResult, Encoding};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Number of segments a file is sampled across by default.
pub const DEFAULT_STEPS: usize = 10;
/// Bytes read per sampled segment.
pub const DEFAULT_WINDOW_LEN: usize = 512;
/// Highest share of suspicious characters a winning candidate may show.
pub const DEFAULT_MAX_MESS_RATIO: f64 = 0.2;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16BE_BOM: [u8; 2] = [0xFE, 0xFF];

/// Raw bytes pulled from the inner reader per refill.
const RAW_BUFFER_LEN: usize = 8 * 1024;

// Lowercase non-ASCII letters expected in text written with each code page family.
const WESTERN_LETTERS: &str = "àáâãäåæçèéêëìíîïðñòóôõöøùúûüýþÿßœšžƒ";
const CENTRAL_LETTERS: &str = "ąćęłńśźżčďěňřšťůžőűáéíóúýäôöüĺľŕăâîşţçë";

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Failed to sample file: {0}")]
    Io(#[from] io::Error),
    #[error("Sample step count must be positive")]
    InvalidSteps,
    #[error("No candidate encoding fits the content (best guess {best}, mess ratio {mess_ratio:.2})")]
    Undetermined { best: Charset, mess_ratio: f64 },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Content is not valid {0}")]
    Malformed(Charset),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown charset label: {0}")]
pub struct UnknownCharset(pub String);

/// Text encodings considered during detection.
///
/// Latin-1 and ISO-8859-1 name the same code page and share [`Charset::Latin1`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Windows1252,
    Windows1250,
}

impl Charset {
    /// Single-byte candidates in tie-break preference order.
    pub const SINGLE_BYTE: [Charset; 3] = [Charset::Windows1252, Charset::Latin1, Charset::Windows1250];

    pub fn label(self) -> &'static str {
        match self {
            Charset::Utf8 => "utf-8",
            Charset::Utf16Le => "utf-16le",
            Charset::Utf16Be => "utf-16be",
            Charset::Latin1 => "iso-8859-1",
            Charset::Windows1252 => "windows-1252",
            Charset::Windows1250 => "windows-1250",
        }
    }

    pub fn is_utf16(self) -> bool {
        matches!(self, Charset::Utf16Le | Charset::Utf16Be)
    }

    /// Backing `encoding_rs` codec. True ISO-8859-1 has none: WHATWG folds it into windows-1252.
    fn encoding(self) -> Option<&'static Encoding> {
        match self {
            Charset::Utf8 => Some(encoding_rs::UTF_8),
            Charset::Utf16Le => Some(encoding_rs::UTF_16LE),
            Charset::Utf16Be => Some(encoding_rs::UTF_16BE),
            Charset::Latin1 => None,
            Charset::Windows1252 => Some(encoding_rs::WINDOWS_1252),
            Charset::Windows1250 => Some(encoding_rs::WINDOWS_1250),
        }
    }

    fn strip_bom(self, bytes: &[u8]) -> &[u8] {
        let bom: &[u8] = match self {
            Charset::Utf8 => &UTF8_BOM,
            Charset::Utf16Le => &UTF16LE_BOM,
            Charset::Utf16Be => &UTF16BE_BOM,
            _ => return bytes,
        };
        bytes.strip_prefix(bom).unwrap_or(bytes)
    }

    fn letters(self) -> &'static str {
        match self {
            Charset::Windows1250 => CENTRAL_LETTERS,
            _ => WESTERN_LETTERS,
        }
    }

    /// Strictly decode `bytes`, dropping a leading byte-order mark.
    pub fn decode(self, bytes: &[u8]) -> Result<Cow<'_, str>, DecodeError> {
        match self.encoding() {
            Some(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(self.strip_bom(bytes))
                .ok_or(DecodeError::Malformed(self)),
            None => Ok(encoding_rs::mem::decode_latin1(bytes)),
        }
    }

    /// Decode with replacement characters, for scoring samples that may be cut mid-character.
    fn decode_lossy(self, bytes: &[u8]) -> Cow<'_, str> {
        match self.encoding() {
            Some(encoding) => {
                let bytes = self.strip_bom(bytes);
                let bytes = if self.is_utf16() {
                    &bytes[..bytes.len() & !1]
                } else {
                    bytes
                };
                encoding.decode_without_bom_handling(bytes).0
            }
            None => encoding_rs::mem::decode_latin1(bytes),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Charset {
    type Err = UnknownCharset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "utf-16" | "utf16" | "utf-16le" => Ok(Charset::Utf16Le),
            "utf-16be" => Ok(Charset::Utf16Be),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Ok(Charset::Latin1),
            "windows-1252" | "cp1252" => Ok(Charset::Windows1252),
            "windows-1250" | "cp1250" => Ok(Charset::Windows1250),
            _ => Err(UnknownCharset(s.to_string())),
        }
    }
}

impl Serialize for Charset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Streams any [`Charset`] as UTF-8 without holding the whole source in memory.
///
/// Malformed input surfaces as an [`io::ErrorKind::InvalidData`] error.
pub struct DecodingReader<R> {
    inner: R,
    charset: Charset,
    decoder: Option<Decoder>,
    raw: Box<[u8]>,
    pending: Vec<u8>,
    pending_pos: usize,
    finished: bool,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, charset: Charset) -> Self {
        Self {
            inner,
            charset,
            decoder: charset.encoding().map(Encoding::new_decoder_with_bom_removal),
            raw: vec![0; RAW_BUFFER_LEN].into_boxed_slice(),
            pending: Vec::new(),
            pending_pos: 0,
            finished: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let read = self.inner.read(&mut self.raw)?;
        let last = read == 0;
        let input = &self.raw[..read];
        self.pending.clear();
        self.pending_pos = 0;

        match &mut self.decoder {
            Some(decoder) => {
                let capacity = decoder
                    .max_utf8_buffer_length_without_replacement(read)
                    .ok_or_else(|| io::Error::other("decoder buffer size overflow"))?;
                self.pending.resize(capacity, 0);
                let (result, _, written) =
                    decoder.decode_to_utf8_without_replacement(input, &mut self.pending, last);
                match result {
                    DecoderResult::InputEmpty => self.pending.truncate(written),
                    DecoderResult::Malformed(_, _) => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            DecodeError::Malformed(self.charset),
                        ))
                    }
                    DecoderResult::OutputFull => {
                        return Err(io::Error::other("decoder output buffer too small"))
                    }
                }
            }
            None => {
                self.pending.resize(read * 2, 0);
                let (_, written) = encoding_rs::mem::convert_latin1_to_utf8_partial(input, &mut self.pending);
                self.pending.truncate(written);
            }
        }

        self.finished = last;
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let available = &self.pending[self.pending_pos..];
            if !available.is_empty() {
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.pending_pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

/// Byte windows taken from a file.
struct Sample<'a> {
    windows: Vec<Cow<'a, [u8]>>,
    /// Windows are cut out of a larger file, so characters may straddle their edges.
    partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Score {
    mess_ratio: f64,
    coherence: f64,
}

/// Statistical charset detector over sampled file segments.
#[derive(Debug, Clone)]
pub struct EncodingDetector {
    steps: usize,
    window_len: usize,
    max_mess_ratio: f64,
}

impl Default for EncodingDetector {
    fn default() -> Self {
        Self::new(DEFAULT_STEPS)
    }
}

impl EncodingDetector {
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            window_len: DEFAULT_WINDOW_LEN,
            max_mess_ratio: DEFAULT_MAX_MESS_RATIO,
        }
    }

    pub fn with_window_len(mut self, window_len: usize) -> Self {
        self.window_len = window_len.max(2);
        self
    }

    /// Detect the charset of the file at `path`.
    pub fn detect_path(&self, path: &Path) -> Result<Charset, DetectionError> {
        if self.steps == 0 {
            return Err(DetectionError::InvalidSteps);
        }
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let sample = self.sample(&mut file, len)?;
        self.classify(&sample)
    }

    /// Detect the charset of an in-memory buffer, sampled the same way as a file.
    pub fn detect_bytes(&self, bytes: &[u8]) -> Result<Charset, DetectionError> {
        if self.steps == 0 {
            return Err(DetectionError::InvalidSteps);
        }
        let sample = self.sample(&mut Cursor::new(bytes), bytes.len() as u64)?;
        self.classify(&sample)
    }

    /// Detect the charset of a complete buffer, scoring every byte instead of a sample.
    pub fn detect_full(&self, bytes: &[u8]) -> Result<Charset, DetectionError> {
        self.classify(&Sample {
            windows: vec![Cow::Borrowed(bytes)],
            partial: false,
        })
    }

    fn sample<S: Read + Seek>(&self, source: &mut S, len: u64) -> io::Result<Sample<'static>> {
        let budget = (self.steps * self.window_len) as u64;
        if len <= budget {
            let mut whole = Vec::with_capacity(len as usize);
            source.read_to_end(&mut whole)?;
            return Ok(Sample {
                windows: vec![Cow::Owned(whole)],
                partial: false,
            });
        }

        let stride = len / self.steps as u64;
        let mut windows = Vec::with_capacity(self.steps);
        for step in 0..self.steps as u64 {
            // Even offsets keep UTF-16 code units aligned.
            let offset = (step * stride) & !1;
            source.seek(SeekFrom::Start(offset))?;
            let mut window = Vec::with_capacity(self.window_len);
            (&mut *source).take(self.window_len as u64).read_to_end(&mut window)?;
            windows.push(Cow::Owned(window));
        }
        Ok(Sample {
            windows,
            partial: true,
        })
    }

    fn classify(&self, sample: &Sample<'_>) -> Result<Charset, DetectionError> {
        if sample.windows.iter().all(|window| window.is_empty()) {
            return Ok(Charset::Utf8);
        }

        let head = sample.windows[0].as_ref();
        if let Some(charset) = sniff_bom(head) {
            return Ok(charset);
        }

        let candidates: Vec<Charset> = if let Some(charset) = sniff_utf16(&sample.windows) {
            vec![charset]
        } else if is_utf8(sample) {
            vec![Charset::Utf8]
        } else {
            Charset::SINGLE_BYTE.to_vec()
        };

        let mut best: Option<(Charset, Score)> = None;
        for charset in candidates {
            let score = score_sample(sample, charset);
            let better = match &best {
                None => true,
                Some((_, current)) => {
                    score.mess_ratio < current.mess_ratio
                        || (score.mess_ratio == current.mess_ratio && score.coherence > current.coherence)
                }
            };
            if better {
                best = Some((charset, score));
            }
        }

        match best {
            Some((charset, score)) if score.mess_ratio <= self.max_mess_ratio => Ok(charset),
            Some((charset, score)) => Err(DetectionError::Undetermined {
                best: charset,
                mess_ratio: score.mess_ratio,
            }),
            None => Ok(Charset::Utf8),
        }
    }
}

/// Detect the charset of the file at `path`, sampling it across `steps` segments.
pub fn detect_encoding(path: impl AsRef<Path>, steps: usize) -> Result<Charset, DetectionError> {
    EncodingDetector::new(steps).detect_path(path.as_ref())
}

fn sniff_bom(head: &[u8]) -> Option<Charset> {
    if head.starts_with(&UTF8_BOM) {
        Some(Charset::Utf8)
    } else if head.starts_with(&UTF16LE_BOM) {
        Some(Charset::Utf16Le)
    } else if head.starts_with(&UTF16BE_BOM) {
        Some(Charset::Utf16Be)
    } else {
        None
    }
}

/// BOM-less UTF-16 shows up as NUL bytes concentrated on one side of each code unit.
fn sniff_utf16(windows: &[Cow<'_, [u8]>]) -> Option<Charset> {
    let (mut pairs, mut high_first, mut low_first) = (0usize, 0usize, 0usize);
    for window in windows {
        for unit in window.chunks_exact(2) {
            pairs += 1;
            if unit[0] == 0 {
                high_first += 1;
            }
            if unit[1] == 0 {
                low_first += 1;
            }
        }
    }
    if pairs < 2 {
        return None;
    }

    let even = high_first as f64 / pairs as f64;
    let odd = low_first as f64 / pairs as f64;
    if odd >= 0.3 && even < 0.05 {
        Some(Charset::Utf16Le)
    } else if even >= 0.3 && odd < 0.05 {
        Some(Charset::Utf16Be)
    } else {
        None
    }
}

fn is_utf8(sample: &Sample<'_>) -> bool {
    sample.windows.iter().enumerate().all(|(index, window)| {
        let body = if sample.partial && index > 0 {
            let skip = window
                .iter()
                .take(3)
                .take_while(|byte| (**byte & 0xC0) == 0x80)
                .count();
            &window[skip..]
        } else {
            window.as_ref()
        };
        match std::str::from_utf8(body) {
            Ok(_) => true,
            Err(err) => sample.partial && err.error_len().is_none(),
        }
    })
}

fn score_sample(sample: &Sample<'_>, charset: Charset) -> Score {
    let (mut total, mut mess, mut letters, mut coherent) = (0usize, 0usize, 0usize, 0usize);
    for window in &sample.windows {
        let text = charset.decode_lossy(window);
        let mut chars = text.chars().peekable();
        let mut prev: Option<char> = None;
        while let Some(c) = chars.next() {
            let next = chars.peek().copied();
            let before = prev.replace(c);
            if c.is_whitespace() {
                continue;
            }
            total += 1;
            if c == char::REPLACEMENT_CHARACTER || c.is_control() {
                mess += 1;
                continue;
            }
            if c.is_ascii() {
                continue;
            }

            if c.is_alphabetic() {
                letters += 1;
                if c.to_lowercase().all(|lower| charset.letters().contains(lower)) {
                    coherent += 1;
                }
                // Uppercase letter in the middle of a lowercase word.
                if c.is_uppercase()
                    && before.is_some_and(char::is_lowercase)
                    && next.is_some_and(char::is_lowercase)
                {
                    mess += 1;
                }
            } else if before.is_some_and(char::is_alphabetic) && next.is_some_and(char::is_alphabetic) {
                mess += 1;
            }
        }
    }

    Score {
        mess_ratio: if total == 0 { 0.0 } else { mess as f64 / total as f64 },
        coherence: if letters == 0 { 1.0 } else { coherent as f64 / letters as f64 },
    }
}
