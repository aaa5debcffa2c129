//! Incremental SSE segment decoder

/// One `event:`/`data:` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

/// Splits a byte stream into segments on a fixed delimiter.
///
/// Bytes are buffered until a whole segment is present, so a multi-byte
/// character split across chunks decodes intact.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    delimiter: &'static [u8],
}

impl SseDecoder {
    pub const LF: &'static str = "\n\n";
    pub const CRLF: &'static str = "\r\n\r\n";

    pub fn new(delimiter: &'static str) -> Self {
        Self {
            buffer: Vec::new(),
            delimiter: delimiter.as_bytes(),
        }
    }

    /// Append a chunk and return every segment it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Segment> {
        self.buffer.extend_from_slice(chunk);

        let mut segments = Vec::new();
        while let Some(pos) = find(&self.buffer, self.delimiter) {
            let rest = self.buffer.split_off(pos + self.delimiter.len());
            let mut raw = std::mem::replace(&mut self.buffer, rest);
            raw.truncate(pos);
            if let Some(segment) = parse_segment(&raw) {
                segments.push(segment);
            }
        }
        segments
    }

    /// Flush a trailing segment that arrived without a delimiter
    pub fn finish(&mut self) -> Option<Segment> {
        let raw = std::mem::take(&mut self.buffer);
        parse_segment(&raw)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_segment(raw: &[u8]) -> Option<Segment> {
    let text = String::from_utf8_lossy(raw);
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(Segment {
        event,
        data: data.join("\n"),
    })
}
