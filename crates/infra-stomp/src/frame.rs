// STOMP 1.2 frame codec
// Buffer-based so reads can be timed out without losing partial frames

use thiserror::Error;

/// Largest frame (headers plus body) the decoder will buffer: 64 MiB
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Invalid header escape sequence in {0:?}")]
    BadEscape(String),
}

/// One STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// What the decoder produced from the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadItem {
    /// Bare EOL sent as a heart-beat
    Heartbeat,
    Frame(Frame),
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins for repeated headers
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT and CONNECTED frames carry headers verbatim
    fn escapes_headers(command: &str) -> bool {
        !matches!(command, "CONNECT" | "CONNECTED")
    }

    pub fn encode(&self) -> Vec<u8> {
        let escape = Self::escapes_headers(&self.command);
        let mut out = Vec::with_capacity(self.command.len() + 64 + self.body.len());
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');

        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::BadEscape(raw.to_string())),
        }
    }
    Ok(out)
}

fn utf8(bytes: &[u8]) -> Result<&str, FrameError> {
    std::str::from_utf8(bytes).map_err(|e| FrameError::Malformed(e.to_string()))
}

fn too_large(size: usize) -> FrameError {
    FrameError::Malformed(format!("frame of {size} bytes exceeds {MAX_FRAME_SIZE}"))
}

/// Take the next complete item off the front of `buf`
///
/// Returns `Ok(None)` when more bytes are needed; `buf` is untouched then.
pub fn decode(buf: &mut Vec<u8>) -> Result<Option<ReadItem>, FrameError> {
    if buf.first() == Some(&b'\n') {
        buf.drain(..1);
        return Ok(Some(ReadItem::Heartbeat));
    }
    if buf.starts_with(b"\r\n") {
        buf.drain(..2);
        return Ok(Some(ReadItem::Heartbeat));
    }

    // Command and header lines up to the first blank line
    let mut pos = 0;
    let mut lines: Vec<&[u8]> = Vec::new();
    loop {
        let Some(nl) = buf[pos..].iter().position(|b| *b == b'\n') else {
            if buf.len() > MAX_FRAME_SIZE {
                return Err(too_large(buf.len()));
            }
            return Ok(None);
        };
        let mut line = &buf[pos..pos + nl];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        pos += nl + 1;
        if line.is_empty() {
            break;
        }
        lines.push(line);
    }

    let (command, header_lines) = lines
        .split_first()
        .ok_or_else(|| FrameError::Malformed("missing command".to_string()))?;
    let command = utf8(command)?.to_string();
    let escape = Frame::escapes_headers(&command);

    let mut headers = Vec::with_capacity(header_lines.len());
    for line in header_lines {
        let line = utf8(line)?;
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::Malformed(format!("header without colon: {line:?}")))?;
        if escape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::Malformed(format!("bad content-length {v:?}")))
        })
        .transpose()?;

    let (body_end, consumed) = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .filter(|end| *end < MAX_FRAME_SIZE)
                .ok_or_else(|| too_large(len))?;
            if buf.len() <= end {
                return Ok(None);
            }
            if buf[end] != 0 {
                return Err(FrameError::Malformed(
                    "body not terminated by NUL after content-length".to_string(),
                ));
            }
            (end, end + 1)
        }
        None => match buf[pos..].iter().position(|b| *b == 0) {
            Some(nul) => (pos + nul, pos + nul + 1),
            None if buf.len() > MAX_FRAME_SIZE => return Err(too_large(buf.len())),
            None => return Ok(None),
        },
    };

    let body = buf[pos..body_end].to_vec();
    buf.drain(..consumed);

    Ok(Some(ReadItem::Frame(Frame {
        command,
        headers,
        body,
    })))
}
