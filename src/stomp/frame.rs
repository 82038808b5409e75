// STOMP 1.2 frame codec for text WebSocket transport
// https://stomp.github.io/stomp-specification-1.2.html

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // Client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // Server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }

    // CONNECT/CONNECTED headers are sent verbatim for 1.0 compatibility
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Frame {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`; repeated headers after the first are ignored
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `heart-beat` header as (outgoing, incoming) milliseconds
    pub fn heart_beat(&self) -> Option<(u64, u64)> {
        let value = self.header("heart-beat")?;
        let (out, inc) = value.split_once(',')?;
        Some((out.trim().parse().ok()?, inc.trim().parse().ok()?))
    }

    pub fn connect(host: &str, token: &str, heart_beat: (u64, u64)) -> Self {
        Frame::new(Command::Connect)
            .with_header("accept-version", "1.2,1.1")
            .with_header("host", host)
            .with_header("heart-beat", &format!("{},{}", heart_beat.0, heart_beat.1))
            .with_header("Authorization", &format!("Bearer {}", token))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).with_header("id", id)
    }

    pub fn send_json(destination: &str, body: &str) -> Self {
        Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).with_header("receipt", receipt)
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
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
            Some(other) => return Err(FrameError::InvalidEscape(other)),
            None => return Err(FrameError::InvalidEscape(' ')),
        }
    }
    Ok(out)
}

/// Largest body a broker may announce through content-length
pub const MAX_BODY_LEN: usize = 1024 * 1024;

/// Incremental decoder: frames may be split across (or batched within) WebSocket messages.
/// Bare EOLs between frames are heart-beats and are skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes
    pub fn push(&mut self, chunk: &str) -> Result<Vec<Frame>, FrameError> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();
        loop {
            let skipped = self.buffer.len() - self.buffer.trim_start_matches(['\n', '\r']).len();
            self.buffer.drain(..skipped);
            if self.buffer.is_empty() {
                break;
            }
            match parse_frame(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    self.buffer.drain(..consumed);
                    frames.push(frame);
                }
                Ok(None) => break,
                Err(e) => {
                    // Drop everything buffered; the stream is out of sync
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }
        Ok(frames)
    }

    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Parse one frame from the start of `input`. `Ok(None)` means more data is needed.
fn parse_frame(input: &str) -> Result<Option<(Frame, usize)>, FrameError> {
    let bytes = input.as_bytes();

    let command_end = match input.find('\n') {
        Some(pos) => pos,
        None => return Ok(None),
    };
    let command_line = input[..command_end].trim_end_matches('\r');
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

    let mut headers = Vec::new();
    let mut pos = command_end + 1;
    loop {
        let line_end = match input[pos..].find('\n') {
            Some(offset) => pos + offset,
            None => return Ok(None),
        };
        let line = input[pos..line_end].trim_end_matches('\r');
        pos = line_end + 1;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
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
                .map_err(|_| FrameError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .filter(|_| len <= MAX_BODY_LEN)
                .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
            if bytes.len() <= end {
                return Ok(None);
            }
            if bytes[end] != 0 {
                return Err(FrameError::MissingTerminator);
            }
            end
        }
        None => match input[pos..].find('\0') {
            Some(offset) => pos + offset,
            None => return Ok(None),
        },
    };

    let body = std::str::from_utf8(&bytes[pos..body_end])
        .map_err(|_| FrameError::InvalidUtf8)?
        .to_string();

    Ok(Some((Frame { command, headers, body }, body_end + 1)))
}
