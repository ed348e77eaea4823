//! Minimal STOMP 1.2 frame codec, client side.

use std::time::Duration;

use crate::error::RealtimeError;

/// Text sent on its own as a heart-beat.
pub const HEARTBEAT: &str = "\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  pub command: String,
  pub headers: Vec<(String, String)>,
  pub body: String,
}

impl Frame {
  pub fn new(command: impl Into<String>) -> Self {
    Self {
      command: command.into(),
      headers: Vec::new(),
      body: String::new(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = body.into();
    self
  }

  /// First value of a header; repeated headers keep the first occurrence.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }

  pub fn connect(host: &str, heartbeat: Duration) -> Self {
    let ms = heartbeat.as_millis();
    Frame::new("CONNECT")
      .with_header("accept-version", "1.2")
      .with_header("host", host)
      .with_header("heart-beat", format!("{},{}", ms, ms))
  }

  pub fn subscribe(id: &str, destination: &str) -> Self {
    Frame::new("SUBSCRIBE")
      .with_header("id", id)
      .with_header("destination", destination)
      .with_header("ack", "auto")
  }

  pub fn disconnect() -> Self {
    Frame::new("DISCONNECT")
  }

  // CONNECT and CONNECTED headers are never escaped
  fn raw_headers(command: &str) -> bool {
    command == "CONNECT" || command == "CONNECTED"
  }

  pub fn encode(&self) -> String {
    let raw = Self::raw_headers(&self.command);
    let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
    out.push_str(&self.command);
    out.push('\n');
    for (name, value) in &self.headers {
      if raw {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
      } else {
        escape_into(&mut out, name);
        out.push(':');
        escape_into(&mut out, value);
      }
      out.push('\n');
    }
    out.push('\n');
    out.push_str(&self.body);
    out.push('\0');
    out
  }

  /// Parse one frame. Heart-beats (bare end-of-lines) yield `None`.
  pub fn parse(text: &str) -> Result<Option<Frame>, RealtimeError> {
    let mut rest = text.trim_start_matches(['\r', '\n']);
    if rest.is_empty() {
      return Ok(None);
    }

    let command = take_line(&mut rest)
      .ok_or_else(|| RealtimeError::Frame("missing command line".to_string()))?
      .to_string();
    let raw = Self::raw_headers(&command);

    let mut headers = Vec::new();
    loop {
      let line = take_line(&mut rest)
        .ok_or_else(|| RealtimeError::Frame("headers not terminated".to_string()))?;
      if line.is_empty() {
        break;
      }
      let (name, value) = line
        .split_once(':')
        .ok_or_else(|| RealtimeError::Frame(format!("malformed header {:?}", line)))?;
      if raw {
        headers.push((name.to_string(), value.to_string()));
      } else {
        headers.push((unescape(name)?, unescape(value)?));
      }
    }

    let frame = Frame {
      command,
      headers,
      body: String::new(),
    };
    let body = match frame.header("content-length") {
      Some(len) => {
        let len: usize = len
          .parse()
          .map_err(|_| RealtimeError::Frame(format!("bad content-length {:?}", len)))?;
        rest
          .get(..len)
          .ok_or_else(|| RealtimeError::Frame("body shorter than content-length".to_string()))?
      }
      None => rest
        .find('\0')
        .map(|end| &rest[..end])
        .ok_or_else(|| RealtimeError::Frame("missing NUL terminator".to_string()))?,
    };

    Ok(Some(frame.with_body(body)))
  }
}

/// Heart-beat intervals agreed with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
  /// How often we must send something
  pub send: Option<Duration>,
  /// How often the broker promised to send something
  pub expect: Option<Duration>,
}

impl HeartBeat {
  /// Combine our advertised interval with the broker's `heart-beat` header.
  pub fn negotiate(ours: Duration, connected: &Frame) -> Self {
    let (server_send, server_want) = connected
      .header("heart-beat")
      .and_then(|value| value.split_once(','))
      .and_then(|(sx, sy)| Some((sx.trim().parse::<u64>().ok()?, sy.trim().parse::<u64>().ok()?)))
      .unwrap_or((0, 0));
    let ours = ours.as_millis() as u64;
    let pick = |theirs: u64| (ours > 0 && theirs > 0).then(|| Duration::from_millis(ours.max(theirs)));
    Self {
      send: pick(server_want),
      expect: pick(server_send),
    }
  }
}

fn take_line<'a>(rest: &mut &'a str) -> Option<&'a str> {
  let end = rest.find('\n')?;
  let line = rest[..end].trim_end_matches('\r');
  *rest = &rest[end + 1..];
  Some(line)
}

fn escape_into(out: &mut String, value: &str) {
  for c in value.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\r' => out.push_str("\\r"),
      '\n' => out.push_str("\\n"),
      ':' => out.push_str("\\c"),
      c => out.push(c),
    }
  }
}

fn unescape(value: &str) -> Result<String, RealtimeError> {
  let mut out = String::with_capacity(value.len());
  let mut chars = value.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('\\') => out.push('\\'),
      Some('r') => out.push('\r'),
      Some('n') => out.push('\n'),
      Some('c') => out.push(':'),
      other => {
        return Err(RealtimeError::Frame(format!(
          "undefined escape sequence \\{}",
          other.map(String::from).unwrap_or_default()
        )))
      }
    }
  }
  Ok(out)
}
