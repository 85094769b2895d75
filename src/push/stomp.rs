//! STOMP 1.2 over a WebSocket, enough of it for topic subscriptions.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use super::{PushChannel, PushMessage};
use crate::error::ChannelError;
use crate::transport::Session;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct StompChannel {
  url: Url,
  auth_token: Option<String>,
  socket: Option<Socket>,
  next_subscription: u64,
}

impl StompChannel {
  pub fn new(url: Url, session: &Session) -> Self {
    Self {
      url,
      auth_token: session.auth_token.clone(),
      socket: None,
      next_subscription: 0,
    }
  }

  fn connect_frame(&self) -> Frame {
    let mut frame = Frame::new("CONNECT")
      .header("accept-version", "1.2")
      .header("host", self.url.host_str().unwrap_or("localhost"))
      // Heart-beating is off; a dead socket surfaces as a read error.
      .header("heart-beat", "0,0");
    if let Some(token) = &self.auth_token {
      frame = frame.header("Authorization", format!("Bearer {}", token));
    }
    frame
  }
}

#[async_trait]
impl PushChannel for StompChannel {
  async fn connect(&mut self) -> Result<(), ChannelError> {
    self.socket = None;
    self.next_subscription = 0;

    let (mut socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
      .await
      .map_err(|e| ChannelError::Connect(e.to_string()))?;
    socket.send(Message::Text(self.connect_frame().encode())).await?;

    let reply = read_frame(&mut socket).await.ok_or(ChannelError::Closed)??;
    match reply.command.as_str() {
      "CONNECTED" => {}
      "ERROR" => return Err(reply.broker_error()),
      other => {
        return Err(ChannelError::Protocol(format!(
          "expected CONNECTED, got {}",
          other
        )))
      }
    }

    debug!(
      url = %self.url,
      version = reply.get("version").unwrap_or("?"),
      "stomp session established"
    );
    self.socket = Some(socket);
    Ok(())
  }

  async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError> {
    let socket = self.socket.as_mut().ok_or(ChannelError::Closed)?;
    let id = format!("sub-{}", self.next_subscription);
    self.next_subscription += 1;

    let frame = Frame::new("SUBSCRIBE")
      .header("id", id)
      .header("destination", destination)
      .header("ack", "auto");
    socket.send(Message::Text(frame.encode())).await?;
    Ok(())
  }

  async fn next_message(&mut self) -> Option<Result<PushMessage, ChannelError>> {
    loop {
      let frame = match self.socket.as_mut() {
        Some(socket) => read_frame(socket).await,
        None => return None,
      };
      let frame = match frame {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Some(Err(e)),
        None => {
          self.socket = None;
          return None;
        }
      };

      match frame.command.as_str() {
        "MESSAGE" => {
          return Some(Ok(PushMessage {
            destination: frame.get("destination").unwrap_or_default().to_string(),
            body: frame.body,
          }))
        }
        "ERROR" => return Some(Err(frame.broker_error())),
        other => trace!(command = other, "ignoring stomp frame"),
      }
    }
  }
}

/// Next STOMP frame from the socket, skipping heart-beats and control
/// messages. `None` once the socket is closed.
async fn read_frame(socket: &mut Socket) -> Option<Result<Frame, ChannelError>> {
  loop {
    let text = match socket.next().await? {
      Ok(Message::Text(text)) => text,
      Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => return Some(Err(ChannelError::Protocol("frame is not UTF-8".into()))),
      },
      Ok(Message::Close(_)) => return None,
      Ok(_) => continue,
      Err(e) => return Some(Err(e.into())),
    };

    match Frame::parse(&text) {
      Ok(Some(frame)) => return Some(Ok(frame)),
      Ok(None) => continue,
      Err(e) => return Some(Err(e)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
  command: String,
  headers: Vec<(String, String)>,
  body: String,
}

impl Frame {
  fn new(command: &str) -> Self {
    Self {
      command: command.to_string(),
      headers: Vec::new(),
      body: String::new(),
    }
  }

  fn header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.push((name.to_string(), value.into()));
    self
  }

  /// First value of a header; repeated headers keep the first.
  fn get(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }

  fn broker_error(&self) -> ChannelError {
    let message = match self.get("message") {
      Some(m) => m.to_string(),
      None => self.body.trim().to_string(),
    };
    ChannelError::Broker(message)
  }

  fn encode(&self) -> String {
    // CONNECT headers are sent verbatim
    let escape_values = self.command != "CONNECT";
    let mut out = format!("{}\n", self.command);
    for (name, value) in &self.headers {
      if escape_values {
        out.push_str(&format!("{}:{}\n", escape(name), escape(value)));
      } else {
        out.push_str(&format!("{}:{}\n", name, value));
      }
    }
    out.push('\n');
    out.push_str(&self.body);
    out.push('\0');
    out
  }

  /// `Ok(None)` for a heart-beat.
  fn parse(text: &str) -> Result<Option<Self>, ChannelError> {
    let text = text.trim_start_matches(['\r', '\n']);
    if text.is_empty() {
      return Ok(None);
    }

    let (head, rest) = split_head(text)
      .ok_or_else(|| ChannelError::Protocol("frame has no end of headers".into()))?;
    let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
    let command = lines.next().unwrap_or_default().to_string();
    let unescape_values = command != "CONNECTED";

    let mut headers = Vec::new();
    for line in lines {
      let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ChannelError::Protocol(format!("bad header line {:?}", line)))?;
      if unescape_values {
        headers.push((unescape(name)?, unescape(value)?));
      } else {
        headers.push((name.to_string(), value.to_string()));
      }
    }

    let mut frame = Self {
      command,
      headers,
      body: String::new(),
    };
    let length = frame.get("content-length").and_then(|l| l.parse::<usize>().ok());
    frame.body = match length.and_then(|n| rest.get(..n)) {
      Some(body) => body.to_string(),
      None => rest.split('\0').next().unwrap_or_default().to_string(),
    };
    Ok(Some(frame))
  }
}

/// Headers end at the first blank line, LF or CRLF.
fn split_head(text: &str) -> Option<(&str, &str)> {
  let lf = text.find("\n\n").map(|i| (i, 2));
  let crlf = text.find("\n\r\n").map(|i| (i, 3));
  let (at, len) = match (lf, crlf) {
    (Some(a), Some(b)) => {
      if a.0 < b.0 {
        a
      } else {
        b
      }
    }
    (a, b) => a.or(b)?,
  };
  Some((&text[..at], &text[at + len..]))
}

fn escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      ':' => out.push_str("\\c"),
      c => out.push(c),
    }
  }
  out
}

fn unescape(s: &str) -> Result<String, ChannelError> {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
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
      other => {
        return Err(ChannelError::Protocol(format!(
          "undefined header escape \\{}",
          other.map(String::from).unwrap_or_default()
        )))
      }
    }
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_connect_frame() {
    let channel = StompChannel::new(
      Url::parse("ws://push.example.com:8080/ws").unwrap(),
      &Session {
        auth_token: Some("abc".into()),
      },
    );
    assert_eq!(
      channel.connect_frame().encode(),
      "CONNECT\naccept-version:1.2\nhost:push.example.com\nheart-beat:0,0\nAuthorization:Bearer abc\n\n\0"
    );
  }

  #[test]
  fn test_subscribe_frame_escapes_values() {
    let frame = Frame::new("SUBSCRIBE")
      .header("id", "sub-0")
      .header("destination", "/topic/a:b");
    assert_eq!(
      frame.encode(),
      "SUBSCRIBE\nid:sub-0\ndestination:/topic/a\\cb\n\n\0"
    );
  }

  #[test]
  fn test_parse_message() {
    let text = "MESSAGE\ndestination:/topic/task-updated\nsubscription:sub-4\nmessage-id:1\n\n{\"id\":7}\0";
    let frame = Frame::parse(text).unwrap().unwrap();
    assert_eq!(frame.command, "MESSAGE");
    assert_eq!(frame.get("destination"), Some("/topic/task-updated"));
    assert_eq!(frame.body, "{\"id\":7}");
  }

  #[test]
  fn test_parse_crlf_and_content_length() {
    let text = "MESSAGE\r\ndestination:/topic/comments\r\ncontent-length:4\r\n\r\nnull\0trailing";
    let frame = Frame::parse(text).unwrap().unwrap();
    assert_eq!(frame.get("destination"), Some("/topic/comments"));
    assert_eq!(frame.body, "null");
  }

  #[test]
  fn test_heartbeats_are_skipped() {
    assert_eq!(Frame::parse("\n").unwrap(), None);
    assert_eq!(Frame::parse("\r\n\r\n").unwrap(), None);
    let frame = Frame::parse("\nCONNECTED\nversion:1.2\n\n\0").unwrap().unwrap();
    assert_eq!(frame.command, "CONNECTED");
  }

  #[test]
  fn test_error_frame_becomes_broker_error() {
    let frame = Frame::parse("ERROR\nmessage:Access denied\n\ndetails\0")
      .unwrap()
      .unwrap();
    assert!(matches!(frame.broker_error(), ChannelError::Broker(m) if m == "Access denied"));

    let frame = Frame::parse("ERROR\n\nno header\n\0").unwrap().unwrap();
    assert!(matches!(frame.broker_error(), ChannelError::Broker(m) if m == "no header"));
  }

  #[test]
  fn test_malformed_frames() {
    assert!(matches!(
      Frame::parse("MESSAGE\ndestination:/topic/x"),
      Err(ChannelError::Protocol(_))
    ));
    assert!(matches!(
      Frame::parse("MESSAGE\nbroken-header\n\n\0"),
      Err(ChannelError::Protocol(_))
    ));
    assert!(matches!(
      Frame::parse("MESSAGE\nbad:\\t\n\n\0"),
      Err(ChannelError::Protocol(_))
    ));
  }

  #[test]
  fn test_unescape_reverses_escape() {
    let raw = "a:b\\c\nd";
    assert_eq!(unescape(&escape(raw)).unwrap(), raw);
  }
}
