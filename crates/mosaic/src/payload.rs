//! Raw data channel payloads

use bytes::Bytes;

/// A single data channel message as it crossed the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 string message (JSON telemetry, commands, pings)
    Text(String),
    /// Binary message (point cloud chunks)
    Binary(Bytes),
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Payload::Binary(data.into())
    }

    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(t) => t.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            Payload::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(t) => t.as_bytes(),
            Payload::Binary(b) => b,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Binary(_) => "binary",
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}
