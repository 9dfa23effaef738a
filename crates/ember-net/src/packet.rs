//! Decoded text packets and packet identifier resolution.
//!
//! After the codec has run, a payload is a line of whitespace-separated
//! tokens. Clients may prefix it with a numeric keep-alive counter:
//!
//! ```text
//! [keep_alive] <identifier> [body...]
//! 1042 walk 12 40 1
//! LOGIN alice hunter2
//! ```
//!
//! The identifier selects the handler; the body is left to the handler.

use std::fmt;

/// Reasons a decoded payload has no usable identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    /// The payload is empty or whitespace only.
    #[error("payload is empty")]
    Empty,
}

/// A decoded packet routed by its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Client keep-alive counter, when the client sent one.
    pub keep_alive: Option<u32>,
    /// Routing key looked up in the handler registry.
    pub identifier: String,
    /// Everything after the identifier, with leading whitespace removed.
    pub body: String,
}

impl Packet {
    /// Build an outbound packet.
    pub fn new(identifier: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            keep_alive: None,
            identifier: identifier.into(),
            body: body.into(),
        }
    }

    /// Resolve the identifier and body of a decoded payload.
    pub fn parse(decoded: &[u8]) -> Result<Self, PacketError> {
        let text = std::str::from_utf8(decoded)
            .map_err(|_| PacketError::NotUtf8)?
            .trim();
        if text.is_empty() {
            return Err(PacketError::Empty);
        }

        let (first, rest) = split_token(text);
        let (keep_alive, identifier, body) = match first.parse::<u32>() {
            // A lone number is the identifier itself, not a counter.
            Ok(counter) if !rest.is_empty() => {
                let (identifier, body) = split_token(rest);
                (Some(counter), identifier, body)
            }
            _ => (None, first, rest),
        };

        Ok(Self {
            keep_alive,
            identifier: identifier.to_string(),
            body: body.to_string(),
        })
    }

    /// Whitespace-separated arguments of the body.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.body.split_whitespace()
    }

    /// Serialize for sending. The keep-alive counter is client-to-server
    /// only and is never written.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.body.is_empty() {
            self.identifier.clone().into_bytes()
        } else {
            format!("{} {}", self.identifier, self.body).into_bytes()
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            f.write_str(&self.identifier)
        } else {
            write!(f, "{} {}", self.identifier, self.body)
        }
    }
}

fn split_token(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (s, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_without_keep_alive() {
        let packet = Packet::parse(b"LOGIN alice hunter2").unwrap();
        assert_eq!(packet.keep_alive, None);
        assert_eq!(packet.identifier, "LOGIN");
        assert_eq!(packet.body, "alice hunter2");
        assert_eq!(packet.args().collect::<Vec<_>>(), ["alice", "hunter2"]);
    }

    #[test]
    fn test_leading_counter_is_keep_alive() {
        let packet = Packet::parse(b"1042 walk 12 40 1").unwrap();
        assert_eq!(packet.keep_alive, Some(1042));
        assert_eq!(packet.identifier, "walk");
        assert_eq!(packet.body, "12 40 1");
    }

    #[test]
    fn test_lone_number_is_identifier() {
        let packet = Packet::parse(b"0").unwrap();
        assert_eq!(packet.keep_alive, None);
        assert_eq!(packet.identifier, "0");
        assert!(packet.body.is_empty());
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let packet = Packet::parse(b"  7   PING  \r\n").unwrap();
        assert_eq!(packet.keep_alive, Some(7));
        assert_eq!(packet.identifier, "PING");
        assert_eq!(packet.body, "");
    }

    #[test]
    fn test_empty_and_binary_payloads_rejected() {
        assert_eq!(Packet::parse(b""), Err(PacketError::Empty));
        assert_eq!(Packet::parse(b" \t "), Err(PacketError::Empty));
        assert_eq!(Packet::parse(&[0xC3, 0x28]), Err(PacketError::NotUtf8));
    }

    #[test]
    fn test_outbound_serialization() {
        assert_eq!(Packet::new("PONG", "").to_bytes(), b"PONG");
        assert_eq!(Packet::new("OK", "alice 1").to_bytes(), b"OK alice 1");
        assert_eq!(Packet::new("OK", "alice 1").to_string(), "OK alice 1");
    }

    #[test]
    fn test_keep_alive_not_serialized() {
        let packet = Packet::parse(b"3 say hello there").unwrap();
        assert_eq!(packet.to_bytes(), b"say hello there");
    }
}
