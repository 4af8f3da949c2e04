//! RoomId: the short code that pairs a host with joining peers on the
//! signaling server.
//!
//! Always exactly 6 characters from `A-Z0-9`. Parsing is case-insensitive and
//! ignores surrounding whitespace so codes typed by hand are accepted.

use rand::Rng;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Number of characters in a room code.
pub const ROOM_ID_LEN: usize = 6;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomIdError {
    #[error("Please enter a room ID")]
    Empty,
    #[error("Invalid room ID format: expected {ROOM_ID_LEN} letters or digits, got {0:?}")]
    InvalidFormat(String),
}

/// A 6-character uppercase alphanumeric room code.
///
/// # Examples
/// ```
/// use sync_core::RoomId;
///
/// let room = RoomId::generate();
/// assert_eq!(room.as_str().len(), 6);
///
/// let parsed: RoomId = " ab12cd ".parse().unwrap();
/// assert_eq!(parsed.as_str(), "AB12CD");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    /// Generate a new random room code.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..ROOM_ID_LEN)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RoomId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if trimmed.len() != ROOM_ID_LEN || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RoomIdError::InvalidFormat(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> String {
        room.0
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for RoomId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for RoomId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_format() {
        for _ in 0..1000 {
            let room = RoomId::generate();
            assert_eq!(room.as_str().len(), ROOM_ID_LEN);
            assert!(room
                .as_str()
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_parse_uppercases() {
        let room: RoomId = "ab12cd".parse().unwrap();
        assert_eq!(room.as_str(), "AB12CD");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let room: RoomId = "  XY9Z00\n".parse().unwrap();
        assert_eq!(room.to_string(), "XY9Z00");
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!("".parse::<RoomId>(), Err(RoomIdError::Empty));
        assert_eq!("   ".parse::<RoomId>(), Err(RoomIdError::Empty));
    }

    #[test]
    fn test_reject_wrong_length() {
        assert!("ABCDE".parse::<RoomId>().is_err()); // 5 chars
        assert!("ABCDEFG".parse::<RoomId>().is_err()); // 7 chars
    }

    #[test]
    fn test_reject_non_alphanumeric() {
        assert!("AB-12C".parse::<RoomId>().is_err());
        assert!("AB 12C".parse::<RoomId>().is_err());
        // Multi-byte characters never count as alphanumeric here
        assert!("ÄBC12".parse::<RoomId>().is_err());
    }

    #[test]
    fn test_roundtrip() {
        let original = RoomId::generate();
        let parsed: RoomId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = RoomId::generate();
        let json = serde_json::to_string(&original).unwrap();
        let parsed: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        assert!(serde_json::from_str::<RoomId>("\"nope\"").is_err());
    }
}
