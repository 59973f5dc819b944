//! Branded conversation identifier.
//!
//! Every conversation is keyed by a [`ConvoId`], a newtype wrapper around
//! `String` so a correlation identifier cannot be confused with any other
//! string floating through the system.
//!
//! IDs are random 128-bit values (UUID v4) rendered as strings. Randomness is
//! the point: the identifier tags outgoing frames and demultiplexes inbound
//! ones, so it must be unique for the lifetime of the process with
//! overwhelming probability and carry no guessable structure.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation identifier for one conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConvoId(String);

impl ConvoId {
    /// Create a new random ID (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string value.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for ConvoId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for ConvoId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConvoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConvoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConvoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConvoId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<ConvoId> for String {
    fn from(id: ConvoId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_uuid_v4() {
        let id = ConvoId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::Random));
    }

    #[test]
    fn ids_are_unique() {
        let a = ConvoId::new();
        let b = ConvoId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_string() {
        let id = ConvoId::from_string("custom-id".to_owned());
        assert_eq!(id.as_str(), "custom-id");
    }

    #[test]
    fn deref_to_str() {
        let id = ConvoId::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn display() {
        let id = ConvoId::from("display-me");
        assert_eq!(format!("{id}"), "display-me");
    }

    #[test]
    fn serde_roundtrip() {
        let id = ConvoId::from("serde-test");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"serde-test\"");
        let back: ConvoId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn default_creates_new() {
        let id1 = ConvoId::default();
        let id2 = ConvoId::default();
        assert_ne!(id1, id2, "default should create unique IDs");
    }

    #[test]
    fn hash_and_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let id = ConvoId::from("same");
        let _ = set.insert(id.clone());
        let _ = set.insert(id.clone());
        assert_eq!(set.len(), 1);
    }
}
