use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one pipeline thread (typically one per reviewed file).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Create a thread id, returning `None` for an empty or whitespace-only value.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Generate a fresh random thread id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A form of the id that is safe to use as a file name.
    ///
    /// ASCII letters, digits, `-`, `_` and `.` are kept; every other byte is
    /// written as `%XX`. Distinct ids always give distinct stems.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
                stem.push(byte as char);
            } else {
                stem.push_str(&format!("%{:02X}", byte));
            }
        }
        stem
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
