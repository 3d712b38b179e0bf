/// ID types for queue entries
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Queue entry identifier
///
/// Generated per insertion, not per track, so the same track can sit in the
/// queue several times without identity collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    /// Create a queue ID from an existing value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random queue ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = QueueId::generate();
        let b = QueueId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_transparently() {
        let id = QueueId::new("q-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"q-1\"");
    }
}
