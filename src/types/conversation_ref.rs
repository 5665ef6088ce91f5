use serde::{Deserialize, Serialize};

/// Opaque server-assigned identifier of a persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationRef(String);

impl ConversationRef {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationRef {
    fn from(id: String) -> Self {
        Self(id)
    }
}
