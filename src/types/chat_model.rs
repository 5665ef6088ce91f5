use serde::{Deserialize, Serialize};

/// A model advertised by the chat service at handshake time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatModel {
    /// Identifier sent back in `new_chat` and `send` events.
    pub id: String,

    /// Human-readable name.
    pub label: String,

    /// Whether the service selects this model when the user has not chosen.
    #[serde(default)]
    pub is_default: bool,
}

impl ChatModel {
    /// Create a non-default model entry.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            is_default: false,
        }
    }

    /// Mark this entry as the service default.
    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }
}
