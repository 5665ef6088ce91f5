//! Model catalog and selection.
//!
//! The chat service advertises its catalog in every handshake acknowledgment.
//! The selected model always belongs to the current catalog: until the user
//! picks one, the selection follows the catalog default; an explicit pick
//! survives catalog refreshes for as long as its id is still offered.

use crate::error::{Error, Result};
use crate::types::ChatModel;

/// The model catalog plus the currently selected entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSelector {
    models: Vec<ChatModel>,
    selected: Option<usize>,
    user_selected: bool,
}

impl ModelSelector {
    /// Create an empty selector.  Nothing is selected until a catalog arrives.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current catalog.
    pub fn models(&self) -> &[ChatModel] {
        &self.models
    }

    /// The selected entry, if the catalog is non-empty.
    pub fn selected(&self) -> Option<&ChatModel> {
        self.selected.and_then(|idx| self.models.get(idx))
    }

    /// The selected model id, as sent in outbound events.
    pub fn selected_id(&self) -> Option<&str> {
        self.selected().map(|model| model.id.as_str())
    }

    /// True once the user has picked a model explicitly.
    pub fn user_selected(&self) -> bool {
        self.user_selected
    }

    /// Replace the catalog and reconcile the selection.
    pub fn set_models(&mut self, models: Vec<ChatModel>) {
        let previous = self.selected_id().map(str::to_string);
        self.models = models;
        let sticky = if self.user_selected {
            previous.and_then(|id| self.position(&id))
        } else {
            None
        };
        // A withdrawn choice hands the selection back to the catalog default.
        self.user_selected = sticky.is_some();
        self.selected = sticky.or_else(|| self.default_index());
    }

    /// Select `id` explicitly.
    ///
    /// Fails with a validation error when `id` is not in the catalog; the
    /// selection is unchanged in that case.
    pub fn set_model(&mut self, id: &str) -> Result<&ChatModel> {
        let Some(idx) = self.position(id) else {
            return Err(Error::validation(
                format!("unknown model '{id}'"),
                Some("model".to_string()),
            ));
        };
        self.selected = Some(idx);
        self.user_selected = true;
        Ok(&self.models[idx])
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.models.iter().position(|model| model.id == id)
    }

    fn default_index(&self) -> Option<usize> {
        if self.models.is_empty() {
            return None;
        }
        Some(
            self.models
                .iter()
                .position(|model| model.is_default)
                .unwrap_or(0),
        )
    }
}
