//! Catalog of chat models a session may select.

use crate::error::ValidationError;

/// Model used when no preference or configuration says otherwise.
pub const DEFAULT_MODEL_ID: &str = "gpt-4o";

/// One selectable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatModel {
    /// Provider model id sent with each request.
    pub id: &'static str,
    /// Short display label.
    pub label: &'static str,
    /// One-line description for pickers.
    pub description: &'static str,
}

pub const CHAT_MODELS: &[ChatModel] = &[
    ChatModel {
        id: "gpt-4o",
        label: "GPT-4o",
        description: "OpenAI flagship balanced for reasoning and speed",
    },
    ChatModel {
        id: "o4-mini",
        label: "o4-mini",
        description: "Optimized for iterative assistant-style dialog",
    },
    ChatModel {
        id: "gpt-4.1-mini",
        label: "GPT-4.1-mini",
        description: "Cost-efficient with broad multimodal support",
    },
];

/// Looks up a catalog entry by id.
pub fn find_model(id: &str) -> Option<&'static ChatModel> {
    CHAT_MODELS.iter().find(|model| model.id == id)
}

/// Same as [`find_model`], but reports an unknown id as a validation error.
pub fn ensure_known_model(id: &str) -> Result<&'static ChatModel, ValidationError> {
    find_model(id).ok_or_else(|| ValidationError::UnknownModel(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_in_catalog() {
        assert!(find_model(DEFAULT_MODEL_ID).is_some());
    }

    #[test]
    fn ensure_known_model_rejects_unknown_ids() {
        assert_eq!(ensure_known_model("o4-mini").expect("known").label, "o4-mini");
        assert_eq!(
            ensure_known_model("gpt-2"),
            Err(ValidationError::UnknownModel("gpt-2".to_string()))
        );
    }
}
