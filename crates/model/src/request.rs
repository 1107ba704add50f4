use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// The author of a message.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person using the client.
    #[default]
    User,
    /// The medical assistant.
    Assistant,
    /// Notices produced by the client itself, e.g. error explanations.
    System,
}

impl Role {
    /// Returns the wire name of this role.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A previous turn of the conversation, as exchanged with the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author of the turn.
    #[serde(default)]
    pub role: Role,
    /// Text of the turn.
    #[serde(default)]
    pub content: String,
    /// RFC 3339 timestamp of the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Image attached to or generated for the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A chat request to be sent to the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChatRequest {
    /// The new user input.
    pub message: String,
    /// The conversation this request belongs to, if one has been assigned.
    pub conversation_id: Option<String>,
    /// Earlier turns, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Base64 image data for multimodal requests.
    ///
    /// It may or may not carry a `data:` URI prefix, backends are
    /// expected to normalize it.
    pub image_data: Option<String>,
}

/// Optional knobs for text-to-image generation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageOptions {
    /// Things the generated image should avoid.
    pub negative_prompt: Option<String>,
    /// Requested size, e.g. `1024*1024`.
    pub size: Option<String>,
    /// Number of images to generate.
    pub count: Option<u32>,
}

/// A text-to-image request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ImageRequest {
    /// Description of the image.
    pub prompt: String,
    /// The conversation this request belongs to, if one has been assigned.
    pub conversation_id: Option<String>,
    /// Generation options.
    pub options: ImageOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_names() {
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
        assert_eq!(Role::User.to_string(), "user");
    }

    #[test]
    fn test_history_entry_defaults() {
        let entry: HistoryEntry = serde_json::from_str("{}").unwrap();
        assert_eq!(entry.role, Role::User);
        assert_eq!(entry.content, "");
        assert_eq!(entry.timestamp, None);

        let entry = HistoryEntry {
            role: Role::Assistant,
            content: "Drink water.".to_owned(),
            timestamp: None,
            image_url: None,
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"role":"assistant","content":"Drink water."}"#
        );
    }
}
