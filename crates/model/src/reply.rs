use serde::{Deserialize, Serialize};

use crate::HistoryEntry;

/// A normalized, complete reply from the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatReply {
    /// The assistant's answer.
    pub content: String,
    /// The conversation id reported by the backend, or the one supplied
    /// with the request when the backend reported none.
    pub conversation_id: Option<String>,
    /// An image that accompanies the answer.
    pub image_url: Option<String>,
}

/// The result of a text-to-image request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageGeneration {
    /// URLs of the generated images. Never empty for a successful result.
    pub image_urls: Vec<String>,
    /// The conversation id reported by the backend.
    pub conversation_id: Option<String>,
}

/// Stored turns of a conversation, as reported by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct History {
    /// The conversation these turns belong to.
    pub conversation_id: String,
    /// Stored turns, oldest first.
    pub entries: Vec<HistoryEntry>,
}
