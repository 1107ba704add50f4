//! Conversation-related types.

use chrono::{SecondsFormat, Utc};
use medchat_model::{HistoryEntry, Role};
use serde::{Deserialize, Serialize};

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A message in the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    timestamp: String,
    image_url: Option<String>,
    #[serde(default)]
    transient: bool,
}

impl Message {
    /// Creates a finalized message stamped with the current time.
    #[inline]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_timestamp(),
            image_url: None,
            transient: false,
        }
    }

    /// Attaches an image reference to this message.
    #[inline]
    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    /// Creates a message from a stored history entry.
    ///
    /// A missing timestamp is filled with the current time.
    pub fn from_history_entry(entry: HistoryEntry) -> Self {
        let HistoryEntry {
            role,
            content,
            timestamp,
            image_url,
        } = entry;
        Self {
            role,
            content,
            timestamp: timestamp
                .filter(|t| !t.is_empty())
                .unwrap_or_else(now_timestamp),
            image_url: image_url.filter(|u| !u.is_empty()),
            transient: false,
        }
    }

    /// Returns the author of this message.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the text of this message.
    ///
    /// For a transient message, this is whatever has been received so far.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the RFC 3339 creation time of this message.
    #[inline]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Returns the image attached to or generated for this message.
    #[inline]
    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    /// Returns `true` if this message is a placeholder whose content is
    /// not finalized yet.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    fn to_history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.role,
            content: self.content.clone(),
            timestamp: Some(self.timestamp.clone()),
            image_url: None,
        }
    }
}

/// Changes applied to a transient message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagePatch {
    /// Replaces the content when set.
    pub content: Option<String>,
    /// Replaces the image reference when set.
    pub image_url: Option<String>,
    /// Clears the transient flag after applying the patch.
    pub finalize: bool,
}

impl MessagePatch {
    /// A patch that updates the content and keeps the message transient.
    #[inline]
    pub fn progress(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A patch that sets the final content.
    #[inline]
    pub fn finalize(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            image_url: None,
            finalize: true,
        }
    }

    /// Sets the image reference of this patch, empty values are ignored.
    #[inline]
    pub fn with_image_url(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url.filter(|u| !u.is_empty());
        self
    }
}

/// Locates the message an update applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// The message at this index.
    Index(usize),
    /// Whatever message is transient at the moment.
    Current,
}

/// An immutable view of a conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// The backend-assigned id, absent until the first exchange.
    pub id: Option<String>,
    /// Messages in insertion order.
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Returns the transient message, if any.
    #[inline]
    pub fn transient(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.transient)
    }
}

/// The single mutable source of truth of a conversation.
///
/// At most one message is transient at any time, and the conversation id
/// never goes back to empty once set (except by [`clear`]).
///
/// [`clear`]: ConversationStore::clear
#[derive(Clone, Debug, Default)]
pub struct ConversationStore {
    conversation: Conversation,
    transient_idx: Option<usize>,
}

impl ConversationStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that continues the conversation with this id.
    #[inline]
    pub fn with_conversation_id(id: impl Into<String>) -> Self {
        let mut store = Self::default();
        store.set_conversation_id(id);
        store
    }

    /// Appends a finalized message and returns its index.
    pub fn append_message(&mut self, mut msg: Message) -> usize {
        msg.transient = false;
        self.conversation.messages.push(msg);
        self.conversation.messages.len() - 1
    }

    /// Appends an empty transient message and returns its index.
    ///
    /// A transient message that already exists is finalized as it is.
    pub fn append_transient_placeholder(&mut self, role: Role) -> usize {
        if let Some(idx) = self.transient_idx.take() {
            warn!("finalizing a dangling transient message at {idx}");
            self.conversation.messages[idx].transient = false;
        }
        let mut msg = Message::new(role, String::new());
        msg.transient = true;
        self.conversation.messages.push(msg);
        let idx = self.conversation.messages.len() - 1;
        self.transient_idx = Some(idx);
        idx
    }

    /// Applies `patch` to the targeted message.
    ///
    /// Returns the index of the updated message, or `None` if the target
    /// is not a transient message.
    pub fn update_transient(
        &mut self,
        target: Target,
        patch: MessagePatch,
    ) -> Option<usize> {
        let idx = match target {
            Target::Index(idx) => idx,
            Target::Current => self.transient_idx?,
        };
        let msg = self.conversation.messages.get_mut(idx)?;
        if !msg.transient {
            trace!("message at {idx} is not transient, ignoring the update");
            return None;
        }

        if let Some(content) = patch.content {
            msg.content = content;
        }
        if let Some(image_url) = patch.image_url {
            msg.image_url = Some(image_url);
        }
        if patch.finalize {
            msg.transient = false;
            self.transient_idx = None;
        }
        Some(idx)
    }

    /// Sets the content of the transient message to the text accumulated
    /// so far, keeping it transient.
    #[inline]
    pub fn stream_progress(&mut self, accumulated: &str) -> Option<usize> {
        self.update_transient(
            Target::Current,
            MessagePatch::progress(accumulated),
        )
    }

    /// Adopts `id` as the conversation id.
    ///
    /// Returns `true` if the id changed. Empty ids are ignored.
    pub fn set_conversation_id(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if id.is_empty() || self.conversation.id.as_ref() == Some(&id) {
            return false;
        }
        debug!("conversation id is now {id}");
        self.conversation.id = Some(id);
        true
    }

    /// Records a failure of the pending request.
    ///
    /// The transient message, if any, is replaced by a system message
    /// carrying `explanation`. Otherwise the system message is appended.
    /// Returns the index of the system message.
    pub fn fail_pending(&mut self, explanation: impl Into<String>) -> usize {
        let msg = Message::new(Role::System, explanation);
        match self.transient_idx.take() {
            Some(idx) => {
                self.conversation.messages[idx] = msg;
                idx
            }
            None => self.append_message(msg),
        }
    }

    /// Removes the transient message and returns it.
    pub fn discard_transient(&mut self) -> Option<Message> {
        let idx = self.transient_idx.take()?;
        Some(self.conversation.messages.remove(idx))
    }

    /// Returns the entries to be sent to the backend as chat history.
    ///
    /// System notices and transient messages are left out.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.conversation
            .messages
            .iter()
            .filter(|m| m.role != Role::System && !m.transient)
            .map(Message::to_history_entry)
            .collect()
    }

    /// Replaces all messages, e.g. after loading the stored history.
    pub fn replace_messages(
        &mut self,
        messages: impl IntoIterator<Item = Message>,
    ) {
        self.conversation.messages = messages
            .into_iter()
            .map(|mut m| {
                m.transient = false;
                m
            })
            .collect();
        self.transient_idx = None;
    }

    /// Forgets all messages and the conversation id.
    #[inline]
    pub fn clear(&mut self) {
        self.conversation = Conversation::default();
        self.transient_idx = None;
    }

    /// Returns the conversation id, if one has been assigned.
    #[inline]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.id.as_deref()
    }

    /// Returns all messages in insertion order.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    /// Returns the index of the transient message, if any.
    #[inline]
    pub fn transient_index(&self) -> Option<usize> {
        self.transient_idx
    }

    /// Returns an immutable copy of the conversation.
    #[inline]
    pub fn snapshot(&self) -> Conversation {
        self.conversation.clone()
    }
}
