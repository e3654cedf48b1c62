//! Conversations, messages and session state transitions.
//!
//! `SessionState` is a plain value: every operation is a method taking
//! `&mut self`, with no hidden globals. Persistence lives in
//! [`super::persistence`]; the caller persists after each mutation.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::title::{PLACEHOLDER_TITLE, derive_title};

/// Identifier of a conversation. Allocated as `max + 1`, never reused while
/// a higher id exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(u64);

impl ConversationId {
    pub const FIRST: ConversationId = ConversationId(1);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConversationId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "ai")]
    Assistant,
}

/// A single turn. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    sender: Sender,
    text: String,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text)
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// One independent chat thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    id: ConversationId,
    title: String,
    messages: Vec<Message>,
}

impl Conversation {
    /// Creates an empty conversation with the placeholder title.
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn push(&mut self, message: Message) {
        let sets_title = self.title == PLACEHOLDER_TITLE && message.sender == Sender::User;
        self.messages.push(message);
        if sets_title {
            self.title = derive_title(&self.messages);
        }
    }
}

/// Errors raised by session state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No conversation with this id exists.
    UnknownConversation(ConversationId),
    /// The largest id in use cannot be incremented.
    IdSpaceExhausted,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownConversation(id) => write!(f, "Conversation {id} not found"),
            SessionError::IdSpaceExhausted => write!(f, "No conversation ids left to allocate"),
        }
    }
}

impl std::error::Error for SessionError {}

/// All conversations plus the active selector.
///
/// Invariant: `active` names an existing conversation whenever there is at
/// least one, and is `None` only when there are none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}

impl SessionState {
    /// State used when nothing was stored yet: a single empty conversation 1.
    pub fn initial() -> Self {
        Self {
            conversations: vec![Conversation::new(ConversationId::FIRST)],
            active: Some(ConversationId::FIRST),
        }
    }

    /// Builds a state from stored parts, repairing a missing or dangling
    /// active id by selecting the first conversation.
    pub fn from_parts(conversations: Vec<Conversation>, active: Option<ConversationId>) -> Self {
        let active = active
            .filter(|id| conversations.iter().any(|c| c.id == *id))
            .or_else(|| conversations.first().map(|c| c.id));
        Self {
            conversations,
            active,
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.conversation(id).is_some()
    }

    pub fn active_id(&self) -> Option<ConversationId> {
        self.active
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active.and_then(|id| self.conversation(id))
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Id the next created conversation will receive.
    ///
    /// # Errors
    /// Returns [`SessionError::IdSpaceExhausted`] if the largest id is `u64::MAX`.
    pub fn next_id(&self) -> Result<ConversationId, SessionError> {
        match self.conversations.iter().map(|c| c.id.0).max() {
            None => Ok(ConversationId::FIRST),
            Some(max) => max
                .checked_add(1)
                .map(ConversationId)
                .ok_or(SessionError::IdSpaceExhausted),
        }
    }

    /// Appends an empty conversation and makes it active.
    ///
    /// # Errors
    /// Returns [`SessionError::IdSpaceExhausted`] if no id can be allocated.
    pub fn create_conversation(&mut self) -> Result<ConversationId, SessionError> {
        let id = self.next_id()?;
        self.conversations.push(Conversation::new(id));
        self.active = Some(id);
        Ok(id)
    }

    /// Removes a conversation. If it was active, the first remaining
    /// conversation becomes active (or none, when the list is now empty).
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownConversation`] if `id` does not exist.
    pub fn delete_conversation(&mut self, id: ConversationId) -> Result<(), SessionError> {
        let index = self
            .conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or(SessionError::UnknownConversation(id))?;
        self.conversations.remove(index);
        if self.active == Some(id) {
            self.active = self.conversations.first().map(|c| c.id);
        }
        Ok(())
    }

    /// Makes `id` the active conversation.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownConversation`] if `id` does not exist;
    /// the state is left unchanged.
    pub fn select_active(&mut self, id: ConversationId) -> Result<(), SessionError> {
        if !self.contains(id) {
            return Err(SessionError::UnknownConversation(id));
        }
        self.active = Some(id);
        Ok(())
    }

    /// Appends a message to a conversation, deriving its title from the first
    /// user message while the title is still the placeholder.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownConversation`] if `id` does not exist.
    pub fn append_message(
        &mut self,
        id: ConversationId,
        message: Message,
    ) -> Result<(), SessionError> {
        let conversation = self
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(SessionError::UnknownConversation(id))?;
        conversation.push(message);
        Ok(())
    }
}
