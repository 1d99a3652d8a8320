use std::fmt;

use chrono::Local;

/// Stable identifier for one transcript message.
///
/// Allocated once per message and never reused, so a late completion for an
/// already-superseded turn can be dropped by id without ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Transcript speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Mutability state of one message.
///
/// `InFlight` marks the single assistant entry still being filled by an
/// active stream; `Final` entries are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    InFlight,
    Final,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub sources: Option<Vec<String>>,
    pub timestamp: String,
    pub state: MessageState,
}

/// Ordered, append-only conversation history.
///
/// Insertion order is display order. The only in-place mutation allowed is
/// the content/timestamp of the single in-flight assistant message, which is
/// always the last entry while it exists. Updates addressed to unknown or
/// already-final ids are no-ops rather than errors, which keeps late
/// completions harmless after a failure path already closed the turn.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_message_id: u64,
    in_flight: Option<MessageId>,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_message_id: 1,
            in_flight: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn in_flight_id(&self) -> Option<MessageId> {
        self.in_flight
    }

    /// Appends a user message stamped with the current local time.
    pub fn append_user(&mut self, content: impl Into<String>) -> MessageId {
        let id = self.alloc_message_id();
        self.messages.push(Message {
            id,
            role: Role::User,
            content: content.into(),
            sources: None,
            timestamp: local_time_string(),
            state: MessageState::Final,
        });
        id
    }

    /// Reserves an id for the turn's eventual assistant message without
    /// appending anything; the message materializes only once non-empty
    /// content exists.
    pub fn begin_assistant_reply(&mut self) -> MessageId {
        self.alloc_message_id()
    }

    /// Materializes a reserved id as the in-flight assistant message.
    ///
    /// No-op if the id is already present or another assistant message is
    /// still in flight.
    pub fn append_assistant(&mut self, id: MessageId, content: impl Into<String>) {
        if self.in_flight.is_some() || self.contains(id) {
            tracing::warn!(message_id = %id, "ignoring assistant append into an occupied transcript slot");
            return;
        }

        self.messages.push(Message {
            id,
            role: Role::Assistant,
            content: content.into(),
            sources: None,
            timestamp: local_time_string(),
            state: MessageState::InFlight,
        });
        self.in_flight = Some(id);
    }

    /// Replaces the in-flight message's content. No-op for unknown or
    /// finalized ids.
    pub fn update_assistant(&mut self, id: MessageId, content: impl Into<String>) {
        if let Some(message) = self.in_flight_message_mut(id) {
            message.content = content.into();
        }
    }

    /// Sets final content, optional sources, and a fresh timestamp; the
    /// message is immutable afterwards. No-op for unknown or finalized ids.
    pub fn finalize_assistant(
        &mut self,
        id: MessageId,
        content: impl Into<String>,
        sources: Option<Vec<String>>,
    ) {
        let Some(message) = self.in_flight_message_mut(id) else {
            return;
        };

        message.content = content.into();
        message.sources = sources;
        message.timestamp = local_time_string();
        message.state = MessageState::Final;
        self.in_flight = None;
    }

    /// Appends an assistant message that is final on arrival (fallback and
    /// notice texts). Delegates to [`Self::finalize_assistant`] when the id
    /// already names the in-flight message.
    pub fn append_assistant_final(&mut self, id: MessageId, content: impl Into<String>) {
        if self.in_flight == Some(id) {
            self.finalize_assistant(id, content, None);
            return;
        }
        if self.contains(id) {
            return;
        }

        self.messages.push(Message {
            id,
            role: Role::Assistant,
            content: content.into(),
            sources: None,
            timestamp: local_time_string(),
            state: MessageState::Final,
        });
    }

    fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|message| message.id == id)
    }

    fn in_flight_message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        if self.in_flight != Some(id) {
            return None;
        }
        self.messages
            .iter_mut()
            .find(|message| message.id == id && message.state == MessageState::InFlight)
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }
}

fn local_time_string() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_never_reused() {
        let mut transcript = Transcript::new();
        let first = transcript.append_user("one");
        let reserved = transcript.begin_assistant_reply();
        let second = transcript.append_user("two");

        assert_ne!(first, reserved);
        assert_ne!(reserved, second);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn reserved_id_materializes_once_with_content() {
        let mut transcript = Transcript::new();
        transcript.append_user("question");
        let id = transcript.begin_assistant_reply();
        assert_eq!(transcript.len(), 1);

        transcript.append_assistant(id, "Hello");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.in_flight_id(), Some(id));

        // A second append for the same id must not duplicate the entry.
        transcript.append_assistant(id, "Hello again");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[1].content, "Hello");
    }

    #[test]
    fn update_on_unknown_id_is_a_noop() {
        let mut transcript = Transcript::new();
        transcript.append_user("question");
        transcript.update_assistant(MessageId::new(999), "ghost");
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn finalize_freezes_the_message() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_assistant_reply();
        transcript.append_assistant(id, "partial");
        transcript.update_assistant(id, "partial answer");
        transcript.finalize_assistant(
            id,
            "full answer",
            Some(vec!["report.pdf".to_string()]),
        );

        let message = &transcript.messages()[0];
        assert_eq!(message.content, "full answer");
        assert_eq!(message.sources.as_deref(), Some(&["report.pdf".to_string()][..]));
        assert_eq!(message.state, MessageState::Final);
        assert_eq!(transcript.in_flight_id(), None);

        // Post-finalize mutation attempts are no-ops.
        transcript.update_assistant(id, "late chunk");
        transcript.finalize_assistant(id, "late finalize", None);
        assert_eq!(transcript.messages()[0].content, "full answer");
    }

    #[test]
    fn in_flight_message_is_always_last() {
        let mut transcript = Transcript::new();
        transcript.append_user("q1");
        let id = transcript.begin_assistant_reply();
        transcript.append_assistant(id, "a1");

        let last = transcript.messages().last().map(|message| message.id);
        assert_eq!(last, Some(id));
    }

    #[test]
    fn final_on_arrival_append_is_immutable() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_assistant_reply();
        transcript.append_assistant_final(id, "fallback text");

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.in_flight_id(), None);
        transcript.update_assistant(id, "should not apply");
        assert_eq!(transcript.messages()[0].content, "fallback text");
    }
}
