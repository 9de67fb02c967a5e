/// Conversation manager
///
/// History assembly for a search session. The two conversation modes are
/// one `HistoryStrategy` trait with two implementations selected at
/// session start, not a runtime type switch at call sites.
use crate::types::{ConversationMode, Message, MessageRole, SearchSession};
use tracing::debug;

/// History handed to a new turn
#[derive(Debug, Clone, Default)]
pub struct AssembledHistory {
    /// Prior completed messages, oldest first. Empty in server-managed mode.
    pub messages: Vec<Message>,
    /// Server-side thread id, present only in server-managed mode
    pub conversation_id: Option<String>,
}

/// Strategy for reconciling local transcript with thread state
pub trait HistoryStrategy: Send + Sync {
    fn assemble(&self, session: &SearchSession) -> AssembledHistory;
    fn begin_new_topic(&self, session: &mut SearchSession);
}

/// Thread state lives server-side; history assembly only forwards the
/// conversation id
pub struct ServerManagedHistory;

impl HistoryStrategy for ServerManagedHistory {
    fn assemble(&self, session: &SearchSession) -> AssembledHistory {
        AssembledHistory {
            messages: Vec::new(),
            conversation_id: session.conversation_id.clone(),
        }
    }

    fn begin_new_topic(&self, session: &mut SearchSession) {
        debug!("New topic: clearing conversation id and transcript");
        session.conversation_id = None;
        session.messages.clear();
    }
}

/// Locally bounded history, truncated from the oldest end past the
/// configured turn budget
pub struct ClientBoundedHistory {
    pub max_turns: usize,
}

impl HistoryStrategy for ClientBoundedHistory {
    fn assemble(&self, session: &SearchSession) -> AssembledHistory {
        // Walk backwards over eligible messages; a user message closes a
        // turn when scanning in reverse.
        let mut kept: Vec<Message> = Vec::new();
        let mut turns = 0usize;

        for message in session.messages.iter().rev() {
            if !message.is_history_eligible() {
                continue;
            }
            kept.push(message.clone());
            if message.role == MessageRole::User {
                turns += 1;
                if turns >= self.max_turns {
                    break;
                }
            }
        }

        kept.reverse();
        AssembledHistory {
            messages: kept,
            conversation_id: None,
        }
    }

    fn begin_new_topic(&self, session: &mut SearchSession) {
        debug!("New topic: clearing local transcript");
        session.conversation_id = None;
        session.messages.clear();
    }
}

/// Session-scoped facade over the selected history strategy
pub struct ConversationManager {
    strategy: Box<dyn HistoryStrategy>,
}

impl ConversationManager {
    /// Select the strategy for a session's conversation mode
    pub fn new(mode: ConversationMode, turn_budget: usize) -> Self {
        let strategy: Box<dyn HistoryStrategy> = match mode {
            ConversationMode::Server => Box::new(ServerManagedHistory),
            ConversationMode::Local => Box::new(ClientBoundedHistory {
                max_turns: turn_budget,
            }),
        };
        Self { strategy }
    }

    /// Assemble history for the next turn
    ///
    /// Never includes the in-flight message or anything non-complete;
    /// those are filtered by eligibility before the turn bound applies.
    pub fn assemble_history(&self, session: &SearchSession) -> AssembledHistory {
        self.strategy.assemble(session)
    }

    /// Start a new topic, discarding thread state
    pub fn new_topic(&self, session: &mut SearchSession) {
        self.strategy.begin_new_topic(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageStatus;

    fn completed(role: MessageRole, text: &str) -> Message {
        let mut message = match role {
            MessageRole::User => Message::user(text),
            MessageRole::Assistant => {
                let mut m = Message::assistant();
                m.text = text.to_string();
                m
            }
        };
        message.status = MessageStatus::Complete;
        message
    }

    fn session_with_turns(n: usize) -> SearchSession {
        let mut session = SearchSession::new(ConversationMode::Local);
        for i in 0..n {
            session.push_message(completed(MessageRole::User, &format!("question {}", i)));
            session.push_message(completed(MessageRole::Assistant, &format!("answer {}", i)));
        }
        session
    }

    #[test]
    fn test_bounded_history_keeps_last_turns_in_order() {
        let session = session_with_turns(10);
        let manager = ConversationManager::new(ConversationMode::Local, 8);

        let history = manager.assemble_history(&session);
        assert_eq!(history.messages.len(), 16); // 8 turns of two messages
        assert!(history.conversation_id.is_none());

        // Oldest kept turn is turn 2, order preserved
        assert_eq!(history.messages[0].text, "question 2");
        assert_eq!(history.messages[1].text, "answer 2");
        assert_eq!(history.messages[15].text, "answer 9");
    }

    #[test]
    fn test_in_flight_and_incomplete_messages_excluded() {
        let mut session = session_with_turns(2);
        // In-flight user message and streaming assistant reply
        session.push_message(Message::user("current question"));
        session.push_message(Message::assistant());

        let manager = ConversationManager::new(ConversationMode::Local, 8);
        let history = manager.assemble_history(&session);

        assert_eq!(history.messages.len(), 4);
        assert!(history
            .messages
            .iter()
            .all(|m| m.status == MessageStatus::Complete));
    }

    #[test]
    fn test_canceled_and_errored_messages_excluded() {
        let mut session = session_with_turns(1);

        let mut canceled = Message::assistant();
        canceled.text = "partial".to_string();
        canceled.status = MessageStatus::Canceled;
        session.push_message(canceled);

        let mut errored = Message::assistant();
        errored.text = "broken".to_string();
        errored.status = MessageStatus::Error;
        session.push_message(errored);

        let manager = ConversationManager::new(ConversationMode::Local, 8);
        let history = manager.assemble_history(&session);
        assert_eq!(history.messages.len(), 2);
    }

    #[test]
    fn test_empty_text_excluded() {
        let mut session = session_with_turns(1);
        session.push_message(completed(MessageRole::User, "   "));

        let manager = ConversationManager::new(ConversationMode::Local, 8);
        let history = manager.assemble_history(&session);
        assert_eq!(history.messages.len(), 2);
    }

    #[test]
    fn test_server_mode_returns_conversation_id_only() {
        let mut session = SearchSession::new(ConversationMode::Server);
        session.conversation_id = Some("conv-7".to_string());
        session.push_message(completed(MessageRole::User, "q"));
        session.push_message(completed(MessageRole::Assistant, "a"));

        let manager = ConversationManager::new(ConversationMode::Server, 8);
        let history = manager.assemble_history(&session);

        assert!(history.messages.is_empty());
        assert_eq!(history.conversation_id.as_deref(), Some("conv-7"));
    }

    #[test]
    fn test_new_topic_clears_thread_state() {
        let mut session = SearchSession::new(ConversationMode::Server);
        session.conversation_id = Some("conv-7".to_string());
        session.push_message(completed(MessageRole::User, "q"));

        let manager = ConversationManager::new(ConversationMode::Server, 8);
        manager.new_topic(&mut session);

        assert!(session.conversation_id.is_none());
        assert!(session.messages.is_empty());
    }

    #[test]
    fn test_under_budget_returns_everything_eligible() {
        let session = session_with_turns(3);
        let manager = ConversationManager::new(ConversationMode::Local, 8);
        assert_eq!(manager.assemble_history(&session).messages.len(), 6);
    }
}
