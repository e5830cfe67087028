use actix::prelude::*;
use uuid::Uuid;

use crate::modules::message::schema::{DeliveryStatus, MessageEntity};

/// Domain event raised by a committed mutation. The engine describes
/// what happened; transports decide how to frame it.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub enum ChatEvent {
    MessageReceived {
        conversation_id: Uuid,
        message: MessageEntity,
    },
    MessageEdited {
        conversation_id: Uuid,
        message_id: Uuid,
        content: String,
        edited_at: chrono::DateTime<chrono::Utc>,
    },
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    /// Aggregate status change, addressed to the message's sender.
    DeliveryUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        status: DeliveryStatus,
    },
    ParticipantAdded {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    ParticipantRemoved {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    TypingChanged {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    PresenceChanged {
        user_id: Uuid,
        online: bool,
        last_seen: Option<String>,
    },
}

/// Who receives an event.
#[derive(Debug, Clone, Copy)]
pub enum Audience {
    /// Every live connection joined to the conversation's group, minus
    /// the excluded user's own connections.
    Group { conversation_id: Uuid, exclude_user: Option<Uuid> },
    /// Every live connection of one user.
    User(Uuid),
}

/// Fire-and-forget seam between the domain services and the transport.
/// Implementations must not fail the caller: a dropped event never
/// unwinds a committed transaction.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ChatEvent, audience: Audience);
}
