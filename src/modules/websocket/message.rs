//! Wire protocol for the websocket transport. Inbound frames carry the
//! lightweight interactions (typing, acknowledgements, keepalive); the
//! heavier mutations go through the REST API and come back here as
//! server frames fanned out by the registry.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modules::message::schema::{DeliveryStatus, MessageEntity};
use crate::modules::realtime::event::ChatEvent;

/// Frames sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename_all = "camelCase")]
    TypingStop { conversation_id: Uuid },

    /// Acknowledge messages as read on this device.
    #[serde(rename_all = "camelCase")]
    MarkRead { message_ids: Vec<Uuid> },

    /// Acknowledge messages as delivered to this device.
    #[serde(rename_all = "camelCase")]
    MarkDelivered { message_ids: Vec<Uuid> },

    /// Keepalive, also refreshes the presence TTL.
    Ping,
}

/// Frames sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    MessageReceived { conversation_id: Uuid, message: MessageEntity },

    #[serde(rename_all = "camelCase")]
    MessageEdited {
        conversation_id: Uuid,
        message_id: Uuid,
        content: String,
        edited_at: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MessageDeleted { conversation_id: Uuid, message_id: Uuid },

    /// Aggregate delivery status of one message changed. Only the
    /// sender's own connections receive this frame.
    #[serde(rename_all = "camelCase")]
    DeliveryUpdated { conversation_id: Uuid, message_id: Uuid, status: DeliveryStatus },

    #[serde(rename_all = "camelCase")]
    ParticipantAdded { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename_all = "camelCase")]
    ParticipantRemoved { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename_all = "camelCase")]
    UserTyping { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename_all = "camelCase")]
    UserStoppedTyping { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: Uuid },

    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: Uuid, last_seen: Option<String> },

    Pong,

    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

impl From<ChatEvent> for ServerMessage {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::MessageReceived { conversation_id, message } => {
                ServerMessage::MessageReceived { conversation_id, message }
            }
            ChatEvent::MessageEdited { conversation_id, message_id, content, edited_at } => {
                ServerMessage::MessageEdited { conversation_id, message_id, content, edited_at }
            }
            ChatEvent::MessageDeleted { conversation_id, message_id } => {
                ServerMessage::MessageDeleted { conversation_id, message_id }
            }
            ChatEvent::DeliveryUpdated { conversation_id, message_id, status } => {
                ServerMessage::DeliveryUpdated { conversation_id, message_id, status }
            }
            ChatEvent::ParticipantAdded { conversation_id, user_id } => {
                ServerMessage::ParticipantAdded { conversation_id, user_id }
            }
            ChatEvent::ParticipantRemoved { conversation_id, user_id } => {
                ServerMessage::ParticipantRemoved { conversation_id, user_id }
            }
            ChatEvent::TypingChanged { conversation_id, user_id, is_typing } => {
                if is_typing {
                    ServerMessage::UserTyping { conversation_id, user_id }
                } else {
                    ServerMessage::UserStoppedTyping { conversation_id, user_id }
                }
            }
            ChatEvent::PresenceChanged { user_id, online, last_seen } => {
                if online {
                    ServerMessage::UserOnline { user_id }
                } else {
                    ServerMessage::UserOffline { user_id, last_seen }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::message::schema::MessageType;
    use chrono::Utc;

    fn sample_message(conversation_id: Uuid) -> MessageEntity {
        MessageEntity {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id: Some(Uuid::now_v7()),
            reply_to_id: None,
            _type: MessageType::Text,
            content: "hello".to_string(),
            sent_at: Utc::now(),
            edited_at: None,
            is_deleted: false,
        }
    }

    // === ClientMessage deserialization ===

    #[test]
    fn test_client_typing_start_deserialize() {
        let id = Uuid::now_v7();
        let json = format!(r#"{{"type":"typingStart","conversationId":"{}"}}"#, id);
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(
            matches!(msg, ClientMessage::TypingStart { conversation_id } if conversation_id == id)
        );
    }

    #[test]
    fn test_client_typing_stop_deserialize() {
        let id = Uuid::now_v7();
        let json = format!(r#"{{"type":"typingStop","conversationId":"{}"}}"#, id);
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(
            matches!(msg, ClientMessage::TypingStop { conversation_id } if conversation_id == id)
        );
    }

    #[test]
    fn test_client_mark_read_deserialize() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let json = format!(r#"{{"type":"markRead","messageIds":["{}","{}"]}}"#, a, b);
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        match msg {
            ClientMessage::MarkRead { message_ids } => assert_eq!(message_ids, vec![a, b]),
            _ => panic!("Expected MarkRead variant"),
        }
    }

    #[test]
    fn test_client_mark_delivered_deserialize() {
        let id = Uuid::now_v7();
        let json = format!(r#"{{"type":"markDelivered","messageIds":["{}"]}}"#, id);
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(
            matches!(msg, ClientMessage::MarkDelivered { message_ids } if message_ids == vec![id])
        );
    }

    #[test]
    fn test_client_ping_deserialize() {
        let json = r#"{"type":"ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_unknown_type_returns_error() {
        let json = r#"{"type":"sendMessage","conversationId":"550e8400-e29b-41d4-a716-446655440000","content":"hi"}"#;
        let result = serde_json::from_str::<ClientMessage>(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_required_field_returns_error() {
        let json = r#"{"type":"markRead"}"#;
        let result = serde_json::from_str::<ClientMessage>(json);
        assert!(result.is_err());
    }

    // === ServerMessage serialization ===

    #[test]
    fn test_server_message_received_serialize() {
        let conversation_id = Uuid::now_v7();
        let message = sample_message(conversation_id);
        let message_id = message.id;
        let msg = ServerMessage::MessageReceived { conversation_id, message };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"messageReceived\""));
        assert!(json.contains(&message_id.to_string()));
        assert!(json.contains("\"content\":\"hello\""));
    }

    #[test]
    fn test_server_delivery_updated_serialize() {
        let msg = ServerMessage::DeliveryUpdated {
            conversation_id: Uuid::now_v7(),
            message_id: Uuid::now_v7(),
            status: DeliveryStatus::Read,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"deliveryUpdated\""));
        assert!(json.contains("\"status\":\"read\""));
    }

    #[test]
    fn test_server_user_offline_carries_last_seen() {
        let msg = ServerMessage::UserOffline {
            user_id: Uuid::now_v7(),
            last_seen: Some("2025-06-01T10:00:00+00:00".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"userOffline\""));
        assert!(json.contains("\"lastSeen\":\"2025-06-01T10:00:00+00:00\""));
    }

    #[test]
    fn test_server_pong_serialize() {
        let msg = ServerMessage::Pong;
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_server_error_serialize() {
        let msg = ServerMessage::Error { message: "Something went wrong".to_string() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("Something went wrong"));
    }

    // === ChatEvent conversion ===

    #[test]
    fn test_typing_event_maps_to_start_and_stop_frames() {
        let conversation_id = Uuid::now_v7();
        let user_id = Uuid::now_v7();

        let started = ServerMessage::from(ChatEvent::TypingChanged {
            conversation_id,
            user_id,
            is_typing: true,
        });
        let stopped = ServerMessage::from(ChatEvent::TypingChanged {
            conversation_id,
            user_id,
            is_typing: false,
        });

        assert!(matches!(started, ServerMessage::UserTyping { .. }));
        assert!(matches!(stopped, ServerMessage::UserStoppedTyping { .. }));
    }

    #[test]
    fn test_presence_event_splits_on_online_flag() {
        let user_id = Uuid::now_v7();

        let online = ServerMessage::from(ChatEvent::PresenceChanged {
            user_id,
            online: true,
            last_seen: None,
        });
        let offline = ServerMessage::from(ChatEvent::PresenceChanged {
            user_id,
            online: false,
            last_seen: Some("2025-06-01T10:00:00+00:00".to_string()),
        });

        assert!(matches!(online, ServerMessage::UserOnline { .. }));
        assert!(matches!(
            offline,
            ServerMessage::UserOffline { last_seen: Some(_), .. }
        ));
    }

    #[test]
    fn test_message_event_keeps_entity_payload() {
        let conversation_id = Uuid::now_v7();
        let message = sample_message(conversation_id);
        let id = message.id;

        let frame = ServerMessage::from(ChatEvent::MessageReceived { conversation_id, message });

        match frame {
            ServerMessage::MessageReceived { message, .. } => assert_eq!(message.id, id),
            _ => panic!("Expected MessageReceived frame"),
        }
    }
}
