use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::modules::message::schema::{DeliveryStatus, MessageEntity, MessageType};

#[derive(Debug, Clone)]
pub struct InsertMessage {
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub reply_to_id: Option<Uuid>,
    pub _type: MessageType,
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    #[validate(length(min = 1, message = "Message content cannot be empty"))]
    pub content: String,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, message = "Message content cannot be empty"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MarkMessagesRequest {
    #[validate(length(min = 1, message = "At least one message id is required"))]
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetMessagesResponse {
    pub messages: Vec<MessageEntity>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedResponse {
    pub message_ids: Vec<Uuid>,
}

/// Sender-facing read of one message with its computed delivery status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub message: MessageEntity,
    pub delivery_status: DeliveryStatus,
}
