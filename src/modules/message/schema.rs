use serde::{Deserialize, Serialize};
use sqlx::prelude::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "message_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    System,
}

/// Per-recipient acknowledgement state. The derived order backs every
/// monotonicity check: a delivery never moves to a smaller variant.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "delivery_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntity {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// None for system messages.
    pub sender_id: Option<Uuid>,
    pub reply_to_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub _type: MessageType,
    pub content: String,
    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeliveryEntity {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub status: DeliveryStatus,
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_total_order() {
        assert!(DeliveryStatus::Sent < DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Delivered < DeliveryStatus::Read);
        assert!(DeliveryStatus::Sent < DeliveryStatus::Read);
    }

    #[test]
    fn test_delivery_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DeliveryStatus::Sent).unwrap(), r#""sent""#);
        assert_eq!(serde_json::to_string(&DeliveryStatus::Delivered).unwrap(), r#""delivered""#);
        assert_eq!(serde_json::to_string(&DeliveryStatus::Read).unwrap(), r#""read""#);
    }
}
