use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::modules::conversation::schema::{ConversationType, ParticipantRole};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    #[serde(rename = "type")]
    pub _type: ConversationType,
    #[validate(length(min = 1, max = 100, message = "Title must be between 1 and 100 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 1, message = "At least one participant is required"))]
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
    /// Defaults to `Member` when omitted.
    pub role: Option<ParticipantRole>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct HistoryQuery {
    /// RFC 3339 cursor from a previous page.
    pub before: Option<String>,
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewConversationRow {
    pub _type: ConversationType,
    pub title: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: ParticipantRole,
    pub is_online: bool,
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub _type: ConversationType,
    /// Resolved title: the stored one for groups, the counterpart's
    /// display name for direct conversations.
    pub title: String,
    pub created_by: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_message_at: chrono::DateTime<chrono::Utc>,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleResponse {
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUsersResponse {
    pub user_ids: Vec<Uuid>,
}
