use std::collections::HashSet;

use uuid::Uuid;

use crate::{
    api::error,
    modules::conversation::{
        model::{NewConversationRow, NewParticipant},
        schema::{ConversationEntity, ParticipantEntity, TypingIndicatorEntity},
    },
};

#[async_trait::async_trait]
pub trait ConversationRepository {
    fn get_pool(&self) -> &sqlx::Pool<sqlx::Postgres>;

    async fn find_by_id<'e, E>(
        &self,
        conversation_id: &Uuid,
        tx: E,
    ) -> Result<Option<ConversationEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn create<'e, E>(
        &self,
        conversation: &NewConversationRow,
        tx: E,
    ) -> Result<ConversationEntity, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Any direct conversation ever created between the pair, regardless
    /// of whether either side has since left it.
    async fn find_direct_between_users<'e, E>(
        &self,
        user_a: &Uuid,
        user_b: &Uuid,
        tx: E,
    ) -> Result<Option<ConversationEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn touch_last_message_at<'e, E>(
        &self,
        conversation_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn find_all_by_user<'e, E>(
        &self,
        user_id: &Uuid,
        tx: E,
    ) -> Result<Vec<ConversationEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;
}

#[async_trait::async_trait]
pub trait ParticipantRepository {
    async fn find_one<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<Option<ParticipantEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn insert<'e, E>(
        &self,
        participant: &NewParticipant,
        tx: E,
    ) -> Result<ParticipantEntity, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Flips an inactive row back on, resetting joined_at and left_at.
    async fn reactivate<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<ParticipantEntity, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Returns the number of rows flipped off (0 when the user was not
    /// an active participant).
    async fn deactivate<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<u64, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Every row for the given conversations, active or not. Callers
    /// filter; direct-title resolution needs rows of users who left.
    async fn find_by_conversations<'e, E>(
        &self,
        conversation_ids: &[Uuid],
        tx: E,
    ) -> Result<Vec<ParticipantEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn active_user_ids<'e, E>(
        &self,
        conversation_id: &Uuid,
        tx: E,
    ) -> Result<Vec<Uuid>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn is_active_participant<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<bool, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn set_last_read<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        message_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Conversation ids the user is an active participant of.
    async fn conversation_ids_of_user<'e, E>(
        &self,
        user_id: &Uuid,
        tx: E,
    ) -> Result<Vec<Uuid>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Subset of the given conversations where the user is active.
    async fn active_memberships<'e, E>(
        &self,
        user_id: &Uuid,
        conversation_ids: &[Uuid],
        tx: E,
    ) -> Result<HashSet<Uuid>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;
}

#[async_trait::async_trait]
pub trait TypingRepository {
    async fn set_typing<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Returns the number of rows cleared; 0 means there was nothing to
    /// clear and the caller should stay silent.
    async fn clear_typing<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<u64, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn find_active<'e, E>(
        &self,
        conversation_id: &Uuid,
        cutoff: chrono::DateTime<chrono::Utc>,
        tx: E,
    ) -> Result<Vec<TypingIndicatorEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;
}
