use uuid::Uuid;

use crate::{
    api::error,
    modules::message::{
        model::InsertMessage,
        schema::{MessageDeliveryEntity, MessageEntity},
    },
};

#[async_trait::async_trait]
pub trait MessageRepository {
    fn get_pool(&self) -> &sqlx::Pool<sqlx::Postgres>;

    async fn find_by_id<'e, E>(
        &self,
        message_id: &Uuid,
        tx: E,
    ) -> Result<Option<MessageEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn insert<'e, E>(
        &self,
        message: &InsertMessage,
        tx: E,
    ) -> Result<MessageEntity, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// None when the message is absent or already deleted.
    async fn update_content<'e, E>(
        &self,
        message_id: &Uuid,
        content: &str,
        tx: E,
    ) -> Result<Option<MessageEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn mark_deleted<'e, E>(
        &self,
        message_id: &Uuid,
        tx: E,
    ) -> Result<bool, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// One page of history, newest first. Fetches one row beyond `limit`
    /// so the caller can tell whether another page exists.
    async fn find_page<'e, E>(
        &self,
        conversation_id: &Uuid,
        before: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
        tx: E,
    ) -> Result<Vec<MessageEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn find_by_ids<'e, E>(
        &self,
        message_ids: &[Uuid],
        tx: E,
    ) -> Result<Vec<MessageEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Messages across the user's active conversations that were sent by
    /// someone else and never got past Sent for this user. Feed for
    /// reconnect recovery, oldest first.
    async fn undelivered_ids<'e, E>(
        &self,
        user_id: &Uuid,
        tx: E,
    ) -> Result<Vec<Uuid>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;
}

#[async_trait::async_trait]
pub trait DeliveryRepository {
    async fn find_by_message<'e, E>(
        &self,
        message_id: &Uuid,
        tx: E,
    ) -> Result<Vec<MessageDeliveryEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Upsert keyed by (message_id, user_id); never downgrades Read.
    async fn mark_delivered<'e, E>(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    /// Upsert keyed by (message_id, user_id); marking an already-read
    /// row again keeps the original timestamps.
    async fn mark_read<'e, E>(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;
}
