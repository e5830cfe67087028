use uuid::Uuid;

use crate::{
    api::error,
    modules::message::{
        model::InsertMessage,
        repository::{DeliveryRepository, MessageRepository},
        schema::{MessageDeliveryEntity, MessageEntity},
    },
};

#[derive(Clone)]
pub struct MessageRepositoryPg {
    pool: sqlx::PgPool,
}

impl MessageRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for MessageRepositoryPg {
    fn get_pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    async fn find_by_id<'e, E>(
        &self,
        message_id: &Uuid,
        tx: E,
    ) -> Result<Option<MessageEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let message =
            sqlx::query_as::<_, MessageEntity>("SELECT * FROM messages WHERE id = $1")
                .bind(message_id)
                .fetch_optional(tx)
                .await?;

        Ok(message)
    }

    async fn insert<'e, E>(
        &self,
        message: &InsertMessage,
        tx: E,
    ) -> Result<MessageEntity, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let id = Uuid::now_v7();
        let message = sqlx::query_as::<_, MessageEntity>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, reply_to_id, type, content)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.reply_to_id)
        .bind(message._type)
        .bind(&message.content)
        .fetch_one(tx)
        .await?;

        Ok(message)
    }

    async fn update_content<'e, E>(
        &self,
        message_id: &Uuid,
        content: &str,
        tx: E,
    ) -> Result<Option<MessageEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let message = sqlx::query_as::<_, MessageEntity>(
            r#"
            UPDATE messages
            SET content = $2,
                edited_at = NOW()
            WHERE id = $1
            AND NOT is_deleted
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(content)
        .fetch_optional(tx)
        .await?;

        Ok(message)
    }

    async fn mark_deleted<'e, E>(
        &self,
        message_id: &Uuid,
        tx: E,
    ) -> Result<bool, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let rows = sqlx::query(
            "UPDATE messages SET is_deleted = TRUE WHERE id = $1 AND NOT is_deleted",
        )
        .bind(message_id)
        .execute(tx)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    async fn find_page<'e, E>(
        &self,
        conversation_id: &Uuid,
        before: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
        tx: E,
    ) -> Result<Vec<MessageEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        // has index on (conversation_id, sent_at DESC)
        let messages = if let Some(before) = before {
            sqlx::query_as::<_, MessageEntity>(
                r#"
                SELECT * FROM messages
                WHERE conversation_id = $1
                AND sent_at < $2
                ORDER BY sent_at DESC
                LIMIT $3
                "#,
            )
            .bind(conversation_id)
            .bind(before)
            .bind(limit + 1)
            .fetch_all(tx)
            .await?
        } else {
            sqlx::query_as::<_, MessageEntity>(
                r#"
                SELECT * FROM messages
                WHERE conversation_id = $1
                ORDER BY sent_at DESC
                LIMIT $2
                "#,
            )
            .bind(conversation_id)
            .bind(limit + 1)
            .fetch_all(tx)
            .await?
        };

        Ok(messages)
    }

    async fn find_by_ids<'e, E>(
        &self,
        message_ids: &[Uuid],
        tx: E,
    ) -> Result<Vec<MessageEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let messages =
            sqlx::query_as::<_, MessageEntity>("SELECT * FROM messages WHERE id = ANY($1)")
                .bind(message_ids)
                .fetch_all(tx)
                .await?;

        Ok(messages)
    }

    async fn undelivered_ids<'e, E>(
        &self,
        user_id: &Uuid,
        tx: E,
    ) -> Result<Vec<Uuid>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT m.id
            FROM messages m
            JOIN participants p
                ON p.conversation_id = m.conversation_id
            AND p.user_id = $1
            AND p.is_active
            LEFT JOIN message_deliveries d
                ON d.message_id = m.id
            AND d.user_id = $1
            WHERE m.sender_id IS DISTINCT FROM $1
            AND NOT m.is_deleted
            AND (d.status IS NULL OR d.status = 'sent')
            ORDER BY m.sent_at
            "#,
        )
        .bind(user_id)
        .fetch_all(tx)
        .await?;

        Ok(ids)
    }
}

#[derive(Clone, Default)]
pub struct DeliveryRepositoryPg {}

#[async_trait::async_trait]
impl DeliveryRepository for DeliveryRepositoryPg {
    async fn find_by_message<'e, E>(
        &self,
        message_id: &Uuid,
        tx: E,
    ) -> Result<Vec<MessageDeliveryEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let rows = sqlx::query_as::<_, MessageDeliveryEntity>(
            "SELECT * FROM message_deliveries WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_all(tx)
        .await?;

        Ok(rows)
    }

    async fn mark_delivered<'e, E>(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO message_deliveries (message_id, user_id, status, delivered_at)
            VALUES ($1, $2, 'delivered', NOW())
            ON CONFLICT (message_id, user_id) DO UPDATE
            SET status = 'delivered',
                delivered_at = COALESCE(message_deliveries.delivered_at, NOW())
            WHERE message_deliveries.status = 'sent'
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .execute(tx)
        .await?;

        Ok(())
    }

    async fn mark_read<'e, E>(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO message_deliveries (message_id, user_id, status, delivered_at, read_at)
            VALUES ($1, $2, 'read', NOW(), NOW())
            ON CONFLICT (message_id, user_id) DO UPDATE
            SET status = 'read',
                delivered_at = COALESCE(message_deliveries.delivered_at, NOW()),
                read_at = COALESCE(message_deliveries.read_at, NOW())
            WHERE message_deliveries.status <> 'read'
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .execute(tx)
        .await?;

        Ok(())
    }
}
