use std::collections::HashSet;

use uuid::Uuid;

use crate::modules::conversation::model::{NewConversationRow, NewParticipant};
use crate::modules::conversation::repository::{
    ConversationRepository, ParticipantRepository, TypingRepository,
};
use crate::modules::conversation::schema::{ParticipantEntity, TypingIndicatorEntity};
use crate::{api::error, modules::conversation::schema::ConversationEntity};

#[derive(Clone)]
pub struct ConversationRepositoryPg {
    pool: sqlx::PgPool,
}

impl ConversationRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for ConversationRepositoryPg {
    fn get_pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    async fn find_by_id<'e, E>(
        &self,
        conversation_id: &Uuid,
        tx: E,
    ) -> Result<Option<ConversationEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let conversation =
            sqlx::query_as::<_, ConversationEntity>("SELECT * FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(tx)
                .await?;

        Ok(conversation)
    }

    async fn create<'e, E>(
        &self,
        conversation: &NewConversationRow,
        tx: E,
    ) -> Result<ConversationEntity, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let id = Uuid::now_v7();
        let conversation = sqlx::query_as::<_, ConversationEntity>(
            r#"
            INSERT INTO conversations (id, type, title, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(conversation._type)
        .bind(&conversation.title)
        .bind(conversation.created_by)
        .fetch_one(tx)
        .await?;

        Ok(conversation)
    }

    async fn find_direct_between_users<'e, E>(
        &self,
        user_a: &Uuid,
        user_b: &Uuid,
        tx: E,
    ) -> Result<Option<ConversationEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        // No is_active filter here: a direct pair is unique for all time
        // and left conversations get reactivated, not recreated.
        let conversation = sqlx::query_as::<_, ConversationEntity>(
            r#"
            SELECT c.*
            FROM conversations c
            WHERE c.type = 'direct'
            AND EXISTS (
                SELECT 1
                FROM participants p1
                WHERE p1.conversation_id = c.id
                AND p1.user_id = $1
            )
            AND EXISTS (
                SELECT 1
                FROM participants p2
                WHERE p2.conversation_id = c.id
                AND p2.user_id = $2
            )
            LIMIT 1
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(tx)
        .await?;

        Ok(conversation)
    }

    async fn touch_last_message_at<'e, E>(
        &self,
        conversation_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query("UPDATE conversations SET last_message_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(tx)
            .await?;

        Ok(())
    }

    async fn find_all_by_user<'e, E>(
        &self,
        user_id: &Uuid,
        tx: E,
    ) -> Result<Vec<ConversationEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let conversations = sqlx::query_as::<_, ConversationEntity>(
            r#"
            SELECT c.*
            FROM conversations c
            JOIN participants p
                ON p.conversation_id = c.id
            AND p.user_id = $1
            AND p.is_active
            ORDER BY c.last_message_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(tx)
        .await?;

        Ok(conversations)
    }
}

#[derive(Clone, Default)]
pub struct ParticipantRepositoryPg {}

#[async_trait::async_trait]
impl ParticipantRepository for ParticipantRepositoryPg {
    async fn find_one<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<Option<ParticipantEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let participant = sqlx::query_as::<_, ParticipantEntity>(
            "SELECT * FROM participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(tx)
        .await?;

        Ok(participant)
    }

    async fn insert<'e, E>(
        &self,
        participant: &NewParticipant,
        tx: E,
    ) -> Result<ParticipantEntity, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let entity = sqlx::query_as::<_, ParticipantEntity>(
            r#"
            INSERT INTO participants (conversation_id, user_id, role)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(participant.conversation_id)
        .bind(participant.user_id)
        .bind(participant.role)
        .fetch_one(tx)
        .await?;

        Ok(entity)
    }

    async fn reactivate<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<ParticipantEntity, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let entity = sqlx::query_as::<_, ParticipantEntity>(
            r#"
            UPDATE participants
            SET is_active = TRUE,
                joined_at = NOW(),
                left_at = NULL
            WHERE conversation_id = $1
            AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(tx)
        .await?;

        Ok(entity)
    }

    async fn deactivate<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<u64, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let rows = sqlx::query(
            r#"
            UPDATE participants
            SET is_active = FALSE,
                left_at = NOW()
            WHERE conversation_id = $1
            AND user_id = $2
            AND is_active
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(tx)
        .await?
        .rows_affected();

        Ok(rows)
    }

    async fn find_by_conversations<'e, E>(
        &self,
        conversation_ids: &[Uuid],
        tx: E,
    ) -> Result<Vec<ParticipantEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let participants = sqlx::query_as::<_, ParticipantEntity>(
            "SELECT * FROM participants WHERE conversation_id = ANY($1)",
        )
        .bind(conversation_ids)
        .fetch_all(tx)
        .await?;

        Ok(participants)
    }

    async fn active_user_ids<'e, E>(
        &self,
        conversation_id: &Uuid,
        tx: E,
    ) -> Result<Vec<Uuid>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM participants WHERE conversation_id = $1 AND is_active",
        )
        .bind(conversation_id)
        .fetch_all(tx)
        .await?;

        Ok(ids)
    }

    async fn is_active_participant<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<bool, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let active = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM participants
                WHERE conversation_id = $1
                AND user_id = $2
                AND is_active
            )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(tx)
        .await?;

        Ok(active)
    }

    async fn set_last_read<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        message_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE participants
            SET last_read_message_id = $3,
                last_read_at = NOW()
            WHERE conversation_id = $1
            AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(message_id)
        .execute(tx)
        .await?;

        Ok(())
    }

    async fn conversation_ids_of_user<'e, E>(
        &self,
        user_id: &Uuid,
        tx: E,
    ) -> Result<Vec<Uuid>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT conversation_id FROM participants WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .fetch_all(tx)
        .await?;

        Ok(ids)
    }

    async fn active_memberships<'e, E>(
        &self,
        user_id: &Uuid,
        conversation_ids: &[Uuid],
        tx: E,
    ) -> Result<HashSet<Uuid>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT conversation_id FROM participants
            WHERE user_id = $1
            AND conversation_id = ANY($2)
            AND is_active
            "#,
        )
        .bind(user_id)
        .bind(conversation_ids)
        .fetch_all(tx)
        .await?;

        Ok(ids.into_iter().collect())
    }
}

#[derive(Clone, Default)]
pub struct TypingRepositoryPg {}

#[async_trait::async_trait]
impl TypingRepository for TypingRepositoryPg {
    async fn set_typing<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<(), error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO typing_indicators (conversation_id, user_id, is_typing, last_typing_at)
            VALUES ($1, $2, TRUE, NOW())
            ON CONFLICT (conversation_id, user_id) DO UPDATE
            SET is_typing = TRUE,
                last_typing_at = NOW()
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(tx)
        .await?;

        Ok(())
    }

    async fn clear_typing<'e, E>(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        tx: E,
    ) -> Result<u64, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let rows = sqlx::query(
            r#"
            UPDATE typing_indicators
            SET is_typing = FALSE
            WHERE conversation_id = $1
            AND user_id = $2
            AND is_typing
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(tx)
        .await?
        .rows_affected();

        Ok(rows)
    }

    async fn find_active<'e, E>(
        &self,
        conversation_id: &Uuid,
        cutoff: chrono::DateTime<chrono::Utc>,
        tx: E,
    ) -> Result<Vec<TypingIndicatorEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let rows = sqlx::query_as::<_, TypingIndicatorEntity>(
            r#"
            SELECT * FROM typing_indicators
            WHERE conversation_id = $1
            AND is_typing
            AND last_typing_at >= $2
            "#,
        )
        .bind(conversation_id)
        .bind(cutoff)
        .fetch_all(tx)
        .await?;

        Ok(rows)
    }
}
