use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    api::error,
    modules::user::{repository::UserDirectory, schema::UserEntity},
};

#[derive(Clone)]
pub struct UserDirectoryPg {}

impl UserDirectoryPg {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for UserDirectoryPg {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UserDirectory for UserDirectoryPg {
    async fn find_by_id<'e, E>(
        &self,
        id: &Uuid,
        tx: E,
    ) -> Result<Option<UserEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let user = sqlx::query_as::<_, UserEntity>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(tx)
            .await?;

        Ok(user)
    }

    async fn display_names<'e, E>(
        &self,
        ids: &[Uuid],
        tx: E,
    ) -> Result<HashMap<Uuid, String>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, UserEntity>(
            "SELECT * FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(tx)
        .await?;

        Ok(rows.into_iter().map(|u| (u.id, u.display_name)).collect())
    }
}
