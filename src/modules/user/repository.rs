use std::collections::HashMap;
use uuid::Uuid;

use crate::{api::error, modules::user::schema::UserEntity};

/// Read-only view of the user directory. Account management is owned by
/// another service; this side only resolves ids to names.
#[async_trait::async_trait]
pub trait UserDirectory {
    async fn find_by_id<'e, E>(
        &self,
        id: &Uuid,
        tx: E,
    ) -> Result<Option<UserEntity>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;

    async fn display_names<'e, E>(
        &self,
        ids: &[Uuid],
        tx: E,
    ) -> Result<HashMap<Uuid, String>, error::SystemError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>;
}
