//! Common repository traits.

use crate::database::error::DatabaseError;
use async_trait::async_trait;
use sqlx::PgPool;

/// Basic CRUD surface shared by entity repositories. Ids arrive as strings
/// from the HTTP layer; implementations parse them as needed.
#[async_trait]
pub trait Repository {
    type Entity;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError>;
    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError>;
    async fn insert(&self, entity: &Self::Entity) -> Result<Self::Entity, DatabaseError>;
    async fn update(&self, id: &str, entity: &Self::Entity) -> Result<Self::Entity, DatabaseError>;
    async fn delete(&self, id: &str) -> Result<bool, DatabaseError>;
}

/// Exposes the underlying pool so callers can open multi-statement
/// transactions spanning repositories.
pub trait TransactionalRepository {
    fn pool(&self) -> &PgPool;
}
