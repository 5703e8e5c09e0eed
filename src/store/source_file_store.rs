//! `SourceFiles` (§4.7, C7): which result files have already been
//! ingested, so the backup poll can skip anything the primary
//! pub/sub path already processed.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

use crate::errors::Result;
use crate::store::entities::source_file as source_file_entity;

pub struct SourceFileStore {
    db: sea_orm::DatabaseConnection,
}

impl SourceFileStore {
    pub fn new(db: sea_orm::DatabaseConnection) -> Self {
        Self { db }
    }

    /// Record that `name` finished processing at `now`. Idempotent:
    /// redelivery of the same pub/sub notification re-marks the same row.
    pub async fn set_ingested(&self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let active = source_file_entity::ActiveModel {
            name: Set(name.to_string()),
            ingested_at: Set(now),
        };
        match source_file_entity::Entity::find_by_id(name.to_string()).one(&self.db).await? {
            Some(_) => {
                active.update(&self.db).await?;
            }
            None => {
                active.insert(&self.db).await?;
            }
        }
        Ok(())
    }

    pub async fn was_ingested(&self, name: &str) -> Result<bool> {
        let row = source_file_entity::Entity::find_by_id(name.to_string()).one(&self.db).await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Database, Schema};

    async fn test_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        let stmt = builder.build(&schema.create_table_from_entity(source_file_entity::Entity));
        db.execute(stmt).await.unwrap();
        db
    }

    #[tokio::test]
    async fn was_ingested_reflects_set_ingested() {
        let db = test_db().await;
        let store = SourceFileStore::new(db);
        assert!(!store.was_ingested("dm-json-v1/foo.json").await.unwrap());

        store.set_ingested("dm-json-v1/foo.json", Utc::now()).await.unwrap();
        assert!(store.was_ingested("dm-json-v1/foo.json").await.unwrap());
    }

    #[tokio::test]
    async fn set_ingested_twice_is_idempotent() {
        let db = test_db().await;
        let store = SourceFileStore::new(db);
        let first = Utc::now();
        store.set_ingested("a.json", first).await.unwrap();
        let second = first + chrono::Duration::seconds(5);
        store.set_ingested("a.json", second).await.unwrap();
        assert!(store.was_ingested("a.json").await.unwrap());
    }
}
