use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::entitlement::EntitlementCache;
use crate::error::StorefrontError;
use crate::storage::database::Database;
use crate::storage::time::to_db_string;

// 键值缓存：last-write-wins，无并发控制
#[async_trait]
impl EntitlementCache for Database {
    async fn get(&self, key: &str) -> Result<Option<String>, StorefrontError> {
        let conn = self.connection.lock().await;
        let value = conn
            .query_row("SELECT value FROM kv_cache WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorefrontError> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv_cache (key, value, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, to_db_string(&Utc::now())],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn last_write_wins() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("kv.db").to_str().unwrap())
            .await
            .unwrap();
        assert!(db.get("access_physics_u@x.com").await.unwrap().is_none());
        db.set("access_physics_u@x.com", "false").await.unwrap();
        db.set("access_physics_u@x.com", "true").await.unwrap();
        assert_eq!(
            db.get("access_physics_u@x.com").await.unwrap().as_deref(),
            Some("true")
        );
    }
}
