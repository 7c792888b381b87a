use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::content::{ContentStore, ContentTree, ContentTreeRecord};
use crate::error::StorefrontError;
use crate::storage::database::Database;
use crate::storage::time::{parse_db_string, to_db_string};

const SCOPE: &str = "published";

#[async_trait]
impl ContentStore for Database {
    async fn get_content_tree(&self) -> Result<ContentTreeRecord, StorefrontError> {
        let conn = self.connection.lock().await;
        let row: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT content, updated_at, updated_by FROM content_tree WHERE scope = ?1",
                [SCOPE],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        drop(conn);

        let Some((content, updated_at_s, updated_by)) = row else {
            return Ok(ContentTreeRecord {
                tree: ContentTree::default(),
                updated_at: Utc::now(),
                updated_by: None,
            });
        };
        let tree = serde_json::from_str::<ContentTree>(&content)?;
        Ok(ContentTreeRecord {
            tree,
            updated_at: parse_db_string(&updated_at_s)?,
            updated_by,
        })
    }

    async fn put_content_tree(
        &self,
        tree: ContentTree,
        updated_by: Option<String>,
    ) -> Result<ContentTreeRecord, StorefrontError> {
        tree.validate()?;
        let now = Utc::now();
        let content = serde_json::to_string(&tree)?;
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO content_tree (scope, content, updated_at, updated_by) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![SCOPE, &content, to_db_string(&now), updated_by.clone()],
        )?;
        Ok(ContentTreeRecord {
            tree,
            updated_at: now,
            updated_by,
        })
    }
}
