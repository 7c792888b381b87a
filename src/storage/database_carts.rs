use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::cart::{Cart, CartStore};
use crate::error::StorefrontError;
use crate::storage::database::Database;
use crate::storage::time::to_db_string;

#[async_trait]
impl CartStore for Database {
    async fn load_cart(&self, user_id: &str) -> Result<Cart, StorefrontError> {
        let conn = self.connection.lock().await;
        let content: Option<String> = conn
            .query_row(
                "SELECT content FROM carts WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);
        match content {
            Some(raw) => match serde_json::from_str::<Cart>(&raw) {
                Ok(cart) => Ok(cart),
                Err(e) => {
                    // 购物车只是暂存状态，损坏时按空车处理
                    tracing::warn!(user_id, "discarding unreadable cart: {}", e);
                    Ok(Cart::default())
                }
            },
            None => Ok(Cart::default()),
        }
    }

    async fn save_cart(&self, user_id: &str, cart: &Cart) -> Result<(), StorefrontError> {
        let content = serde_json::to_string(cart)?;
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO carts (user_id, content, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, &content, to_db_string(&Utc::now())],
        )?;
        Ok(())
    }
}
