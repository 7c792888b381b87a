use async_trait::async_trait;
use rusqlite::OptionalExtension;

use crate::catalog::ProductKind;
use crate::error::StorefrontError;
use crate::orders::{Order, OrderStatus, OrderStore};
use crate::storage::database::Database;
use crate::storage::time::{column_time, to_db_string};

const ORDER_COLUMNS: &str = "id, user_id, user_email, product_id, plan_name, amount, status,
    targets, target_type, payment_ref, created_at, list_price";

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    let status_s: String = row.get(6)?;
    let targets_s: String = row.get(7)?;
    let target_type_s: String = row.get(8)?;
    let created_at_s: String = row.get(10)?;
    Ok(Order {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_email: row.get(2)?,
        product_id: row.get(3)?,
        plan: row.get(4)?,
        amount: row.get(5)?,
        status: OrderStatus::parse(&status_s).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(6, "status".into(), rusqlite::types::Type::Text)
        })?,
        targets: serde_json::from_str(&targets_s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?,
        target_type: ProductKind::parse(&target_type_s).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(8, "target_type".into(), rusqlite::types::Type::Text)
        })?,
        payment_ref: row.get(9)?,
        created_at: column_time(10, &created_at_s)?,
        list_price: row.get(11)?,
    })
}

#[async_trait]
impl OrderStore for Database {
    async fn create_order(&self, order: &Order) -> Result<(), StorefrontError> {
        let targets = serde_json::to_string(&order.targets)?;
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO orders (id, user_id, user_email, product_id, plan_name, amount, status,
                targets, target_type, payment_ref, created_at, list_price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                &order.id,
                &order.user_id,
                &order.user_email,
                &order.product_id,
                &order.plan,
                order.amount,
                order.status.as_str(),
                &targets,
                order.target_type.as_str(),
                &order.payment_ref,
                to_db_string(&order.created_at),
                order.list_price,
            ],
        )?;
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StorefrontError> {
        let conn = self.connection.lock().await;
        let order = conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
                [id],
                row_to_order,
            )
            .optional()?;
        Ok(order)
    }

    async fn set_status(&self, id: &str, status: OrderStatus) -> Result<bool, StorefrontError> {
        let conn = self.connection.lock().await;
        let affected = conn.execute(
            "UPDATE orders SET status = ?2 WHERE id = ?1",
            rusqlite::params![id, status.as_str()],
        )?;
        Ok(affected > 0)
    }

    async fn record_payment(&self, id: &str, payment_ref: &str) -> Result<bool, StorefrontError> {
        let conn = self.connection.lock().await;
        let affected = conn.execute(
            "UPDATE orders SET payment_ref = ?2 WHERE id = ?1",
            rusqlite::params![id, payment_ref],
        )?;
        Ok(affected > 0)
    }

    async fn list_orders_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, StorefrontError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1
             ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit, offset], row_to_order)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn list_paid_pending_orders(&self, user_id: &str) -> Result<Vec<Order>, StorefrontError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE user_id = ?1 AND status = ?2 AND payment_ref IS NOT NULL
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![user_id, OrderStatus::Pending.as_str()],
            row_to_order,
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn list_orders(&self, limit: i64, offset: i64) -> Result<Vec<Order>, StorefrontError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(rusqlite::params![limit, offset], row_to_order)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
