use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::coupon::{Coupon, CouponKind, CouponStore, CreateCouponPayload};
use crate::error::StorefrontError;
use crate::storage::database::Database;
use crate::storage::time::{column_time, to_db_string};

fn row_to_coupon(row: &rusqlite::Row<'_>) -> rusqlite::Result<Coupon> {
    let kind_s: String = row.get(2)?;
    let created_at_s: String = row.get(4)?;
    Ok(Coupon {
        code: row.get(0)?,
        discount: row.get(1)?,
        kind: CouponKind::parse(&kind_s).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(2, "kind".into(), rusqlite::types::Type::Text)
        })?,
        active: row.get(3)?,
        created_at: column_time(4, &created_at_s)?,
    })
}

#[async_trait]
impl CouponStore for Database {
    async fn create_coupon(&self, payload: CreateCouponPayload) -> Result<Coupon, StorefrontError> {
        let payload = payload.normalized()?;
        let now = Utc::now();
        let conn = self.connection.lock().await;
        let exists: Option<String> = conn
            .query_row(
                "SELECT code FROM coupons WHERE code = ?1",
                [&payload.code],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StorefrontError::Conflict(format!(
                "coupon `{}` already exists",
                payload.code
            )));
        }
        conn.execute(
            "INSERT INTO coupons (code, discount, kind, active, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                &payload.code,
                payload.discount,
                payload.kind.as_str(),
                payload.active,
                to_db_string(&now),
            ],
        )?;
        tracing::info!(code = %payload.code, kind = payload.kind.as_str(), "coupon created");
        Ok(Coupon {
            code: payload.code,
            discount: payload.discount,
            kind: payload.kind,
            active: payload.active,
            created_at: now,
        })
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>, StorefrontError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT code, discount, kind, active, created_at FROM coupons ORDER BY created_at DESC, code",
        )?;
        let rows = stmt.query_map([], row_to_coupon)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn get_coupon(&self, code: &str) -> Result<Option<Coupon>, StorefrontError> {
        let conn = self.connection.lock().await;
        let coupon = conn
            .query_row(
                "SELECT code, discount, kind, active, created_at FROM coupons WHERE code = ?1",
                [code],
                row_to_coupon,
            )
            .optional()?;
        Ok(coupon)
    }

    async fn set_active(&self, code: &str, active: bool) -> Result<bool, StorefrontError> {
        let conn = self.connection.lock().await;
        let affected = conn.execute(
            "UPDATE coupons SET active = ?2 WHERE code = ?1",
            rusqlite::params![code, active],
        )?;
        Ok(affected > 0)
    }

    async fn delete_coupon(&self, code: &str) -> Result<bool, StorefrontError> {
        let conn = self.connection.lock().await;
        let affected = conn.execute("DELETE FROM coupons WHERE code = ?1", [code])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn codes_are_stored_uppercase_and_unique() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("coupons.db").to_str().unwrap())
            .await
            .unwrap();

        let c = db
            .create_coupon(CreateCouponPayload {
                code: "earlybird".into(),
                discount: 500,
                kind: CouponKind::Flat,
                active: true,
            })
            .await
            .unwrap();
        assert_eq!(c.code, "EARLYBIRD");

        let dup = db
            .create_coupon(CreateCouponPayload {
                code: "EarlyBird".into(),
                discount: 10,
                kind: CouponKind::Percent,
                active: true,
            })
            .await;
        assert!(matches!(dup, Err(StorefrontError::Conflict(_))));

        assert!(db.set_active("EARLYBIRD", false).await.unwrap());
        assert!(!db.get_coupon("EARLYBIRD").await.unwrap().unwrap().active);
        assert!(!db.set_active("NOPE", true).await.unwrap());

        assert_eq!(db.list_coupons().await.unwrap().len(), 1);
        assert!(db.delete_coupon("EARLYBIRD").await.unwrap());
        assert!(db.get_coupon("EARLYBIRD").await.unwrap().is_none());
    }
}
