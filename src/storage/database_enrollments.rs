use async_trait::async_trait;

use crate::catalog::ProductKind;
use crate::enrollment::{Enrollment, EnrollmentLedger};
use crate::error::StorefrontError;
use crate::storage::database::Database;
use crate::storage::time::{column_time, to_db_string};

fn row_to_enrollment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Enrollment> {
    let target_type_s: String = row.get(2)?;
    let created_at_s: String = row.get(3)?;
    Ok(Enrollment {
        user_id: row.get(0)?,
        target_id: row.get(1)?,
        target_type: ProductKind::parse(&target_type_s).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(2, "target_type".into(), rusqlite::types::Type::Text)
        })?,
        created_at: column_time(3, &created_at_s)?,
    })
}

#[async_trait]
impl EnrollmentLedger for Database {
    async fn grant(&self, enrollment: &Enrollment) -> Result<bool, StorefrontError> {
        let conn = self.connection.lock().await;
        // 已存在的授权保持原始时间，不覆盖
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO enrollments (user_id, target_id, target_type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                &enrollment.user_id,
                &enrollment.target_id,
                enrollment.target_type.as_str(),
                to_db_string(&enrollment.created_at),
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn list_enrollments(&self, user_id: &str) -> Result<Vec<Enrollment>, StorefrontError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT user_id, target_id, target_type, created_at
             FROM enrollments WHERE user_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([user_id], row_to_enrollment)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
