use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::catalog::{
    CreateProductPayload, Product, ProductKind, ProductStore, UpdateProductPayload, validate_product,
};
use crate::error::StorefrontError;
use crate::storage::database::Database;
use crate::storage::time::{column_time, to_db_string};

const PRODUCT_COLUMNS: &str = "id, name, description, price, kind, target_ids, features,
    is_active, is_recommended, color, created_at, updated_at";

fn json_list(idx: usize, s: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    let kind_s: String = row.get(4)?;
    let targets_s: String = row.get(5)?;
    let features_s: String = row.get(6)?;
    let created_at_s: String = row.get(10)?;
    let updated_at_s: String = row.get(11)?;
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        kind: ProductKind::parse(&kind_s).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(4, "kind".into(), rusqlite::types::Type::Text)
        })?,
        target_ids: json_list(5, &targets_s)?,
        features: json_list(6, &features_s)?,
        is_active: row.get(7)?,
        is_recommended: row.get(8)?,
        color: row.get(9)?,
        created_at: column_time(10, &created_at_s)?,
        updated_at: column_time(11, &updated_at_s)?,
    })
}

fn fetch_product(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Product>> {
    conn.query_row(
        &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
        [id],
        row_to_product,
    )
    .optional()
}

#[async_trait]
impl ProductStore for Database {
    async fn create_product(&self, payload: CreateProductPayload) -> Result<Product, StorefrontError> {
        let now = Utc::now();
        let id = payload
            .id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut product = Product {
            id,
            name: payload.name,
            description: payload.description,
            price: payload.price,
            kind: payload.kind,
            target_ids: payload.target_ids,
            features: payload.features,
            is_active: payload.is_active,
            is_recommended: payload.is_recommended,
            color: payload.color,
            created_at: now,
            updated_at: now,
        };
        validate_product(&mut product)?;

        let conn = self.connection.lock().await;
        if fetch_product(&conn, &product.id)?.is_some() {
            return Err(StorefrontError::Conflict(format!(
                "product `{}` already exists",
                product.id
            )));
        }
        conn.execute(
            "INSERT INTO products (id, name, description, price, kind, target_ids, features,
                is_active, is_recommended, color, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                &product.id,
                &product.name,
                &product.description,
                product.price,
                product.kind.as_str(),
                serde_json::to_string(&product.target_ids)?,
                serde_json::to_string(&product.features)?,
                product.is_active,
                product.is_recommended,
                &product.color,
                to_db_string(&now),
                to_db_string(&now),
            ],
        )?;
        Ok(product)
    }

    async fn update_product(
        &self,
        id: &str,
        payload: UpdateProductPayload,
    ) -> Result<Option<Product>, StorefrontError> {
        let conn = self.connection.lock().await;
        let Some(mut product) = fetch_product(&conn, id)? else {
            return Ok(None);
        };
        payload.apply_to(&mut product)?;
        product.updated_at = Utc::now();
        conn.execute(
            "UPDATE products SET name = ?2, description = ?3, price = ?4, kind = ?5,
                target_ids = ?6, features = ?7, is_active = ?8, is_recommended = ?9,
                color = ?10, updated_at = ?11
             WHERE id = ?1",
            rusqlite::params![
                id,
                &product.name,
                &product.description,
                product.price,
                product.kind.as_str(),
                serde_json::to_string(&product.target_ids)?,
                serde_json::to_string(&product.features)?,
                product.is_active,
                product.is_recommended,
                &product.color,
                to_db_string(&product.updated_at),
            ],
        )?;
        Ok(Some(product))
    }

    async fn get_product(&self, id: &str) -> Result<Option<Product>, StorefrontError> {
        let conn = self.connection.lock().await;
        Ok(fetch_product(&conn, id)?)
    }

    async fn list_products(&self) -> Result<Vec<Product>, StorefrontError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY seq ASC"
        ))?;
        let rows = stmt.query_map([], row_to_product)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn delete_product(&self, id: &str) -> Result<bool, StorefrontError> {
        let conn = self.connection.lock().await;
        let affected = conn.execute("DELETE FROM products WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload(id: &str, targets: &[&str]) -> CreateProductPayload {
        CreateProductPayload {
            id: Some(id.into()),
            name: format!("Product {id}"),
            description: String::new(),
            price: 1999,
            kind: ProductKind::Subject,
            target_ids: targets.iter().map(|s| s.to_string()).collect(),
            features: vec!["Live classes".into()],
            is_active: true,
            is_recommended: false,
            color: None,
        }
    }

    #[tokio::test]
    async fn crud_keeps_catalog_order() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("catalog.db").to_str().unwrap())
            .await
            .unwrap();

        db.create_product(payload("b", &["physics"])).await.unwrap();
        db.create_product(payload("a", &["chemistry"])).await.unwrap();
        let dup = db.create_product(payload("a", &["chemistry"])).await;
        assert!(matches!(dup, Err(StorefrontError::Conflict(_))));

        let ids: Vec<String> = db
            .list_products()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);

        let updated = db
            .update_product(
                "a",
                UpdateProductPayload {
                    is_recommended: Some(true),
                    target_ids: Some(vec!["chemistry".into(), "biology".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(updated.is_recommended);
        let fetched = db.get_product("a").await.unwrap().unwrap();
        assert_eq!(fetched.target_ids, vec!["chemistry", "biology"]);
        assert_eq!(fetched.features, vec!["Live classes"]);

        assert!(db.update_product("zz", UpdateProductPayload::default()).await.unwrap().is_none());
        assert!(db.delete_product("b").await.unwrap());
        assert!(!db.delete_product("b").await.unwrap());
        assert_eq!(db.list_products().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_products_are_not_written() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("catalog.db").to_str().unwrap())
            .await
            .unwrap();
        let res = db.create_product(payload("x", &[])).await;
        assert!(matches!(res, Err(StorefrontError::Validation(_))));
        assert!(db.list_products().await.unwrap().is_empty());
    }
}
