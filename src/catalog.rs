use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorefrontError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Bundle,
    Subject,
    Chapter,
    Material,
    TestSeries,
}

impl ProductKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductKind::Bundle => "bundle",
            ProductKind::Subject => "subject",
            ProductKind::Chapter => "chapter",
            ProductKind::Material => "material",
            ProductKind::TestSeries => "test_series",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bundle" => Some(ProductKind::Bundle),
            "subject" => Some(ProductKind::Subject),
            "chapter" => Some(ProductKind::Chapter),
            "material" => Some(ProductKind::Material),
            "test_series" => Some(ProductKind::TestSeries),
            _ => None,
        }
    }

    /// Kinds listed on the storefront; chapters and materials are only sold
    /// through upsell offers.
    pub fn is_storefront(self) -> bool {
        matches!(
            self,
            ProductKind::Bundle | ProductKind::TestSeries | ProductKind::Subject
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: i64,
    #[serde(rename = "type")]
    pub kind: ProductKind,
    pub target_ids: Vec<String>,
    pub features: Vec<String>,
    pub is_active: bool,
    pub is_recommended: bool,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: i64,
    #[serde(rename = "type")]
    pub kind: ProductKind,
    pub target_ids: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_recommended: bool,
    #[serde(default)]
    pub color: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default, rename = "type")]
    pub kind: Option<ProductKind>,
    #[serde(default)]
    pub target_ids: Option<Vec<String>>,
    #[serde(default)]
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_recommended: Option<bool>,
    #[serde(default)]
    pub color: Option<Option<String>>, // None -> 不修改；Some(None) -> 清空
}

impl UpdateProductPayload {
    pub fn apply_to(self, product: &mut Product) -> Result<(), StorefrontError> {
        if let Some(name) = self.name {
            product.name = name;
        }
        if let Some(description) = self.description {
            product.description = description;
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(kind) = self.kind {
            product.kind = kind;
        }
        if let Some(target_ids) = self.target_ids {
            product.target_ids = target_ids;
        }
        if let Some(features) = self.features {
            product.features = features;
        }
        if let Some(is_active) = self.is_active {
            product.is_active = is_active;
        }
        if let Some(is_recommended) = self.is_recommended {
            product.is_recommended = is_recommended;
        }
        if let Some(color) = self.color {
            product.color = color;
        }
        validate_product(product)
    }
}

/// Normalizes the unlock set in place and rejects products that could never
/// be priced or owned.
pub fn validate_product(product: &mut Product) -> Result<(), StorefrontError> {
    if product.name.trim().is_empty() {
        return Err(StorefrontError::Validation("product name is required".into()));
    }
    if product.price < 0 {
        return Err(StorefrontError::Validation("price must not be negative".into()));
    }
    product.target_ids = normalize_targets(&product.target_ids);
    if product.target_ids.is_empty() {
        return Err(StorefrontError::Validation(
            "product must unlock at least one target".into(),
        ));
    }
    Ok(())
}

// Drops blank ids and duplicates, keeps first-seen order.
fn normalize_targets(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for t in raw {
        let t = t.trim();
        if !t.is_empty() && !out.iter().any(|x| x == t) {
            out.push(t.to_string());
        }
    }
    out
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn create_product(&self, payload: CreateProductPayload) -> Result<Product, StorefrontError>;
    async fn update_product(
        &self,
        id: &str,
        payload: UpdateProductPayload,
    ) -> Result<Option<Product>, StorefrontError>;
    async fn get_product(&self, id: &str) -> Result<Option<Product>, StorefrontError>;
    /// Catalog order (creation order).
    async fn list_products(&self) -> Result<Vec<Product>, StorefrontError>;
    async fn delete_product(&self, id: &str) -> Result<bool, StorefrontError>;
}

/// Active storefront products, recommended first; otherwise catalog order.
pub fn storefront_view(products: &[Product]) -> Vec<Product> {
    let mut shown: Vec<Product> = products
        .iter()
        .filter(|p| p.is_active && p.kind.is_storefront())
        .cloned()
        .collect();
    shown.sort_by_key(|p| !p.is_recommended);
    shown
}

/// First active product (catalog order) that unlocks `target_id`.
pub fn find_by_target<'a>(products: &'a [Product], target_id: &str) -> Option<&'a Product> {
    products
        .iter()
        .find(|p| p.is_active && p.target_ids.iter().any(|t| t == target_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, kind: ProductKind, active: bool, recommended: bool, targets: &[&str]) -> Product {
        let now = Utc::now();
        Product {
            id: id.into(),
            name: id.to_uppercase(),
            description: String::new(),
            price: 100,
            kind,
            target_ids: targets.iter().map(|s| s.to_string()).collect(),
            features: Vec::new(),
            is_active: active,
            is_recommended: recommended,
            color: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn storefront_filters_kinds_and_puts_recommended_first() {
        let catalog = vec![
            product("a", ProductKind::Subject, true, false, &["physics"]),
            product("b", ProductKind::Chapter, true, true, &["kinematics"]),
            product("c", ProductKind::Bundle, true, true, &["physics", "chemistry"]),
            product("d", ProductKind::TestSeries, false, true, &["mock-1"]),
            product("e", ProductKind::TestSeries, true, false, &["mock-1"]),
            product("f", ProductKind::Subject, true, true, &["biology"]),
        ];
        let ids: Vec<String> = storefront_view(&catalog).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["c", "f", "a", "e"]);
    }

    #[test]
    fn find_by_target_skips_inactive_and_keeps_catalog_order() {
        let catalog = vec![
            product("old", ProductKind::Subject, false, false, &["physics"]),
            product("single", ProductKind::Subject, true, false, &["physics"]),
            product("bundle", ProductKind::Bundle, true, true, &["physics", "chemistry"]),
        ];
        assert_eq!(find_by_target(&catalog, "physics").unwrap().id, "single");
        assert_eq!(find_by_target(&catalog, "chemistry").unwrap().id, "bundle");
        assert!(find_by_target(&catalog, "maths").is_none());
    }

    #[test]
    fn validation_normalizes_targets() {
        let mut p = product("p", ProductKind::Bundle, true, false, &[" physics", "physics", "", "chemistry"]);
        validate_product(&mut p).unwrap();
        assert_eq!(p.target_ids, vec!["physics", "chemistry"]);

        let mut empty = product("p", ProductKind::Bundle, true, false, &["  "]);
        assert!(validate_product(&mut empty).is_err());

        let mut negative = product("p", ProductKind::Bundle, true, false, &["x"]);
        negative.price = -1;
        assert!(validate_product(&mut negative).is_err());
    }

    #[test]
    fn partial_update_leaves_other_fields() {
        let mut p = product("p", ProductKind::Subject, true, false, &["physics"]);
        p.color = Some("#ff0000".into());
        UpdateProductPayload {
            price: Some(4999),
            color: Some(None),
            ..Default::default()
        }
        .apply_to(&mut p)
        .unwrap();
        assert_eq!(p.price, 4999);
        assert_eq!(p.color, None);
        assert_eq!(p.target_ids, vec!["physics"]);
    }
}
