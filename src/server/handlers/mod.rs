use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;

use crate::server::AppState;

mod admin_content;
mod admin_coupons;
mod admin_products;
mod auth;
mod auth_jwt;
mod cart;
mod checkout;
mod orders;
mod storefront;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(auth_jwt::login))
        .route("/auth/me", get(auth_jwt::me))
        // Storefront
        .route("/storefront/products", get(storefront::list_products))
        .route(
            "/storefront/targets/{target_id}/offer",
            get(storefront::target_offer),
        )
        .route("/me/access/{target_id}", get(storefront::access))
        .route("/me/ownership", get(storefront::ownership))
        .route("/me/ownership/events", get(storefront::ownership_events))
        .route("/me/orders", get(orders::my_orders))
        // Cart
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/cart/items", post(cart::add_item))
        .route("/cart/items/{id}", delete(cart::remove_item))
        .route("/cart/open", post(cart::set_open))
        .route(
            "/cart/coupon",
            post(cart::apply_coupon).delete(cart::remove_coupon),
        )
        // Checkout
        .route("/checkout/quote", post(checkout::quote))
        .route("/checkout/product", post(checkout::pay_product))
        .route("/checkout/cart", post(checkout::pay_cart))
        .route(
            "/checkout/orders/{id}/retry",
            post(checkout::retry_order),
        )
        .route("/checkout/state", get(checkout::state))
        // Admin
        .route(
            "/admin/products",
            get(admin_products::list_products).post(admin_products::create_product),
        )
        .route(
            "/admin/products/{id}",
            get(admin_products::get_product)
                .put(admin_products::update_product)
                .delete(admin_products::delete_product),
        )
        .route(
            "/admin/coupons",
            get(admin_coupons::list_coupons).post(admin_coupons::create_coupon),
        )
        .route(
            "/admin/coupons/{code}/toggle",
            post(admin_coupons::toggle_coupon),
        )
        .route("/admin/coupons/{code}", delete(admin_coupons::delete_coupon))
        .route(
            "/admin/content",
            get(admin_content::get_content).put(admin_content::put_content),
        )
        .route("/admin/orders", get(orders::list_all))
}

#[cfg(test)]
mod tests {
    use super::auth::{ADMIN_ROLE, AccessTokenClaims, issue_access_token};
    use crate::config::Settings;
    use crate::config::settings::{AuthConfig, CheckoutConfig, StorageConfig};
    use crate::server::{AppState, build_router};
    use crate::storage::Database;
    use crate::stores::Stores;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const SECRET: &str = "testsecret";

    async fn test_app() -> (tempfile::TempDir, Router) {
        test_app_with_latency(0).await
    }

    async fn test_app_with_latency(gateway_latency_ms: u64) -> (tempfile::TempDir, Router) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db").to_str().unwrap().to_string();
        let settings = Settings {
            storage: StorageConfig {
                database_path: db_path.clone(),
            },
            auth: AuthConfig {
                jwt_secret: Some(SECRET.into()),
                ..Default::default()
            },
            checkout: CheckoutConfig {
                gateway_latency_ms,
                gateway_failure_rate: 0.0,
            },
            ..Default::default()
        };
        let db = Arc::new(Database::new(&db_path).await.unwrap());
        let app = build_router(Arc::new(AppState::new(settings, Stores::sqlite(db))));
        (dir, app)
    }

    fn token(sub: &str, email: &str, role: &str) -> String {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: sub.into(),
            email: email.into(),
            role: role.into(),
            exp: (now + Duration::minutes(30)).timestamp(),
            iat: Some(now.timestamp()),
        };
        issue_access_token(SECRET, &claims).unwrap()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        let req = match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn routes_exist_for_root_and_api_prefix() {
        let (_dir, app) = test_app().await;
        let (status, body) = send(&app, "GET", "/storefront/products", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["products"].as_array().unwrap().is_empty());

        let (status, _) = send(&app, "GET", "/api/storefront/products", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn anonymous_checkout_redirects_to_login_with_return_path() {
        let (_dir, app) = test_app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/checkout/product",
            None,
            Some(json!({ "productId": "p1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["redirect"], "/login");
        assert_eq!(body["return_to"], "/api/checkout/product");

        let (status, body) = send(&app, "GET", "/cart", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["return_to"], "/cart");
    }

    #[tokio::test]
    async fn admin_routes_require_the_admin_role() {
        let (_dir, app) = test_app().await;
        let (status, _) = send(&app, "GET", "/admin/products", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let user = token("u1", "u@x.com", "user");
        let (status, _) = send(&app, "GET", "/admin/products", Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = token("admin", "admin@x.com", ADMIN_ROLE);
        let (status, _) = send(&app, "GET", "/admin/products", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn cart_checkout_end_to_end() {
        let (_dir, app) = test_app().await;
        let admin = token("admin", "admin@x.com", ADMIN_ROLE);
        let user = token("u1", "u@x.com", "user");

        for (id, price, targets, recommended) in [
            ("neet-bundle", 14999, json!(["physics", "chemistry"]), true),
            ("biology", 999, json!(["biology"]), false),
        ] {
            let (status, _) = send(
                &app,
                "POST",
                "/admin/products",
                Some(&admin),
                Some(json!({
                    "id": id,
                    "name": id,
                    "price": price,
                    "type": "bundle",
                    "targetIds": targets,
                    "isRecommended": recommended,
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = send(
            &app,
            "POST",
            "/admin/coupons",
            Some(&admin),
            Some(json!({ "code": "earlybird", "discount": 500, "type": "flat" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "POST", "/cart/items", Some(&user), Some(json!({ "productId": "neet-bundle" }))).await;
        assert_eq!(body["added"], true);
        assert_eq!(body["cart"]["open"], true);
        let (_, body) = send(&app, "POST", "/cart/items", Some(&user), Some(json!({ "productId": "neet-bundle" }))).await;
        assert_eq!(body["added"], false);
        assert_eq!(body["cart"]["count"], 1);

        let (status, body) = send(&app, "POST", "/cart/coupon", Some(&user), Some(json!({ "code": "EARLYBIRD " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid or expired coupon");
        let (status, body) = send(&app, "POST", "/cart/coupon", Some(&user), Some(json!({ "code": "earlybird" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cart"]["payable"], 14499);
        let (status, body) = send(&app, "POST", "/cart/coupon", Some(&user), Some(json!({ "code": "earlybird" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "a coupon is already applied");

        let (_, body) = send(&app, "POST", "/cart/items", Some(&user), Some(json!({ "productId": "biology" }))).await;
        assert_eq!(body["cart"]["payable"], 15498);

        let (status, body) = send(&app, "POST", "/checkout/cart", Some(&user), Some(json!({ "confirmedTotal": 15998 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "amount mismatch");

        let (status, body) = send(&app, "POST", "/checkout/cart", Some(&user), Some(json!({ "confirmedTotal": 15498 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["receipt"]["reloadRequired"], true);
        assert_eq!(body["receipt"]["orders"].as_array().unwrap().len(), 2);

        let (_, body) = send(&app, "GET", "/cart", Some(&user), None).await;
        assert_eq!(body["cart"]["count"], 0);

        let (_, body) = send(&app, "GET", "/me/ownership", Some(&user), None).await;
        let owned: Vec<&str> = body["owned"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(owned, vec!["neet-bundle", "biology"]);

        let (_, body) = send(&app, "GET", "/me/access/chemistry", Some(&user), None).await;
        assert_eq!(body["access"], true);
        let (_, body) = send(&app, "GET", "/me/access/maths", Some(&user), None).await;
        assert_eq!(body["access"], false);

        let (_, body) = send(&app, "GET", "/storefront/products", Some(&user), None).await;
        assert_eq!(body["products"][0]["id"], "neet-bundle");
        assert_eq!(body["products"][0]["owned"], true);

        let (status, body) = send(&app, "POST", "/checkout/product", Some(&user), Some(json!({ "productId": "biology" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "product already owned");

        let (_, body) = send(&app, "GET", "/me/orders", Some(&user), None).await;
        assert_eq!(body["orders"].as_array().unwrap().len(), 2);
        let (_, body) = send(&app, "GET", "/checkout/state", Some(&user), None).await;
        assert_eq!(body["phase"], "details");
    }

    #[tokio::test]
    async fn offer_points_at_the_first_product_unlocking_a_target() {
        let (_dir, app) = test_app().await;
        let admin = token("admin", "admin@x.com", ADMIN_ROLE);
        for (id, targets) in [("kinematics-pack", json!(["kinematics"])), ("physics", json!(["physics", "kinematics"]))] {
            send(
                &app,
                "POST",
                "/admin/products",
                Some(&admin),
                Some(json!({ "id": id, "name": id, "price": 499, "type": "chapter", "targetIds": targets })),
            )
            .await;
        }

        let (status, body) = send(&app, "GET", "/storefront/targets/kinematics/offer", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["product"]["id"], "kinematics-pack");
        assert_eq!(body["owned"], false);

        let (status, _) = send(&app, "GET", "/storefront/targets/optics/offer", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn abandoned_checkout_request_still_completes() {
        let (_dir, app) = test_app_with_latency(300).await;
        let admin = token("admin", "admin@x.com", ADMIN_ROLE);
        let user = token("u1", "u@x.com", "user");
        send(
            &app,
            "POST",
            "/admin/products",
            Some(&admin),
            Some(json!({ "id": "physics", "name": "Physics", "price": 999, "type": "subject", "targetIds": ["physics"] })),
        )
        .await;

        let request = {
            let app = app.clone();
            let user = user.clone();
            tokio::spawn(async move {
                send(&app, "POST", "/checkout/product", Some(&user), Some(json!({ "productId": "physics" }))).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // 模拟客户端断开
        request.abort();

        let mut status = Value::Null;
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let (_, body) = send(&app, "GET", "/me/orders", Some(&user), None).await;
            status = body["orders"][0]["status"].clone();
            if status == "Success" {
                break;
            }
        }
        assert_eq!(status, "Success");

        let (_, body) = send(&app, "GET", "/me/access/physics", Some(&user), None).await;
        assert_eq!(body["access"], true);
        let (_, body) = send(&app, "GET", "/checkout/state", Some(&user), None).await;
        assert_eq!(body["phase"], "details");
    }

    #[tokio::test]
    async fn ownership_stream_pushes_recomputed_ownership_after_checkout() {
        use futures_util::StreamExt;

        let (_dir, app) = test_app().await;
        let admin = token("admin", "admin@x.com", ADMIN_ROLE);
        let user = token("u1", "u@x.com", "user");
        send(
            &app,
            "POST",
            "/admin/products",
            Some(&admin),
            Some(json!({ "id": "physics", "name": "Physics", "price": 999, "type": "subject", "targetIds": ["physics"] })),
        )
        .await;

        let req = Request::builder()
            .uri("/me/ownership/events")
            .header(header::AUTHORIZATION, format!("Bearer {}", user))
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let mut frames = res.into_body().into_data_stream();

        let (status, _) = send(&app, "POST", "/checkout/product", Some(&user), Some(json!({ "productId": "physics" }))).await;
        assert_eq!(status, StatusCode::OK);

        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: ownership"));
        assert!(text.contains(r#""owned":["physics"]"#));
    }
}
