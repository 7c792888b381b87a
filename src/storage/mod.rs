pub mod database;
pub mod database_carts;
pub mod database_catalog;
pub mod database_content;
pub mod database_coupons;
pub mod database_enrollments;
pub mod database_entitlements;
pub mod database_orders;
pub mod time;

pub use database::Database;
