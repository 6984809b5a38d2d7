//! Shared test utilities for database operations
//!
//! Provides a common test_store() function that creates an in-memory
//! database with the full schema, so unit tests run against the same
//! schema as production.

use sqlx::SqlitePool;

use super::Database;
use crate::store::Store;

/// Create an in-memory test database pool with full schema
pub async fn test_pool() -> SqlitePool {
    let db = Database::new(None)
        .await
        .expect("Failed to create test database");
    db.pool().clone()
}

/// Create a store over a fresh in-memory database
pub async fn test_store() -> Store {
    Store::new(test_pool().await)
}
