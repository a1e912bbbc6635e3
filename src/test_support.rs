#![allow(clippy::unwrap_used)]

use sea_orm::{ConnectOptions, Database, DbConn};

use crate::config::setup_schema;

/// Fresh in-memory SQLite database with both tables created.
///
/// A single pooled connection keeps every query on the same in-memory database.
pub async fn sqlite_memory_db() -> DbConn {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1);
    let db = Database::connect(options).await.unwrap();
    setup_schema(&db).await.unwrap();
    db
}
