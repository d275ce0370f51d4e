//! Database file location, connection pool and migrations.

use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

use crate::errors::StorageError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub const DB_FILE_NAME: &str = "stylist.db";
const POOL_MAX_SIZE: u32 = 4;

#[derive(Debug)]
struct ConnectionOptions;

impl r2d2::CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
            .map_err(r2d2::Error::QueryError)
    }
}

/// Ensure the data directory exists and return the database path inside it.
pub fn init(app_data_dir: &str) -> Result<String, StorageError> {
    let dir = Path::new(app_data_dir);
    std::fs::create_dir_all(dir)?;
    let db_path = dir.join(DB_FILE_NAME).to_string_lossy().to_string();
    debug!("[Storage] Database path: {}", db_path);
    Ok(db_path)
}

pub fn run_migrations(db_path: &str) -> Result<(), StorageError> {
    let mut conn = SqliteConnection::establish(db_path)?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    if !applied.is_empty() {
        info!("[Storage] Applied {} migration(s)", applied.len());
    }
    Ok(())
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>, StorageError> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(POOL_MAX_SIZE)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection, StorageError> {
    Ok(pool.get()?)
}
