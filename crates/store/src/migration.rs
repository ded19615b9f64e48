//! Schema migration logic for the history store
//!
//! Tracks applied migrations and applies pending ones up to the current schema version.

use crate::error::{Error, Result};
use crate::schema::{SCHEMA_SQL, SCHEMA_VERSION};
use rusqlite::Connection;
use tracing::{debug, info, trace};

/// Manages schema migrations for the history store
pub struct MigrationManager;

impl MigrationManager {
    /// Get the current schema version from the database
    ///
    /// Returns 0 if the schema_version table doesn't exist or is empty.
    pub fn get_current_version(conn: &Connection) -> Result<i32> {
        let table_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(format!("Failed to check schema_version table: {e}")))?;

        if !table_exists {
            trace!("schema_version table does not exist, returning version 0");
            return Ok(0);
        }

        let version: Option<i32> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .map_err(|e| Error::database(format!("Failed to query schema version: {e}")))?;

        Ok(version.unwrap_or(0))
    }

    /// Apply pending migrations up to SCHEMA_VERSION
    ///
    /// Idempotent. A database newer than this build is rejected.
    pub fn migrate(conn: &Connection) -> Result<()> {
        let current_version = Self::get_current_version(conn)?;
        debug!("Current schema version: {}, target: {}", current_version, SCHEMA_VERSION);

        if current_version > SCHEMA_VERSION {
            return Err(Error::database(format!(
                "database schema version {current_version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }

        if current_version == SCHEMA_VERSION {
            trace!("Schema is up to date, no migration needed");
            return Ok(());
        }

        info!("Migrating schema from version {} to {}", current_version, SCHEMA_VERSION);

        if current_version == 0 {
            Self::apply_v1_migration(conn)?;
        }

        info!("Schema migration complete");
        Ok(())
    }

    fn apply_v1_migration(conn: &Connection) -> Result<()> {
        debug!("Applying v1 migration");

        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::database(format!("Failed to apply v1 schema: {e}")))?;

        trace!("v1 migration applied successfully");
        Ok(())
    }
}
