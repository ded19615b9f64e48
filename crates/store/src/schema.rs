//! SQLite schema for the history store

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create the complete v1 schema
///
/// Includes:
/// - Schema version tracking table
/// - `messages` table holding one row per conversation message
/// - Per-scope `(scope, created_at)` indexes backing backward pagination
pub const SCHEMA_SQL: &str = include_str!("schema.sql");
