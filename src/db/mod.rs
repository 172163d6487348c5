//! Database layer for bitable-dl
//!
//! SQLite persistence for the config store: the user-editable source settings
//! and the download history list live side by side in one key/value table.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`settings`] - Key/value settings and the persisted history list

use sqlx::sqlite::SqlitePool;

mod migrations;
mod settings;

/// Database handle for bitable-dl
pub struct Database {
    pool: SqlitePool,
}
