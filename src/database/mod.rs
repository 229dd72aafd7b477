// Copyright 2023 Remi Bernotavicius

use crate::error::Result;
use diesel::prelude::Connection as _;
use diesel::RunQueryDsl as _;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::path::Path;

pub mod models;
pub mod schema;

pub type Connection = diesel::sqlite::SqliteConnection;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn establish_connection(path: impl AsRef<Path>) -> Result<Connection> {
    let url = path.as_ref().to_string_lossy();
    log::debug!("opening database at {url}");

    let mut connection = Connection::establish(&url)?;

    // Cascading deletes rely on this, SQLite leaves it off by default.
    diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut connection)?;

    let applied = connection.run_pending_migrations(MIGRATIONS)?;
    for version in applied {
        log::info!("applied migration {version}");
    }
    Ok(connection)
}

/// A fresh private database, used by the tests of every module.
#[cfg(test)]
pub fn in_memory() -> Connection {
    establish_connection(":memory:").unwrap()
}

#[test]
fn migrations() {
    let mut conn = in_memory();
    assert!(!conn.has_pending_migration(MIGRATIONS).unwrap());

    conn.revert_all_migrations(MIGRATIONS).unwrap();
    assert!(conn.has_pending_migration(MIGRATIONS).unwrap());

    conn.run_pending_migrations(MIGRATIONS).unwrap();
    assert!(!conn.has_pending_migration(MIGRATIONS).unwrap());
}

#[test]
fn foreign_keys_enforced() {
    use diesel::ExpressionMethods as _;
    use schema::favorites::dsl::*;

    let mut conn = in_memory();
    let result = diesel::insert_into(favorites)
        .values((user_id.eq(404), recipe_id.eq(404)))
        .execute(&mut conn);
    assert!(result.is_err());
}
