//! Open project DB with WAL and migrations.

use anyhow::{Context, Result};
use std::path::Path;

use super::layout;
use super::migrations;

/// Opens the DB at a given project dir (e.g. ~/.orbit or repo_root/.orbit).
/// Creates dirs if needed, enables WAL, runs migrations.
pub fn open_db_at(orbit_dir: &Path) -> Result<rusqlite::Connection> {
    let db_path = layout::ensure_orbit_dir_at(orbit_dir)?;
    let conn = rusqlite::Connection::open(&db_path).context("open orbit.db")?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    migrations::run_all(&conn)?;
    Ok(conn)
}

/// Opens the project DB (creates .orbit/logs/commands if needed), enables WAL, runs migrations.
pub fn open_db(repo_root: &Path) -> Result<rusqlite::Connection> {
    open_db_at(&repo_root.join(".orbit"))
}
