//! `.orbit/` directory layout (Crush-style).
//!
//! - `orbit.db` + WAL: main project DB (edit history, config, task list).
//! - `logs/`, `commands/`: subdirs for logs and command data.
//! - 
//! - `env`: optional file synced from config table for `source .orbit/env`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Basename of the main project DB (SQLite creates .db-wal and .db-shm alongside).
pub const ORBIT_DB: &str = "orbit.db";
/// Env file under project dir (synced from config table).
pub const ENV_FILE: &str = "env";
/// Subdir for log files.
pub const LOGS_DIR: &str = "logs";
/// Subdir for command history / saved commands.
pub const COMMANDS_DIR: &str = "commands";

/// Ensures `orbit_dir`, `orbit_dir/logs`, `orbit_dir/commands` exist; returns path to orbit.db.
pub fn ensure_orbit_dir_at(orbit_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(orbit_dir).context("create project dir")?;
    std::fs::create_dir_all(orbit_dir.join(LOGS_DIR)).context("create logs dir")?;
    std::fs::create_dir_all(orbit_dir.join(COMMANDS_DIR)).context("create commands dir")?;
    Ok(orbit_dir.join(ORBIT_DB))
}

/// Ensures `.orbit`, `.orbit/logs`, `.orbit/commands` exist and returns path to orbit.db.
pub fn ensure_orbit_dir(repo_root: &Path) -> Result<PathBuf> {
    ensure_orbit_dir_at(&repo_root.join(".orbit"))
}
