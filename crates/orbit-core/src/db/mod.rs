//! Project SQLite DB under `.orbit/` (Crush-style layout).
//!
//! - `orbit.db` + WAL: main project DB (messages, sessions, config).
//! - `logs/`, `commands/`: directories for logs and command data.
//! - `env`: optional file synced from config table for `source .orbit/env`.

mod config;
mod connection;
mod layout;
mod messages;
mod migrations;
mod sessions;

pub use config::{get_config, get_config_value, set_config, sync_env_file};
pub use connection::{open_db, open_db_at};
pub use layout::{ensure_orbit_dir, ensure_orbit_dir_at, COMMANDS_DIR, ENV_FILE, ORBIT_DB, LOGS_DIR};
pub use messages::SqliteMessageStore;
pub use migrations::{run_all as run_migrations};
pub use sessions::SqliteSessionStore;
