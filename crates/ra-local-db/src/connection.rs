//! Database connection management.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Database connection wrapper shared across the coordinator and exporter.
#[derive(Debug, Clone)]
pub struct Database {
    connection: Arc<std::sync::Mutex<Connection>>,
}

/// Resolve the Rock Annotator home directory.
///
/// Priority order:
/// 1. RA_HOME environment variable (custom)
/// 2. Platform-specific defaults:
///    - Linux: `${XDG_STATE_HOME:-~/.local/state}/rock-annotator`
///    - macOS: `~/Library/Application Support/rock-annotator`
///    - Windows: `%LOCALAPPDATA%\rock-annotator`
pub fn default_home() -> crate::Result<PathBuf> {
    if let Ok(ra_home) = std::env::var("RA_HOME") {
        return Ok(PathBuf::from(ra_home));
    }

    let home = || {
        std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| crate::Error::generic("HOME environment variable not set"))
    };

    #[cfg(target_os = "linux")]
    {
        let xdg_state_home = match std::env::var("XDG_STATE_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => home()?.join(".local").join("state"),
        };
        Ok(xdg_state_home.join("rock-annotator"))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(home()?
            .join("Library")
            .join("Application Support")
            .join("rock-annotator"))
    }

    #[cfg(target_os = "windows")]
    {
        let local_appdata = std::env::var("LOCALAPPDATA")
            .map_err(|_| crate::Error::generic("LOCALAPPDATA environment variable not set"))?;
        Ok(PathBuf::from(local_appdata).join("rock-annotator"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Ok(home()?.join(".rock-annotator"))
    }
}

impl Database {
    /// Open a new database connection at the specified path.
    ///
    /// If the path doesn't exist, the database and its parent directory will be created.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Initialize the database schema.
    fn initialize_schema(conn: &Connection) -> crate::Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Apply migrations to bring schema up to date
        crate::migrations::MigrationManager::migrate(conn)?;

        Ok(())
    }

    /// Run `f` against the connection without opening a transaction.
    ///
    /// The lock is held for the whole call, so a read-then-write sequence inside `f` is not interleaved.
    pub fn with_connection<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        let conn = self.connection.lock().map_err(|e| {
            crate::Error::generic(format!("Failed to acquire database lock: {}", e))
        })?;
        f(&conn)
    }

    /// Execute a transaction with automatic rollback on error.
    pub fn transaction<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        let conn = self.connection.lock().map_err(|e| {
            crate::Error::generic(format!("Failed to acquire database lock: {}", e))
        })?;

        let tx = conn.unchecked_transaction()?;
        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }
}
