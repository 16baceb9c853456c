//! Database migration management.

use rusqlite::{params, Connection};

/// Database migration manager.
pub struct MigrationManager;

impl MigrationManager {
    /// Apply all pending migrations to the database.
    pub fn migrate(conn: &Connection) -> crate::Result<()> {
        // Create schema migrations table first
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            "#,
        )?;

        let current_version = Self::current_version(conn)?.unwrap_or(0);
        if current_version > crate::schema::SCHEMA_VERSION {
            return Err(crate::Error::migration(format!(
                "database schema version {} is newer than supported version {}",
                current_version,
                crate::schema::SCHEMA_VERSION
            )));
        }

        // Apply migrations sequentially
        if current_version < 1 {
            tracing::info!("Applying task store migration 1");
            Self::apply_migration_1(conn)?;
        }

        Ok(())
    }

    /// Apply migration version 1 - images, tasks, annotations, annotators, exports
    fn apply_migration_1(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            r#"
            -- Source images; one row per ingested file
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                uploaded_at TEXT NOT NULL
            );

            -- Annotator accounts; heartbeat is advisory liveness for lease reclamation
            CREATE TABLE IF NOT EXISTS annotators (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                last_heartbeat TEXT,
                created_at TEXT NOT NULL
            );

            -- Annotation tasks, 1:1 with images. A lease is both-or-neither.
            CREATE TABLE IF NOT EXISTS annotation_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'completed')),
                exported INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                assigned_to INTEGER REFERENCES annotators(id),
                assigned_at TEXT,
                CHECK ((assigned_to IS NULL) = (assigned_at IS NULL))
            );

            -- Submitted annotations; content is stored verbatim, task_id is extracted from it
            CREATE TABLE IF NOT EXISTS annotations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                annotator_id INTEGER REFERENCES annotators(id) ON DELETE SET NULL,
                task_id INTEGER REFERENCES annotation_tasks(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Append-only log of produced archives
            CREATE TABLE IF NOT EXISTS exports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                archive_path TEXT NOT NULL,
                task_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- Indexes for performance
            CREATE INDEX IF NOT EXISTS idx_tasks_status_assigned ON annotation_tasks(status, assigned_to);
            CREATE INDEX IF NOT EXISTS idx_tasks_status_completed ON annotation_tasks(status, completed_at);
            CREATE INDEX IF NOT EXISTS idx_annotations_task ON annotations(task_id, id);
            CREATE INDEX IF NOT EXISTS idx_annotations_annotator ON annotations(annotator_id, id);

            -- Mark migration as applied
            INSERT OR REPLACE INTO schema_migrations (version) VALUES (1);
            "#,
        )?;

        Ok(())
    }

    /// Get the current schema version.
    pub fn current_version(conn: &Connection) -> crate::Result<Option<u32>> {
        let mut stmt = conn.prepare("SELECT MAX(version) FROM schema_migrations")?;

        let version: Option<u32> = stmt.query_row(params![], |row| row.get(0))?;

        Ok(version)
    }
}
