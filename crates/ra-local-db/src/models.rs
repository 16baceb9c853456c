//! Database models and persistence operations.
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed precision, so
//! lexicographic comparison inside SQL matches chronological order. Callers
//! are responsible for formatting them consistently.

use rusqlite::{named_params, params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::schema::{STATUS_COMPLETED, STATUS_PENDING};

/// Database model for source images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub filename: String,
    pub width: i64,
    pub height: i64,
    pub uploaded_at: String,
}

/// Database model for annotation tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub image_id: i64,
    pub status: String,
    pub exported: bool,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub assigned_to: Option<i64>,
    pub assigned_at: Option<String>,
}

/// A task joined with the image it annotates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub task: TaskRecord,
    pub filename: String,
    pub width: i64,
    pub height: i64,
}

/// Database model for submitted annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: i64,
    pub annotator_id: Option<i64>,
    pub task_id: Option<i64>,
    pub content: String,
    pub created_at: String,
}

/// Database model for annotator accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatorRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub last_heartbeat: Option<String>,
    pub created_at: String,
}

/// Database model for produced export archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: i64,
    pub filename: String,
    pub archive_path: String,
    pub task_count: i64,
    pub created_at: String,
}

/// Timestamps before which a lease, or its holder's heartbeat, counts as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseCutoffs {
    /// Leases granted before this instant have expired.
    pub lease_before: String,
    /// Holders whose last heartbeat is before this instant are considered gone.
    pub heartbeat_before: String,
}

const TASK_ROW_SELECT: &str = r#"
    SELECT t.id, t.image_id, t.status, t.exported, t.created_at, t.completed_at,
           t.assigned_to, t.assigned_at, i.filename, i.width, i.height
    FROM annotation_tasks t
    JOIN images i ON t.image_id = i.id
"#;

// A pending task may be (re)assigned when it is unleased, its lease expired,
// or its holder stopped sending heartbeats. Holders that never sent one are
// governed by lease age alone.
const RECLAIMABLE: &str = r#"
    (assigned_to IS NULL
     OR assigned_at < :lease_before
     OR assigned_to IN (
         SELECT id FROM annotators
         WHERE last_heartbeat IS NOT NULL AND last_heartbeat < :heartbeat_before
     ))
"#;

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        task: TaskRecord {
            id: row.get(0)?,
            image_id: row.get(1)?,
            status: row.get(2)?,
            exported: row.get(3)?,
            created_at: row.get(4)?,
            completed_at: row.get(5)?,
            assigned_to: row.get(6)?,
            assigned_at: row.get(7)?,
        },
        filename: row.get(8)?,
        width: row.get(9)?,
        height: row.get(10)?,
    })
}

fn annotation_record(row: &Row<'_>) -> rusqlite::Result<AnnotationRecord> {
    Ok(AnnotationRecord {
        id: row.get(0)?,
        annotator_id: row.get(1)?,
        task_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn annotator_record(row: &Row<'_>) -> rusqlite::Result<AnnotatorRecord> {
    Ok(AnnotatorRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        last_heartbeat: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn export_record(row: &Row<'_>) -> rusqlite::Result<ExportRecord> {
    Ok(ExportRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        archive_path: row.get(2)?,
        task_count: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Database operations for images.
pub struct ImageStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> ImageStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, record: &ImageRecord) -> crate::Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO images (filename, width, height, uploaded_at)
            VALUES (?, ?, ?, ?)
            "#,
            params![
                record.filename,
                record.width,
                record.height,
                record.uploaded_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> crate::Result<Option<ImageRecord>> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT id, filename, width, height, uploaded_at
                FROM images WHERE id = ?
                "#,
                params![id],
                |row| {
                    Ok(ImageRecord {
                        id: row.get(0)?,
                        filename: row.get(1)?,
                        width: row.get(2)?,
                        height: row.get(3)?,
                        uploaded_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Check whether any image row already uses `filename`.
    pub fn filename_exists(&self, filename: &str) -> crate::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE filename = ?",
            params![filename],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn delete(&self, id: i64) -> crate::Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM images WHERE id = ?", params![id])?)
    }
}

/// Database operations for annotation tasks.
pub struct TaskStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TaskStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Insert a new pending, unleased task for an image.
    pub fn insert(&self, image_id: i64, created_at: &str) -> crate::Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO annotation_tasks (image_id, status, exported, created_at)
            VALUES (?, ?, 0, ?)
            "#,
            params![image_id, STATUS_PENDING, created_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> crate::Result<Option<TaskRow>> {
        let sql = format!("{TASK_ROW_SELECT} WHERE t.id = ?");
        Ok(self.conn.query_row(&sql, params![id], task_row).optional()?)
    }

    /// List tasks newest first, optionally restricted to one status.
    pub fn list(&self, status: Option<&str>, limit: i64, offset: i64) -> crate::Result<Vec<TaskRow>> {
        let sql = format!(
            "{TASK_ROW_SELECT} WHERE (?1 IS NULL OR t.status = ?1) ORDER BY t.id DESC LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status, limit, offset], task_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self, status: Option<&str>) -> crate::Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM annotation_tasks WHERE (?1 IS NULL OR status = ?1)",
            params![status],
            |row| row.get(0),
        )?)
    }

    /// The pending task currently leased to `annotator_id`, if any.
    pub fn held_by(&self, annotator_id: i64) -> crate::Result<Option<TaskRow>> {
        let sql = format!(
            "{TASK_ROW_SELECT} WHERE t.status = ? AND t.assigned_to = ? ORDER BY t.assigned_at DESC, t.id DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![STATUS_PENDING, annotator_id], task_row)
            .optional()?)
    }

    /// Pick one reclaimable pending task uniformly at random.
    pub fn random_lease_candidate(&self, cutoffs: &LeaseCutoffs) -> crate::Result<Option<i64>> {
        let sql = format!(
            "SELECT id FROM annotation_tasks WHERE status = :pending AND {RECLAIMABLE} ORDER BY RANDOM() LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                named_params! {
                    ":pending": STATUS_PENDING,
                    ":lease_before": cutoffs.lease_before,
                    ":heartbeat_before": cutoffs.heartbeat_before,
                },
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Assign the lease in a single conditional write.
    ///
    /// Returns `false` when the task stopped being reclaimable between
    /// selection and this write, i.e. another caller won the race.
    pub fn try_assign(
        &self,
        id: i64,
        annotator_id: i64,
        assigned_at: &str,
        cutoffs: &LeaseCutoffs,
    ) -> crate::Result<bool> {
        let sql = format!(
            r#"
            UPDATE annotation_tasks
            SET assigned_to = :annotator, assigned_at = :now
            WHERE id = :id AND status = :pending AND {RECLAIMABLE}
            "#
        );
        let changed = self.conn.execute(
            &sql,
            named_params! {
                ":annotator": annotator_id,
                ":now": assigned_at,
                ":id": id,
                ":pending": STATUS_PENDING,
                ":lease_before": cutoffs.lease_before,
                ":heartbeat_before": cutoffs.heartbeat_before,
            },
        )?;
        Ok(changed == 1)
    }

    pub fn release(&self, id: i64) -> crate::Result<usize> {
        Ok(self.conn.execute(
            "UPDATE annotation_tasks SET assigned_to = NULL, assigned_at = NULL WHERE id = ?",
            params![id],
        )?)
    }

    pub fn release_all(&self, annotator_id: i64) -> crate::Result<usize> {
        Ok(self.conn.execute(
            r#"
            UPDATE annotation_tasks SET assigned_to = NULL, assigned_at = NULL
            WHERE status = ? AND assigned_to = ?
            "#,
            params![STATUS_PENDING, annotator_id],
        )?)
    }

    /// Complete a pending task and drop its lease. Completed tasks are left untouched.
    pub fn complete(&self, id: i64, completed_at: &str) -> crate::Result<usize> {
        Ok(self.conn.execute(
            r#"
            UPDATE annotation_tasks
            SET status = ?, completed_at = ?, assigned_to = NULL, assigned_at = NULL
            WHERE id = ? AND status = ?
            "#,
            params![STATUS_COMPLETED, completed_at, id, STATUS_PENDING],
        )?)
    }

    /// Complete a pending task only if `annotator_id` currently holds its lease.
    pub fn complete_held(&self, id: i64, annotator_id: i64, completed_at: &str) -> crate::Result<usize> {
        Ok(self.conn.execute(
            r#"
            UPDATE annotation_tasks
            SET status = ?, completed_at = ?, assigned_to = NULL, assigned_at = NULL
            WHERE id = ? AND status = ? AND assigned_to = ?
            "#,
            params![STATUS_COMPLETED, completed_at, id, STATUS_PENDING, annotator_id],
        )?)
    }

    /// Return a task to pending with no completion time and no lease.
    pub fn reset(&self, id: i64) -> crate::Result<usize> {
        Ok(self.conn.execute(
            r#"
            UPDATE annotation_tasks
            SET status = ?, completed_at = NULL, assigned_to = NULL, assigned_at = NULL
            WHERE id = ?
            "#,
            params![STATUS_PENDING, id],
        )?)
    }

    /// Completed tasks whose completion time lies in `[start, end]`, oldest first.
    pub fn completed_in_range(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        only_unexported: bool,
    ) -> crate::Result<Vec<TaskRow>> {
        let sql = format!(
            r#"{TASK_ROW_SELECT}
            WHERE t.status = :completed
              AND (:start IS NULL OR t.completed_at >= :start)
              AND (:end IS NULL OR t.completed_at <= :end)
              AND (:only_unexported = 0 OR t.exported = 0)
            ORDER BY t.completed_at ASC, t.id ASC"#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            named_params! {
                ":completed": STATUS_COMPLETED,
                ":start": start,
                ":end": end,
                ":only_unexported": only_unexported,
            },
            task_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Flag every listed task as exported in one statement.
    pub fn mark_exported(&self, ids: &[i64]) -> crate::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("UPDATE annotation_tasks SET exported = 1 WHERE id IN ({placeholders})");
        Ok(self.conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    pub fn mark_unexported(&self, id: i64) -> crate::Result<usize> {
        Ok(self.conn.execute(
            "UPDATE annotation_tasks SET exported = 0 WHERE id = ?",
            params![id],
        )?)
    }

    pub fn delete(&self, id: i64) -> crate::Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM annotation_tasks WHERE id = ?", params![id])?)
    }
}

/// Database operations for annotations.
pub struct AnnotationStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> AnnotationStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Insert a submission. `task_id` is kept only if it names an existing task.
    pub fn insert(
        &self,
        annotator_id: Option<i64>,
        task_id: Option<i64>,
        content: &str,
        created_at: &str,
    ) -> crate::Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO annotations (annotator_id, task_id, content, created_at)
            VALUES (?1, (SELECT id FROM annotation_tasks WHERE id = ?2), ?3, ?4)
            "#,
            params![annotator_id, task_id, content, created_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Every submission for a task, oldest first.
    pub fn for_task(&self, task_id: i64) -> crate::Result<Vec<AnnotationRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, annotator_id, task_id, content, created_at
            FROM annotations WHERE task_id = ?
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![task_id], annotation_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Submissions by an annotator, newest first. `None` means no limit.
    pub fn by_annotator(
        &self,
        annotator_id: i64,
        limit: Option<i64>,
    ) -> crate::Result<Vec<AnnotationRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, annotator_id, task_id, content, created_at
            FROM annotations WHERE annotator_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;
        // SQLite treats a negative LIMIT as unbounded.
        let rows = stmt.query_map(params![annotator_id, limit.unwrap_or(-1)], annotation_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_for_task(&self, task_id: i64) -> crate::Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM annotations WHERE task_id = ?", params![task_id])?)
    }
}

/// Database operations for annotators.
pub struct AnnotatorStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> AnnotatorStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, username: &str, password_hash: &str, created_at: &str) -> crate::Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO annotators (username, password_hash, created_at)
            VALUES (?, ?, ?)
            "#,
            params![username, password_hash, created_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> crate::Result<Option<AnnotatorRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, username, password_hash, last_heartbeat, created_at
                FROM annotators WHERE id = ?
                "#,
                params![id],
                annotator_record,
            )
            .optional()?)
    }

    pub fn get_by_username(&self, username: &str) -> crate::Result<Option<AnnotatorRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, username, password_hash, last_heartbeat, created_at
                FROM annotators WHERE username = ?
                "#,
                params![username],
                annotator_record,
            )
            .optional()?)
    }

    pub fn touch_heartbeat(&self, id: i64, at: &str) -> crate::Result<usize> {
        Ok(self.conn.execute(
            "UPDATE annotators SET last_heartbeat = ? WHERE id = ?",
            params![at, id],
        )?)
    }
}

/// Database operations for export records.
pub struct ExportStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> ExportStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, record: &ExportRecord) -> crate::Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO exports (filename, archive_path, task_count, created_at)
            VALUES (?, ?, ?, ?)
            "#,
            params![
                record.filename,
                record.archive_path,
                record.task_count,
                record.created_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> crate::Result<Option<ExportRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, filename, archive_path, task_count, created_at
                FROM exports WHERE id = ?
                "#,
                params![id],
                export_record,
            )
            .optional()?)
    }

    /// All export records, newest first.
    pub fn list(&self) -> crate::Result<Vec<ExportRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, filename, archive_path, task_count, created_at
            FROM exports ORDER BY id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![], export_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete(&self, id: i64) -> crate::Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM exports WHERE id = ?", params![id])?)
    }
}
