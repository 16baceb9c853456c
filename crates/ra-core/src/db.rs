//! Database integration for task, annotation and export persistence.

use chrono::{DateTime, Utc};
use ra_local_db::{
    AnnotationStore, AnnotatorStore, Database, ExportRecord, ExportStore, ImageRecord, ImageStore,
    LeaseCutoffs, TaskStore, STATUS_COMPLETED,
};
use std::path::Path;

use crate::annotators::Annotator;
use crate::clock::to_db;
use crate::export::ExportEntry;
use crate::store::{StaleBefore, Store, TimeRange};
use crate::task::{
    Annotation, AnnotationId, AnnotatorId, ExportId, ImageId, Task, TaskId, TaskStatus,
};

/// SQLite-backed task store.
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    db: Database,
}

fn cutoffs(stale: &StaleBefore) -> LeaseCutoffs {
    LeaseCutoffs {
        lease_before: to_db(stale.lease),
        heartbeat_before: to_db(stale.heartbeat),
    }
}

fn tasks(rows: Vec<ra_local_db::TaskRow>) -> crate::Result<Vec<Task>> {
    rows.into_iter().map(Task::try_from).collect()
}

fn annotations(records: Vec<ra_local_db::AnnotationRecord>) -> crate::Result<Vec<Annotation>> {
    records.into_iter().map(Annotation::try_from).collect()
}

impl DatabaseManager {
    /// Create a new database manager with custom database path.
    pub fn with_path<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = Database::open(path)?;
        Ok(Self { db })
    }

    /// Create a database manager over a private in-memory database.
    pub fn in_memory() -> crate::Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    /// Create an image and its pending task together.
    pub fn create_image_task(
        &self,
        filename: &str,
        width: u32,
        height: u32,
        at: DateTime<Utc>,
    ) -> crate::Result<(ImageId, TaskId)> {
        let now = to_db(at);
        let (image_id, task_id) = self.db.transaction(|conn| {
            let image_id = ImageStore::new(conn).insert(&ImageRecord {
                id: 0, // Will be set by autoincrement
                filename: filename.to_string(),
                width: i64::from(width),
                height: i64::from(height),
                uploaded_at: now.clone(),
            })?;
            let task_id = TaskStore::new(conn).insert(image_id, &now)?;
            Ok((image_id, task_id))
        })?;
        Ok((ImageId(image_id), TaskId(task_id)))
    }

    /// Whether an image row already uses `filename`.
    pub fn filename_exists(&self, filename: &str) -> crate::Result<bool> {
        Ok(self
            .db
            .with_connection(|conn| ImageStore::new(conn).filename_exists(filename))?)
    }

    /// List tasks newest first.
    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> crate::Result<Vec<Task>> {
        let status = status.map(|s| s.as_str());
        let rows = self
            .db
            .with_connection(|conn| TaskStore::new(conn).list(status, limit, offset))?;
        tasks(rows)
    }

    pub fn count_tasks(&self, status: Option<TaskStatus>) -> crate::Result<i64> {
        let status = status.map(|s| s.as_str());
        Ok(self
            .db
            .with_connection(|conn| TaskStore::new(conn).count(status))?)
    }

    /// Delete a task with its annotations and image row. Returns the deleted task.
    pub fn delete_task(&self, id: TaskId) -> crate::Result<Option<Task>> {
        let row = self.db.transaction(|conn| {
            let store = TaskStore::new(conn);
            let Some(row) = store.get(id.0)? else {
                return Ok(None);
            };
            AnnotationStore::new(conn).delete_for_task(id.0)?;
            store.delete(id.0)?;
            ImageStore::new(conn).delete(row.task.image_id)?;
            Ok(Some(row))
        })?;
        row.map(Task::try_from).transpose()
    }

    /// Reset a task to unleased pending and drop all of its submissions.
    pub fn reset_with_annotations(&self, id: TaskId) -> crate::Result<Option<usize>> {
        Ok(self.db.transaction(|conn| {
            if TaskStore::new(conn).reset(id.0)? == 0 {
                return Ok(None);
            }
            Ok(Some(AnnotationStore::new(conn).delete_for_task(id.0)?))
        })?)
    }

    pub fn mark_unexported(&self, id: TaskId) -> crate::Result<bool> {
        let changed = self
            .db
            .with_connection(|conn| TaskStore::new(conn).mark_unexported(id.0))?;
        Ok(changed > 0)
    }

    /// Insert an annotator unless the username is taken.
    pub fn create_annotator(
        &self,
        username: &str,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> crate::Result<Option<AnnotatorId>> {
        let now = to_db(at);
        let id = self.db.transaction(|conn| {
            let store = AnnotatorStore::new(conn);
            if store.get_by_username(username)?.is_some() {
                return Ok(None);
            }
            Ok(Some(store.insert(username, password_hash, &now)?))
        })?;
        Ok(id.map(AnnotatorId))
    }

    pub fn annotator_by_username(&self, username: &str) -> crate::Result<Option<Annotator>> {
        let record = self
            .db
            .with_connection(|conn| AnnotatorStore::new(conn).get_by_username(username))?;
        record.map(Annotator::try_from).transpose()
    }

    pub fn list_exports(&self) -> crate::Result<Vec<ExportEntry>> {
        let records = self
            .db
            .with_connection(|conn| ExportStore::new(conn).list())?;
        records.into_iter().map(ExportEntry::try_from).collect()
    }

    pub fn get_export(&self, id: ExportId) -> crate::Result<Option<ExportEntry>> {
        let record = self
            .db
            .with_connection(|conn| ExportStore::new(conn).get(id.0))?;
        record.map(ExportEntry::try_from).transpose()
    }

    pub fn delete_export_record(&self, id: ExportId) -> crate::Result<bool> {
        let changed = self
            .db
            .with_connection(|conn| ExportStore::new(conn).delete(id.0))?;
        Ok(changed > 0)
    }
}

impl Store for DatabaseManager {
    fn annotator_exists(&self, annotator: AnnotatorId) -> crate::Result<bool> {
        let record = self
            .db
            .with_connection(|conn| AnnotatorStore::new(conn).get(annotator.0))?;
        Ok(record.is_some())
    }

    fn get_task(&self, id: TaskId) -> crate::Result<Option<Task>> {
        let row = self
            .db
            .with_connection(|conn| TaskStore::new(conn).get(id.0))?;
        row.map(Task::try_from).transpose()
    }

    fn held_task(&self, annotator: AnnotatorId) -> crate::Result<Option<Task>> {
        let row = self
            .db
            .with_connection(|conn| TaskStore::new(conn).held_by(annotator.0))?;
        row.map(Task::try_from).transpose()
    }

    fn random_lease_candidate(&self, stale: &StaleBefore) -> crate::Result<Option<TaskId>> {
        let cutoffs = cutoffs(stale);
        let id = self
            .db
            .with_connection(|conn| TaskStore::new(conn).random_lease_candidate(&cutoffs))?;
        Ok(id.map(TaskId))
    }

    fn try_assign(
        &self,
        id: TaskId,
        annotator: AnnotatorId,
        now: DateTime<Utc>,
        stale: &StaleBefore,
    ) -> crate::Result<bool> {
        let cutoffs = cutoffs(stale);
        let now = to_db(now);
        Ok(self.db.with_connection(|conn| {
            TaskStore::new(conn).try_assign(id.0, annotator.0, &now, &cutoffs)
        })?)
    }

    fn touch_heartbeat(&self, annotator: AnnotatorId, now: DateTime<Utc>) -> crate::Result<bool> {
        let now = to_db(now);
        let changed = self
            .db
            .with_connection(|conn| AnnotatorStore::new(conn).touch_heartbeat(annotator.0, &now))?;
        Ok(changed > 0)
    }

    fn release_lease(&self, id: TaskId) -> crate::Result<bool> {
        let changed = self
            .db
            .with_connection(|conn| TaskStore::new(conn).release(id.0))?;
        Ok(changed > 0)
    }

    fn release_all_leases(&self, annotator: AnnotatorId) -> crate::Result<usize> {
        Ok(self
            .db
            .with_connection(|conn| TaskStore::new(conn).release_all(annotator.0))?)
    }

    fn complete_task(&self, id: TaskId, at: DateTime<Utc>) -> crate::Result<bool> {
        let at = to_db(at);
        let changed = self
            .db
            .with_connection(|conn| TaskStore::new(conn).complete(id.0, &at))?;
        Ok(changed > 0)
    }

    fn complete_held_task(
        &self,
        id: TaskId,
        annotator: AnnotatorId,
        at: DateTime<Utc>,
    ) -> crate::Result<bool> {
        let at = to_db(at);
        let changed = self
            .db
            .with_connection(|conn| TaskStore::new(conn).complete_held(id.0, annotator.0, &at))?;
        Ok(changed > 0)
    }

    fn reset_task(&self, id: TaskId) -> crate::Result<bool> {
        let changed = self
            .db
            .with_connection(|conn| TaskStore::new(conn).reset(id.0))?;
        Ok(changed > 0)
    }

    fn insert_annotation(
        &self,
        annotator: Option<AnnotatorId>,
        task: Option<TaskId>,
        content: &str,
        at: DateTime<Utc>,
    ) -> crate::Result<AnnotationId> {
        let at = to_db(at);
        let id = self.db.with_connection(|conn| {
            AnnotationStore::new(conn).insert(
                annotator.map(|a| a.0),
                task.map(|t| t.0),
                content,
                &at,
            )
        })?;
        Ok(AnnotationId(id))
    }

    fn record_submission(
        &self,
        annotator: AnnotatorId,
        task: TaskId,
        content: &str,
        at: DateTime<Utc>,
    ) -> crate::Result<Option<AnnotationId>> {
        let at = to_db(at);
        let id = self.db.transaction(|conn| {
            let tasks = TaskStore::new(conn);
            if tasks.complete_held(task.0, annotator.0, &at)? == 0 {
                let completed = tasks
                    .get(task.0)?
                    .is_some_and(|row| row.task.status == STATUS_COMPLETED);
                if !completed {
                    return Ok(None);
                }
            }
            let id = AnnotationStore::new(conn).insert(Some(annotator.0), Some(task.0), content, &at)?;
            Ok(Some(id))
        })?;
        Ok(id.map(AnnotationId))
    }

    fn annotations_for_task(&self, task: TaskId) -> crate::Result<Vec<Annotation>> {
        let records = self
            .db
            .with_connection(|conn| AnnotationStore::new(conn).for_task(task.0))?;
        annotations(records)
    }

    fn annotations_by_annotator(
        &self,
        annotator: AnnotatorId,
        limit: Option<usize>,
    ) -> crate::Result<Vec<Annotation>> {
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let records = self
            .db
            .with_connection(|conn| AnnotationStore::new(conn).by_annotator(annotator.0, limit))?;
        annotations(records)
    }

    fn completed_tasks_in_range(
        &self,
        range: &TimeRange,
        only_unexported: bool,
    ) -> crate::Result<Vec<Task>> {
        let start = range.start.map(to_db);
        let end = range.end.map(to_db);
        let rows = self.db.with_connection(|conn| {
            TaskStore::new(conn).completed_in_range(start.as_deref(), end.as_deref(), only_unexported)
        })?;
        tasks(rows)
    }

    fn mark_exported(&self, ids: &[TaskId]) -> crate::Result<usize> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        Ok(self
            .db
            .with_connection(|conn| TaskStore::new(conn).mark_exported(&ids))?)
    }

    fn record_export(
        &self,
        filename: &str,
        archive_path: &Path,
        task_count: usize,
        at: DateTime<Utc>,
    ) -> crate::Result<ExportId> {
        let record = ExportRecord {
            id: 0, // Will be set by autoincrement
            filename: filename.to_string(),
            archive_path: archive_path.to_string_lossy().to_string(),
            task_count: i64::try_from(task_count).unwrap_or(i64::MAX),
            created_at: to_db(at),
        };
        let id = self
            .db
            .with_connection(|conn| ExportStore::new(conn).insert(&record))?;
        Ok(ExportId(id))
    }
}
