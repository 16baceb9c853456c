//! Operator views and maintenance of tasks and export records.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::db::DatabaseManager;
use crate::export::ExportEntry;
use crate::store::Store;
use crate::task::{Annotation, ExportId, Task, TaskId, TaskStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    /// Every submission for the task, oldest first.
    pub annotations: Vec<Annotation>,
}

pub struct Admin {
    db: DatabaseManager,
    uploads_dir: PathBuf,
}

impl Admin {
    pub fn new(db: DatabaseManager, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            uploads_dir: uploads_dir.into(),
        }
    }

    /// One page of tasks, newest first. Pages start at 1; zero values are raised to 1.
    pub fn list_tasks(
        &self,
        page: u32,
        page_size: u32,
        status: Option<TaskStatus>,
    ) -> crate::Result<TaskPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);
        let tasks = self.db.list_tasks(status, i64::from(page_size), offset)?;
        let total = self.db.count_tasks(status)?;
        let size = i64::from(page_size);
        Ok(TaskPage {
            tasks,
            page,
            page_size,
            total,
            total_pages: (total + size - 1) / size,
        })
    }

    pub fn task_detail(&self, id: TaskId) -> crate::Result<TaskDetail> {
        let task = self
            .db
            .get_task(id)?
            .ok_or_else(|| crate::Error::not_found(format!("task {}", id)))?;
        let annotations = self.db.annotations_for_task(id)?;
        Ok(TaskDetail { task, annotations })
    }

    /// Delete a task, its annotations and image, then its uploaded file if present.
    pub fn delete_task(&self, id: TaskId) -> crate::Result<Task> {
        let task = self
            .db
            .delete_task(id)?
            .ok_or_else(|| crate::Error::not_found(format!("task {}", id)))?;

        let path = self.uploads_dir.join(&task.image.filename);
        match fs::remove_file(&path) {
            Ok(()) => debug!(task_id = %id, "Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(task_id = %id, "Failed to remove {}: {}", path.display(), e),
        }
        info!(task_id = %id, "Task deleted");
        Ok(task)
    }

    /// Reset a task to unleased pending. Unless `keep_annotations`, its submissions are dropped too.
    ///
    /// Returns the number of deleted annotations.
    pub fn reset_task(&self, id: TaskId, keep_annotations: bool) -> crate::Result<usize> {
        let not_found = || crate::Error::not_found(format!("task {}", id));
        let deleted = if keep_annotations {
            if !self.db.reset_task(id)? {
                return Err(not_found());
            }
            0
        } else {
            self.db.reset_with_annotations(id)?.ok_or_else(not_found)?
        };
        info!(task_id = %id, deleted_annotations = deleted, "Task reset");
        Ok(deleted)
    }

    /// Clear the exported flag so the next unexported-only export picks the task up again.
    pub fn unexport_task(&self, id: TaskId) -> crate::Result<()> {
        if !self.db.mark_unexported(id)? {
            return Err(crate::Error::not_found(format!("task {}", id)));
        }
        Ok(())
    }

    pub fn list_exports(&self) -> crate::Result<Vec<ExportEntry>> {
        self.db.list_exports()
    }

    /// Delete an export record and its archive. A missing archive is not an error.
    pub fn delete_export(&self, id: ExportId) -> crate::Result<ExportEntry> {
        let entry = self
            .db
            .get_export(id)?
            .ok_or_else(|| crate::Error::not_found(format!("export {}", id)))?;

        match fs::remove_file(&entry.archive_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(export_id = %id, "Archive {} already gone", entry.archive_path.display());
            }
            Err(e) => return Err(e.into()),
        }
        self.db.delete_export_record(id)?;
        info!(export_id = %id, "Export deleted");
        Ok(entry)
    }
}
