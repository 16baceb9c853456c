//! Storage interface consumed by the lease coordinator, deduplicator and exporter.

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::task::{Annotation, AnnotationId, AnnotatorId, ExportId, Task, TaskId};

/// Instants before which a lease grant, or its holder's heartbeat, is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleBefore {
    pub lease: DateTime<Utc>,
    pub heartbeat: DateTime<Utc>,
}

/// Inclusive completion-time window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// A range with both bounds open.
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Task store reads and writes used by the core components.
///
/// Each call is independent. Implementations must make `try_assign` a single
/// conditional write so that concurrent callers cannot both win the same task.
pub trait Store: Send + Sync {
    fn annotator_exists(&self, annotator: AnnotatorId) -> crate::Result<bool>;

    fn get_task(&self, id: TaskId) -> crate::Result<Option<Task>>;

    /// The pending task currently leased to `annotator`, if any.
    fn held_task(&self, annotator: AnnotatorId) -> crate::Result<Option<Task>>;

    /// A uniformly random pending task that is unleased or stale.
    fn random_lease_candidate(&self, stale: &StaleBefore) -> crate::Result<Option<TaskId>>;

    /// Lease `id` to `annotator` if it is still reclaimable. `false` means the race was lost.
    fn try_assign(
        &self,
        id: TaskId,
        annotator: AnnotatorId,
        now: DateTime<Utc>,
        stale: &StaleBefore,
    ) -> crate::Result<bool>;

    /// Record a heartbeat. Returns `false` for an unknown annotator.
    fn touch_heartbeat(&self, annotator: AnnotatorId, now: DateTime<Utc>) -> crate::Result<bool>;

    /// Clear the lease on `id`. Returns `false` for an unknown task.
    fn release_lease(&self, id: TaskId) -> crate::Result<bool>;

    fn release_all_leases(&self, annotator: AnnotatorId) -> crate::Result<usize>;

    /// Complete a pending task. Returns `false` if nothing changed.
    fn complete_task(&self, id: TaskId, at: DateTime<Utc>) -> crate::Result<bool>;

    /// Complete a pending task only while `annotator` holds its lease.
    fn complete_held_task(
        &self,
        id: TaskId,
        annotator: AnnotatorId,
        at: DateTime<Utc>,
    ) -> crate::Result<bool>;

    /// Return a task to unleased pending. Returns `false` for an unknown task.
    fn reset_task(&self, id: TaskId) -> crate::Result<bool>;

    fn insert_annotation(
        &self,
        annotator: Option<AnnotatorId>,
        task: Option<TaskId>,
        content: &str,
        at: DateTime<Utc>,
    ) -> crate::Result<AnnotationId>;

    /// Store a submission and complete its task as `annotator` in one transaction.
    ///
    /// A pending task must be leased to `annotator`. A completed task takes the row and
    /// stays completed. Returns `None`, with nothing stored, when the lease is not held.
    fn record_submission(
        &self,
        annotator: AnnotatorId,
        task: TaskId,
        content: &str,
        at: DateTime<Utc>,
    ) -> crate::Result<Option<AnnotationId>>;

    /// Every submission for a task, newest last.
    fn annotations_for_task(&self, task: TaskId) -> crate::Result<Vec<Annotation>>;

    /// Submissions by an annotator, newest first. `None` scans them all.
    fn annotations_by_annotator(
        &self,
        annotator: AnnotatorId,
        limit: Option<usize>,
    ) -> crate::Result<Vec<Annotation>>;

    /// Completed tasks in `range`, oldest completion first.
    fn completed_tasks_in_range(
        &self,
        range: &TimeRange,
        only_unexported: bool,
    ) -> crate::Result<Vec<Task>>;

    fn mark_exported(&self, ids: &[TaskId]) -> crate::Result<usize>;

    fn record_export(
        &self,
        filename: &str,
        archive_path: &Path,
        task_count: usize,
        at: DateTime<Utc>,
    ) -> crate::Result<ExportId>;
}

