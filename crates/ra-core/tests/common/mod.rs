//! Shared fixtures for ra-core integration tests.
//!
//! A `TestEnv` owns a temporary Rock Annotator home with its own database,
//! upload directory and a manual clock starting at `start_time()`.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use image::{Rgb, RgbImage};
use ra_core::{
    Annotation, AnnotationId, AnnotatorAccounts, AnnotatorId, Clock, Config, DatabaseManager,
    Deduplicator, Error, ExportId, Exporter, LeaseCoordinator, ManualClock, StaleBefore, Store,
    Task, TaskId, TimeRange,
};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// Write a solid-colour image; the format follows the file extension.
pub fn write_image(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb([120, 110, 100]))
        .save(path)
        .expect("Failed to write fixture image");
}

/// Submission content with one square polygon per label.
pub fn square_content(task: TaskId, labels: &[&str]) -> String {
    let polygons: Vec<serde_json::Value> = labels
        .iter()
        .map(|label| {
            serde_json::json!({
                "tag": label,
                "points": [
                    {"x": 10, "y": 10},
                    {"x": 20, "y": 10},
                    {"x": 20, "y": 20},
                    {"x": 10, "y": 20}
                ]
            })
        })
        .collect();
    serde_json::json!({ "taskId": task.0, "polygons": polygons }).to_string()
}

pub struct TestEnv {
    pub config: Config,
    pub db: DatabaseManager,
    pub store: Arc<dyn Store>,
    pub clock: Arc<ManualClock>,
    _temp_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = Config::from_home(temp_dir.path().join("home"));
        config.ensure_dirs().expect("Failed to create home layout");
        let db = config.open_database().expect("Failed to open database");
        Self {
            store: Arc::new(db.clone()),
            db,
            config,
            clock: Arc::new(ManualClock::new(start_time())),
            _temp_dir: temp_dir,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn coordinator(&self) -> LeaseCoordinator {
        LeaseCoordinator::new(self.store.clone(), self.clock())
    }

    pub fn dedup(&self) -> Deduplicator {
        Deduplicator::new(self.store.clone())
    }

    pub fn exporter(&self) -> Exporter {
        Exporter::new(self.store.clone(), self.clock(), self.config.export_settings())
    }

    pub fn accounts(&self) -> AnnotatorAccounts {
        AnnotatorAccounts::new(self.db.clone(), self.clock())
    }

    pub fn annotator(&self, username: &str) -> AnnotatorId {
        self.accounts()
            .create(username, "secret")
            .expect("Failed to create annotator")
    }

    /// A pending task whose source file exists in the uploads directory.
    pub fn task_with_image(&self, filename: &str, width: u32, height: u32) -> TaskId {
        write_image(&self.config.uploads_dir.join(filename), width, height);
        self.task_without_file(filename, width, height)
    }

    /// A pending task whose source file is missing.
    pub fn task_without_file(&self, filename: &str, width: u32, height: u32) -> TaskId {
        let (_, task_id) = self
            .db
            .create_image_task(filename, width, height, self.clock.now())
            .expect("Failed to create task");
        task_id
    }

    /// Store a submission directly, bypassing lease checks.
    pub fn record_annotation(&self, annotator: AnnotatorId, task: TaskId, content: &str) {
        self.store
            .insert_annotation(Some(annotator), Some(task), content, self.clock.now())
            .expect("Failed to store annotation");
    }

    /// A completed task with one annotation carrying `labels`.
    pub fn completed_task(&self, annotator: AnnotatorId, filename: &str, labels: &[&str]) -> TaskId {
        let task = self.task_with_image(filename, 30, 30);
        self.record_annotation(annotator, task, &square_content(task, labels));
        self.coordinator()
            .complete(task)
            .expect("Failed to complete task");
        task
    }
}

type SubmissionHook = Box<dyn Fn(&DatabaseManager, TaskId) + Send + Sync>;

/// Forwards to a real database, with optional interference at fixed points.
pub struct HookedStore {
    pub inner: DatabaseManager,
    /// Runs just before a submission is recorded.
    pub before_submission: Option<SubmissionHook>,
    pub fail_mark_exported: bool,
}

impl HookedStore {
    pub fn new(inner: DatabaseManager) -> Self {
        Self {
            inner,
            before_submission: None,
            fail_mark_exported: false,
        }
    }
}

impl Store for HookedStore {
    fn annotator_exists(&self, annotator: AnnotatorId) -> ra_core::Result<bool> {
        self.inner.annotator_exists(annotator)
    }
    fn get_task(&self, id: TaskId) -> ra_core::Result<Option<Task>> {
        self.inner.get_task(id)
    }
    fn held_task(&self, annotator: AnnotatorId) -> ra_core::Result<Option<Task>> {
        self.inner.held_task(annotator)
    }
    fn random_lease_candidate(&self, stale: &StaleBefore) -> ra_core::Result<Option<TaskId>> {
        self.inner.random_lease_candidate(stale)
    }
    fn try_assign(
        &self,
        task: TaskId,
        annotator: AnnotatorId,
        at: DateTime<Utc>,
        stale: &StaleBefore,
    ) -> ra_core::Result<bool> {
        self.inner.try_assign(task, annotator, at, stale)
    }
    fn touch_heartbeat(&self, annotator: AnnotatorId, at: DateTime<Utc>) -> ra_core::Result<bool> {
        self.inner.touch_heartbeat(annotator, at)
    }
    fn release_lease(&self, task: TaskId) -> ra_core::Result<bool> {
        self.inner.release_lease(task)
    }
    fn release_all_leases(&self, annotator: AnnotatorId) -> ra_core::Result<usize> {
        self.inner.release_all_leases(annotator)
    }
    fn complete_task(&self, task: TaskId, at: DateTime<Utc>) -> ra_core::Result<bool> {
        self.inner.complete_task(task, at)
    }
    fn complete_held_task(
        &self,
        task: TaskId,
        annotator: AnnotatorId,
        at: DateTime<Utc>,
    ) -> ra_core::Result<bool> {
        self.inner.complete_held_task(task, annotator, at)
    }
    fn reset_task(&self, task: TaskId) -> ra_core::Result<bool> {
        self.inner.reset_task(task)
    }
    fn insert_annotation(
        &self,
        annotator: Option<AnnotatorId>,
        task: Option<TaskId>,
        content: &str,
        at: DateTime<Utc>,
    ) -> ra_core::Result<AnnotationId> {
        self.inner.insert_annotation(annotator, task, content, at)
    }
    fn record_submission(
        &self,
        annotator: AnnotatorId,
        task: TaskId,
        content: &str,
        at: DateTime<Utc>,
    ) -> ra_core::Result<Option<AnnotationId>> {
        if let Some(hook) = &self.before_submission {
            hook(&self.inner, task);
        }
        self.inner.record_submission(annotator, task, content, at)
    }
    fn annotations_for_task(&self, task: TaskId) -> ra_core::Result<Vec<Annotation>> {
        self.inner.annotations_for_task(task)
    }
    fn annotations_by_annotator(
        &self,
        annotator: AnnotatorId,
        limit: Option<usize>,
    ) -> ra_core::Result<Vec<Annotation>> {
        self.inner.annotations_by_annotator(annotator, limit)
    }
    fn completed_tasks_in_range(
        &self,
        range: &TimeRange,
        only_unexported: bool,
    ) -> ra_core::Result<Vec<Task>> {
        self.inner.completed_tasks_in_range(range, only_unexported)
    }
    fn mark_exported(&self, ids: &[TaskId]) -> ra_core::Result<usize> {
        if self.fail_mark_exported {
            return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "disk I/O error")));
        }
        self.inner.mark_exported(ids)
    }
    fn record_export(
        &self,
        filename: &str,
        archive_path: &Path,
        task_count: usize,
        at: DateTime<Utc>,
    ) -> ra_core::Result<ExportId> {
        self.inner.record_export(filename, archive_path, task_count, at)
    }
}
