//! Tests for lease acquisition, expiry and task completion.

mod common;

use chrono::{DateTime, Duration, Utc};
use common::TestEnv;
use ra_core::{
    Annotation, AnnotationId, AnnotatorId, Error, ExportId, LeaseCoordinator, ManualClock,
    StaleBefore, Store, Task, TaskId, TimeRange, LEASE_RACE_ATTEMPTS,
};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const LEASE_MINUTES: f64 = 30.0;

#[test]
fn repeated_acquire_returns_same_task_unchanged() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    env.task_with_image("a.png", 8, 8);
    env.task_with_image("b.png", 8, 8);
    let coordinator = env.coordinator();

    let first = coordinator
        .acquire_lease(ana, LEASE_MINUTES)
        .unwrap()
        .expect("a task should be available");
    env.clock.advance(Duration::minutes(5));
    let second = coordinator
        .acquire_lease(ana, LEASE_MINUTES)
        .unwrap()
        .expect("the held task should come back");

    assert_eq!(first.id, second.id);
    assert_eq!(first.lease(), second.lease());
    assert_eq!(second.lease().unwrap().assigned_at, common::start_time());
}

#[test]
fn lease_expires_after_lease_minutes() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    let ben = env.annotator("ben");
    let task = env.task_with_image("a.png", 8, 8);
    let coordinator = env.coordinator();

    coordinator.acquire_lease(ana, LEASE_MINUTES).unwrap();

    env.clock.advance(Duration::minutes(10));
    coordinator.heartbeat(ana).unwrap();
    assert_eq!(coordinator.acquire_lease(ben, LEASE_MINUTES).unwrap(), None);

    env.clock.advance(Duration::minutes(21));
    coordinator.heartbeat(ana).unwrap();
    let stolen = coordinator
        .acquire_lease(ben, LEASE_MINUTES)
        .unwrap()
        .expect("a 31 minute old lease is reclaimable");
    assert_eq!(stolen.id, task);
    assert!(stolen.is_leased_to(ben));
}

#[test]
fn stale_heartbeat_releases_a_fresh_lease() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    let ben = env.annotator("ben");
    let task = env.task_with_image("a.png", 8, 8);
    let coordinator = env.coordinator();

    coordinator.acquire_lease(ana, LEASE_MINUTES).unwrap();
    coordinator.heartbeat(ana).unwrap();

    // The heartbeat window for a 30 minute lease is 2 minutes.
    env.clock.advance(Duration::minutes(3));
    let stolen = coordinator
        .acquire_lease(ben, LEASE_MINUTES)
        .unwrap()
        .expect("a silent holder loses the task");
    assert_eq!(stolen.id, task);
}

#[test]
fn holder_without_heartbeat_keeps_lease_until_expiry() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    let ben = env.annotator("ben");
    env.task_with_image("a.png", 8, 8);
    let coordinator = env.coordinator();

    coordinator.acquire_lease(ana, LEASE_MINUTES).unwrap();
    env.clock.advance(Duration::minutes(10));
    assert_eq!(coordinator.acquire_lease(ben, LEASE_MINUTES).unwrap(), None);
}

#[test]
fn empty_pool_and_unknown_annotator() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    let coordinator = env.coordinator();

    assert_eq!(coordinator.acquire_lease(ana, LEASE_MINUTES).unwrap(), None);
    let err = coordinator
        .acquire_lease(AnnotatorId(404), LEASE_MINUTES)
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        coordinator.acquire_lease(ana, -1.0),
        Err(Error::Validation { .. })
    ));
    assert!(coordinator.heartbeat(AnnotatorId(404)).unwrap_err().is_not_found());
}

#[test]
fn release_and_release_all_free_tasks() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    let ben = env.annotator("ben");
    let task = env.task_with_image("a.png", 8, 8);
    let coordinator = env.coordinator();

    coordinator.acquire_lease(ana, LEASE_MINUTES).unwrap();
    coordinator.release(task).unwrap();
    let leased = coordinator.acquire_lease(ben, LEASE_MINUTES).unwrap().unwrap();
    assert!(leased.is_leased_to(ben));

    assert_eq!(coordinator.release_all(ben).unwrap(), 1);
    assert_eq!(coordinator.release_all(ben).unwrap(), 0);
    let free = env.store.get_task(task).unwrap().unwrap();
    assert_eq!(free.lease(), None);

    assert!(coordinator.release(TaskId(404)).unwrap_err().is_not_found());
}

#[test]
fn completion_requires_the_lease_holder() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    let ben = env.annotator("ben");
    let task = env.task_with_image("a.png", 8, 8);
    let coordinator = env.coordinator();

    coordinator.acquire_lease(ana, LEASE_MINUTES).unwrap();
    assert!(matches!(
        coordinator.complete_as(task, ben),
        Err(Error::LeaseNotHeld { task_id }) if task_id == task.0
    ));

    env.clock.advance(Duration::minutes(4));
    coordinator.complete_as(task, ana).unwrap();
    let done = env.store.get_task(task).unwrap().unwrap();
    assert!(done.state.is_completed());
    assert_eq!(done.lease(), None);

    // Completing again is a silent success for anyone.
    coordinator.complete_as(task, ben).unwrap();
    coordinator.complete(task).unwrap();
    assert!(coordinator.complete(TaskId(404)).unwrap_err().is_not_found());
}

#[test]
fn completed_tasks_are_never_leased() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    let task = env.task_with_image("a.png", 8, 8);
    let coordinator = env.coordinator();

    coordinator.complete(task).unwrap();
    assert_eq!(coordinator.acquire_lease(ana, LEASE_MINUTES).unwrap(), None);
}

#[test]
fn reset_returns_task_to_unleased_pending() {
    let env = TestEnv::new();
    let ana = env.annotator("ana");
    let ben = env.annotator("ben");
    let task = env.task_with_image("a.png", 8, 8);
    let coordinator = env.coordinator();

    coordinator.acquire_lease(ana, LEASE_MINUTES).unwrap();
    coordinator.complete_as(task, ana).unwrap();
    env.record_annotation(ana, task, &common::square_content(task, &["liexi"]));

    coordinator.reset(task).unwrap();
    let reset = env.store.get_task(task).unwrap().unwrap();
    assert!(reset.state.is_pending());
    assert_eq!(reset.lease(), None);
    assert_eq!(env.store.annotations_for_task(task).unwrap().len(), 1);

    let leased = coordinator.acquire_lease(ben, LEASE_MINUTES).unwrap().unwrap();
    assert_eq!(leased.id, task);
    assert!(coordinator.reset(TaskId(404)).unwrap_err().is_not_found());
}

/// A store where every conditional lease write loses.
struct LosingStore {
    attempts: AtomicU32,
}

impl Store for LosingStore {
    fn annotator_exists(&self, _: AnnotatorId) -> ra_core::Result<bool> {
        Ok(true)
    }
    fn get_task(&self, _: TaskId) -> ra_core::Result<Option<Task>> {
        Ok(None)
    }
    fn held_task(&self, _: AnnotatorId) -> ra_core::Result<Option<Task>> {
        Ok(None)
    }
    fn random_lease_candidate(&self, _: &StaleBefore) -> ra_core::Result<Option<TaskId>> {
        Ok(Some(TaskId(1)))
    }
    fn try_assign(
        &self,
        _: TaskId,
        _: AnnotatorId,
        _: DateTime<Utc>,
        _: &StaleBefore,
    ) -> ra_core::Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
    fn touch_heartbeat(&self, _: AnnotatorId, _: DateTime<Utc>) -> ra_core::Result<bool> {
        unreachable!()
    }
    fn release_lease(&self, _: TaskId) -> ra_core::Result<bool> {
        unreachable!()
    }
    fn release_all_leases(&self, _: AnnotatorId) -> ra_core::Result<usize> {
        unreachable!()
    }
    fn complete_task(&self, _: TaskId, _: DateTime<Utc>) -> ra_core::Result<bool> {
        unreachable!()
    }
    fn complete_held_task(
        &self,
        _: TaskId,
        _: AnnotatorId,
        _: DateTime<Utc>,
    ) -> ra_core::Result<bool> {
        unreachable!()
    }
    fn reset_task(&self, _: TaskId) -> ra_core::Result<bool> {
        unreachable!()
    }
    fn insert_annotation(
        &self,
        _: Option<AnnotatorId>,
        _: Option<TaskId>,
        _: &str,
        _: DateTime<Utc>,
    ) -> ra_core::Result<AnnotationId> {
        unreachable!()
    }
    fn record_submission(
        &self,
        _: AnnotatorId,
        _: TaskId,
        _: &str,
        _: DateTime<Utc>,
    ) -> ra_core::Result<Option<AnnotationId>> {
        unreachable!()
    }
    fn annotations_for_task(&self, _: TaskId) -> ra_core::Result<Vec<Annotation>> {
        unreachable!()
    }
    fn annotations_by_annotator(
        &self,
        _: AnnotatorId,
        _: Option<usize>,
    ) -> ra_core::Result<Vec<Annotation>> {
        unreachable!()
    }
    fn completed_tasks_in_range(&self, _: &TimeRange, _: bool) -> ra_core::Result<Vec<Task>> {
        unreachable!()
    }
    fn mark_exported(&self, _: &[TaskId]) -> ra_core::Result<usize> {
        unreachable!()
    }
    fn record_export(
        &self,
        _: &str,
        _: &Path,
        _: usize,
        _: DateTime<Utc>,
    ) -> ra_core::Result<ExportId> {
        unreachable!()
    }
}

#[test]
fn repeated_lost_races_give_up() {
    let store = Arc::new(LosingStore {
        attempts: AtomicU32::new(0),
    });
    let coordinator = LeaseCoordinator::new(
        store.clone(),
        Arc::new(ManualClock::new(common::start_time())),
    );

    let err = coordinator
        .acquire_lease(AnnotatorId(1), LEASE_MINUTES)
        .unwrap_err();
    assert!(matches!(err, Error::RaceLost { attempts } if attempts == LEASE_RACE_ATTEMPTS));
    assert_eq!(store.attempts.load(Ordering::SeqCst), LEASE_RACE_ATTEMPTS);
}

#[test]
fn concurrent_annotators_never_share_a_task() {
    let env = TestEnv::new();
    let annotators: Vec<_> = (0..6).map(|i| env.annotator(&format!("worker{i}"))).collect();
    for i in 0..4 {
        env.task_with_image(&format!("t{i}.png"), 4, 4);
    }

    let handles: Vec<_> = annotators
        .into_iter()
        .map(|annotator| {
            let coordinator = env.coordinator();
            std::thread::spawn(move || coordinator.acquire_lease(annotator, LEASE_MINUTES))
        })
        .collect();

    let mut leased = Vec::new();
    for handle in handles {
        match handle.join().expect("worker panicked") {
            Ok(Some(task)) => leased.push(task.id),
            Ok(None) | Err(Error::RaceLost { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    let mut unique = leased.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), leased.len(), "a task was leased twice: {leased:?}");
    assert!(leased.len() <= 4);
}
