//! Lease coordination for annotation tasks.
//!
//! A pending task is handed to at most one annotator at a time. A lease
//! becomes reclaimable once it is older than the lease duration, or once its
//! holder stops sending heartbeats for the (shorter) heartbeat window.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::store::{StaleBefore, Store};
use crate::task::{AnnotatorId, Task, TaskId};

/// How many times a lost conditional write is retried with a fresh candidate.
pub const LEASE_RACE_ATTEMPTS: u32 = 5;

/// Lease and heartbeat windows derived from a lease duration in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub lease: Duration,
    pub heartbeat: Duration,
}

impl StalenessPolicy {
    pub fn from_lease_minutes(minutes: f64) -> crate::Result<Self> {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(crate::Error::validation(format!(
                "Lease minutes must be a non-negative number, got {}",
                minutes
            )));
        }
        let lease = Duration::try_milliseconds((minutes * 60_000.0).round() as i64)
            .ok_or_else(|| crate::Error::validation(format!("Lease minutes out of range: {}", minutes)))?;
        let heartbeat_minutes = if minutes < 1.0 {
            2
        } else {
            ((minutes / 15.0).floor() as i64).clamp(1, 5)
        };
        Ok(Self {
            lease,
            heartbeat: Duration::minutes(heartbeat_minutes),
        })
    }

    /// Cutoffs relative to `now`.
    pub fn stale_before(&self, now: DateTime<Utc>) -> StaleBefore {
        StaleBefore {
            lease: now.checked_sub_signed(self.lease).unwrap_or(DateTime::<Utc>::MIN_UTC),
            heartbeat: now
                .checked_sub_signed(self.heartbeat)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// Hands out, tracks and finishes task leases.
pub struct LeaseCoordinator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl LeaseCoordinator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Return the annotator's current task, or lease a random reclaimable one.
    ///
    /// `Ok(None)` means the pool has nothing to hand out.
    pub fn acquire_lease(
        &self,
        annotator: AnnotatorId,
        lease_minutes: f64,
    ) -> crate::Result<Option<Task>> {
        let policy = StalenessPolicy::from_lease_minutes(lease_minutes)?;
        if !self.store.annotator_exists(annotator)? {
            return Err(crate::Error::not_found(format!("annotator {}", annotator)));
        }

        if let Some(task) = self.store.held_task(annotator)? {
            debug!(task_id = %task.id, annotator_id = %annotator, "Annotator already holds a lease");
            return Ok(Some(task));
        }

        for attempt in 1..=LEASE_RACE_ATTEMPTS {
            let now = self.clock.now();
            let stale = policy.stale_before(now);
            let Some(candidate) = self.store.random_lease_candidate(&stale)? else {
                debug!(annotator_id = %annotator, "No pending task available");
                return Ok(None);
            };

            if self.store.try_assign(candidate, annotator, now, &stale)? {
                let task = self
                    .store
                    .get_task(candidate)?
                    .ok_or_else(|| crate::Error::not_found(format!("task {}", candidate)))?;
                info!(task_id = %candidate, annotator_id = %annotator, "Lease granted");
                return Ok(Some(task));
            }

            debug!(task_id = %candidate, annotator_id = %annotator, attempt, "Lost lease race, retrying");
        }

        Err(crate::Error::RaceLost {
            attempts: LEASE_RACE_ATTEMPTS,
        })
    }

    /// Record that the annotator's client is still alive.
    pub fn heartbeat(&self, annotator: AnnotatorId) -> crate::Result<()> {
        if !self.store.touch_heartbeat(annotator, self.clock.now())? {
            return Err(crate::Error::not_found(format!("annotator {}", annotator)));
        }
        Ok(())
    }

    /// Drop whatever lease the task has.
    pub fn release(&self, task: TaskId) -> crate::Result<()> {
        if !self.store.release_lease(task)? {
            return Err(crate::Error::not_found(format!("task {}", task)));
        }
        debug!(task_id = %task, "Lease released");
        Ok(())
    }

    /// Drop every pending lease held by the annotator.
    pub fn release_all(&self, annotator: AnnotatorId) -> crate::Result<usize> {
        let released = self.store.release_all_leases(annotator)?;
        debug!(annotator_id = %annotator, released, "Released all leases");
        Ok(released)
    }

    /// Complete a task regardless of who holds it. Already completed tasks are left as they are.
    pub fn complete(&self, task: TaskId) -> crate::Result<()> {
        if self.store.complete_task(task, self.clock.now())? {
            info!(task_id = %task, "Task completed");
            return Ok(());
        }
        match self.store.get_task(task)? {
            None => Err(crate::Error::not_found(format!("task {}", task))),
            Some(_) => {
                debug!(task_id = %task, "Task was already completed");
                Ok(())
            }
        }
    }

    /// Complete a task on behalf of its current lease holder.
    pub fn complete_as(&self, task: TaskId, annotator: AnnotatorId) -> crate::Result<()> {
        if self
            .store
            .complete_held_task(task, annotator, self.clock.now())?
        {
            info!(task_id = %task, annotator_id = %annotator, "Task completed");
            return Ok(());
        }
        match self.store.get_task(task)? {
            None => Err(crate::Error::not_found(format!("task {}", task))),
            Some(existing) if existing.state.is_completed() => {
                debug!(task_id = %task, "Task was already completed");
                Ok(())
            }
            Some(_) => Err(crate::Error::LeaseNotHeld { task_id: task.0 }),
        }
    }

    /// Return a task to unleased pending. Annotations are left in place.
    pub fn reset(&self, task: TaskId) -> crate::Result<()> {
        if !self.store.reset_task(task)? {
            return Err(crate::Error::not_found(format!("task {}", task)));
        }
        info!(task_id = %task, "Task reset to pending");
        Ok(())
    }
}
