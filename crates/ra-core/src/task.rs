//! Task lifecycle types.
//!
//! A task is either pending, optionally leased to one annotator, or completed.
//! The lease is a single value, so a holder without a grant time (or the
//! reverse) cannot be represented.

use chrono::{DateTime, Utc};
use ra_local_db::{AnnotationRecord, TaskRow, STATUS_COMPLETED, STATUS_PENDING};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clock::{from_db, from_db_opt};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for an annotation task.
    TaskId
);
id_type!(
    /// Unique identifier for an annotator account.
    AnnotatorId
);
id_type!(
    /// Unique identifier for a source image.
    ImageId
);
id_type!(
    /// Unique identifier for a stored submission.
    AnnotationId
);
id_type!(
    /// Unique identifier for an export record.
    ExportId
);

/// Stored task status, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => STATUS_PENDING,
            TaskStatus::Completed => STATUS_COMPLETED,
        }
    }
}

impl FromStr for TaskStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            STATUS_PENDING => Ok(TaskStatus::Pending),
            STATUS_COMPLETED => Ok(TaskStatus::Completed),
            other => Err(crate::Error::validation(format!(
                "Unknown task status '{}', expected pending or completed",
                other
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bounded claim on a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub annotator: AnnotatorId,
    pub assigned_at: DateTime<Utc>,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskState {
    Pending { lease: Option<Lease> },
    Completed { completed_at: DateTime<Utc> },
}

impl TaskState {
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Pending { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskState::Completed { .. })
    }

    /// The current lease, if the task is pending and leased.
    pub fn lease(&self) -> Option<&Lease> {
        match self {
            TaskState::Pending { lease } => lease.as_ref(),
            TaskState::Completed { .. } => None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Pending { .. } => TaskStatus::Pending,
            TaskState::Completed { .. } => TaskStatus::Completed,
        }
    }
}

/// The image a task annotates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: ImageId,
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

/// An annotation task together with its image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub image: ImageInfo,
    #[serde(flatten)]
    pub state: TaskState,
    pub exported: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn lease(&self) -> Option<&Lease> {
        self.state.lease()
    }

    /// Whether `annotator` currently holds this task's lease.
    pub fn is_leased_to(&self, annotator: AnnotatorId) -> bool {
        self.lease().is_some_and(|lease| lease.annotator == annotator)
    }
}

fn dimension(value: i64, what: &str) -> crate::Result<u32> {
    u32::try_from(value)
        .map_err(|_| crate::Error::parse(format!("Invalid image {}: {}", what, value)))
}

impl TryFrom<TaskRow> for Task {
    type Error = crate::Error;

    fn try_from(row: TaskRow) -> crate::Result<Self> {
        let record = row.task;
        let state = match record.status.as_str() {
            STATUS_PENDING => {
                let lease = match (record.assigned_to, record.assigned_at.as_deref()) {
                    (Some(annotator), Some(at)) => Some(Lease {
                        annotator: AnnotatorId(annotator),
                        assigned_at: from_db(at)?,
                    }),
                    (None, None) => None,
                    _ => {
                        return Err(crate::Error::parse(format!(
                            "Task {} has a partial lease",
                            record.id
                        )))
                    }
                };
                TaskState::Pending { lease }
            }
            STATUS_COMPLETED => {
                let completed_at = from_db_opt(record.completed_at.as_deref())?.ok_or_else(|| {
                    crate::Error::parse(format!("Completed task {} has no completion time", record.id))
                })?;
                TaskState::Completed { completed_at }
            }
            other => {
                return Err(crate::Error::parse(format!(
                    "Unknown status '{}' for task {}",
                    other, record.id
                )))
            }
        };

        Ok(Task {
            id: TaskId(record.id),
            image: ImageInfo {
                id: ImageId(record.image_id),
                filename: row.filename,
                width: dimension(row.width, "width")?,
                height: dimension(row.height, "height")?,
            },
            state,
            exported: record.exported,
            created_at: from_db(&record.created_at)?,
        })
    }
}

/// A stored submission. `content` is exactly what the annotator sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub annotator_id: Option<AnnotatorId>,
    pub task_id: Option<TaskId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AnnotationRecord> for Annotation {
    type Error = crate::Error;

    fn try_from(record: AnnotationRecord) -> crate::Result<Self> {
        Ok(Annotation {
            id: AnnotationId(record.id),
            annotator_id: record.annotator_id.map(AnnotatorId),
            task_id: record.task_id.map(TaskId),
            content: record.content,
            created_at: from_db(&record.created_at)?,
        })
    }
}
