//! Annotation submissions.
//!
//! Content is stored exactly as submitted. It is parsed only to validate it,
//! to find the task it belongs to, and later to read its polygons back.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::info;

use crate::lease::LeaseCoordinator;
use crate::task::{AnnotationId, AnnotatorId, TaskId};

/// A polygon vertex in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(deserialize_with = "lenient_number")]
    pub x: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub y: f64,
}

/// A labeled, implicitly closed polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    #[serde(default, alias = "label")]
    pub tag: String,
    pub points: Vec<Point>,
}

/// Parsed submission content: `{"taskId": .., "polygons": [{"tag": .., "points": [{"x": .., "y": ..}]}]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationContent {
    pub task_id: TaskId,
    pub polygons: Vec<Polygon>,
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("number out of range: {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("not a number: {:?}", s))),
        other => Err(D::Error::custom(format!("expected a number, got {}", other))),
    }
}

/// The task id embedded in parsed content, accepting numbers and numeric strings.
pub fn embedded_task_id(content: &Value) -> Option<TaskId> {
    let id = match content.get("taskId")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.map(TaskId)
}

impl AnnotationContent {
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| crate::Error::parse(format!("Annotation content is not valid JSON: {}", e)))?;
        if !value.is_object() {
            return Err(crate::Error::validation("Annotation content must be a JSON object"));
        }

        let task_id = embedded_task_id(&value)
            .ok_or_else(|| crate::Error::validation("Annotation content requires a numeric taskId"))?;
        let polygons = value
            .get("polygons")
            .filter(|p| !p.is_null())
            .ok_or_else(|| crate::Error::validation("Annotation content requires polygons"))?;
        let polygons = Vec::<Polygon>::deserialize(polygons)
            .map_err(|e| crate::Error::validation(format!("Invalid polygons: {}", e)))?;

        Ok(Self { task_id, polygons })
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub annotation_id: AnnotationId,
    pub task_id: TaskId,
}

impl LeaseCoordinator {
    /// Validate and store a submission, completing its task as the lease holder.
    ///
    /// The row and the completion commit together: a submitter who does not hold the lease
    /// of a pending task gets `LeaseNotHeld` and nothing is stored. Resubmitting for an
    /// already completed task stores another row and leaves the task completed.
    pub fn submit(&self, annotator: AnnotatorId, raw: &str) -> crate::Result<Submission> {
        let content = AnnotationContent::parse(raw)?;
        let store = self.store();

        if !store.annotator_exists(annotator)? {
            return Err(crate::Error::not_found(format!("annotator {}", annotator)));
        }
        let task = store
            .get_task(content.task_id)?
            .ok_or_else(|| crate::Error::not_found(format!("task {}", content.task_id)))?;

        let annotation_id = store
            .record_submission(annotator, task.id, raw, self.now())?
            .ok_or(crate::Error::LeaseNotHeld { task_id: task.id.0 })?;
        info!(
            task_id = %task.id,
            annotator_id = %annotator,
            annotation_id = %annotation_id,
            polygons = content.polygons.len(),
            "Annotation stored"
        );

        Ok(Submission {
            annotation_id,
            task_id: task.id,
        })
    }
}
