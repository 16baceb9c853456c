//! Latest-wins views over repeated submissions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::store::Store;
use crate::submission::{embedded_task_id, Polygon};
use crate::task::{Annotation, AnnotationId, AnnotatorId, TaskId};

/// What repeated submissions are collapsed by.
///
/// Content without a readable task id stands alone under its own row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum DedupKey {
    Task(TaskId),
    Row(AnnotationId),
}

impl DedupKey {
    pub fn for_annotation(annotation: &Annotation) -> Self {
        serde_json::from_str::<Value>(&annotation.content)
            .ok()
            .as_ref()
            .and_then(embedded_task_id)
            .map(DedupKey::Task)
            .unwrap_or(DedupKey::Row(annotation.id))
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            DedupKey::Task(id) => Some(*id),
            DedupKey::Row(_) => None,
        }
    }
}

/// The most recent submission for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestEntry {
    pub key: DedupKey,
    pub annotation_id: AnnotationId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Source image of the task, when the key names a task that still exists.
    pub filename: Option<String>,
}

/// Candidate rows scanned for `limit` distinct entries.
pub fn scan_window(limit: usize) -> usize {
    limit.saturating_mul(10).max(limit.saturating_add(10))
}

pub struct Deduplicator {
    store: Arc<dyn Store>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Up to `limit` entries, newest first, one per key.
    ///
    /// Only the newest `scan_window(limit)` rows are examined, so fewer
    /// entries come back when that window holds fewer distinct keys.
    pub fn latest_unique_for_annotator(
        &self,
        annotator: AnnotatorId,
        limit: usize,
    ) -> crate::Result<Vec<LatestEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .store
            .annotations_by_annotator(annotator, Some(scan_window(limit)))?;

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(limit);
        for row in rows {
            let key = DedupKey::for_annotation(&row);
            if !seen.insert(key) {
                continue;
            }
            let filename = match key.task_id() {
                Some(task_id) => self.store.get_task(task_id)?.map(|t| t.image.filename),
                None => None,
            };
            entries.push(LatestEntry {
                key,
                annotation_id: row.id,
                content: row.content,
                created_at: row.created_at,
                filename,
            });
            if entries.len() == limit {
                break;
            }
        }
        Ok(entries)
    }

    /// Number of distinct keys across every submission by the annotator.
    ///
    /// Reads all of the annotator's rows; cost grows with their history.
    pub fn unique_task_count(&self, annotator: AnnotatorId) -> crate::Result<usize> {
        let rows = self.store.annotations_by_annotator(annotator, None)?;
        let keys: HashSet<DedupKey> = rows.iter().map(DedupKey::for_annotation).collect();
        Ok(keys.len())
    }

    /// Polygons of the newest submission for a task. Empty when there is none.
    pub fn current_polygons_for_task(&self, task: TaskId) -> crate::Result<Vec<Polygon>> {
        let rows = self.store.annotations_for_task(task)?;
        let Some(latest) = rows.last() else {
            return Ok(Vec::new());
        };
        Ok(polygons_of(latest))
    }
}

fn polygons_of(annotation: &Annotation) -> Vec<Polygon> {
    let polygons = serde_json::from_str::<Value>(&annotation.content)
        .ok()
        .and_then(|mut value| value.get_mut("polygons").map(Value::take))
        .map(serde_json::from_value::<Vec<Polygon>>);
    match polygons {
        Some(Ok(polygons)) => polygons,
        Some(Err(e)) => {
            warn!(annotation_id = %annotation.id, "Ignoring unreadable polygons: {}", e);
            Vec::new()
        }
        None => {
            warn!(annotation_id = %annotation.id, "Annotation has no polygons");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(id: i64, content: &str) -> Annotation {
        Annotation {
            id: AnnotationId(id),
            annotator_id: Some(AnnotatorId(1)),
            task_id: None,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn key_comes_from_embedded_task_id() {
        assert_eq!(
            DedupKey::for_annotation(&annotation(5, r#"{"taskId":9,"polygons":[]}"#)),
            DedupKey::Task(TaskId(9))
        );
        assert_eq!(
            DedupKey::for_annotation(&annotation(6, r#"{"taskId":"9"}"#)),
            DedupKey::Task(TaskId(9))
        );
    }

    #[test]
    fn unreadable_content_is_its_own_key() {
        assert_eq!(
            DedupKey::for_annotation(&annotation(5, "not json")),
            DedupKey::Row(AnnotationId(5))
        );
        assert_eq!(
            DedupKey::for_annotation(&annotation(8, r#"{"taskId":null}"#)),
            DedupKey::Row(AnnotationId(8))
        );
    }

    #[test]
    fn window_is_at_least_ten_more_than_limit() {
        assert_eq!(scan_window(1), 11);
        assert_eq!(scan_window(2), 20);
        assert_eq!(scan_window(50), 500);
    }

    #[test]
    fn polygons_fall_back_to_empty() {
        assert!(polygons_of(&annotation(1, r#"{"taskId":1,"polygons":"nope"}"#)).is_empty());
        let polygons = polygons_of(&annotation(
            2,
            r#"{"taskId":1,"polygons":[{"tag":"liexi","points":[{"x":0,"y":0}]}]}"#,
        ));
        assert_eq!(polygons.len(), 1);
    }
}
