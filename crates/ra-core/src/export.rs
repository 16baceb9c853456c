//! Export of completed tasks into a single labelme archive.
//!
//! Every processed task contributes `<name>.jpg`, `<name>.json` and, when it has
//! marker-labeled polygons, a `<name>.png` mask. Tasks are processed one at a
//! time in a scratch directory that is removed when the batch ends.

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use ra_local_db::ExportRecord;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::clock::{from_db, Clock};
use crate::dedup::Deduplicator;
use crate::descriptor::{LabelmeDocument, LabelmeShape};
use crate::raster::rasterize;
use crate::store::{Store, TimeRange};
use crate::task::{ExportId, Task, TaskId};

/// Where exports read from and write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    pub uploads_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub scratch_root: PathBuf,
    pub jpeg_quality: u8,
    pub marker_label: String,
}

/// Which tasks to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    /// Explicit task ids. When non-empty, the time range and unexported flag are ignored.
    pub ids: Option<Vec<TaskId>>,
    pub range: TimeRange,
    pub only_unexported: bool,
    /// Case-insensitive substring of the source filename.
    pub filename_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTask {
    pub task_id: TaskId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportOutcome {
    pub archive_path: PathBuf,
    pub record_id: ExportId,
    pub batch_id: String,
    pub processed: Vec<TaskId>,
    pub skipped: Vec<SkippedTask>,
    /// Set when the archive and record exist but `processed` could not be marked exported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_exported_error: Option<String>,
}

/// A produced archive as recorded in the export log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
    pub id: ExportId,
    pub filename: String,
    pub archive_path: PathBuf,
    pub task_count: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ExportRecord> for ExportEntry {
    type Error = crate::Error;

    fn try_from(record: ExportRecord) -> crate::Result<Self> {
        Ok(Self {
            id: ExportId(record.id),
            filename: record.filename,
            archive_path: PathBuf::from(record.archive_path),
            task_count: record.task_count,
            created_at: from_db(&record.created_at)?,
        })
    }
}

/// Filename stem with anything but letters, digits, `-` and `_` replaced by `_`.
pub fn safe_stem(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Hands out batch-unique output basenames, suffixing `_2`, `_3`, ... on collision.
#[derive(Debug, Default)]
pub struct BasenameAllocator {
    used: HashSet<String>,
}

impl BasenameAllocator {
    pub fn allocate(&mut self, filename: &str) -> String {
        let base = safe_stem(filename);
        let mut candidate = base.clone();
        let mut n = 1;
        // Case-insensitive so archives unpack cleanly on case-folding filesystems.
        while !self.used.insert(candidate.to_lowercase()) {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }
        candidate
    }
}

/// Artifacts of one processed task: archive entry name and scratch path.
type Artifacts = Vec<(String, PathBuf)>;

pub struct Exporter {
    store: Arc<dyn Store>,
    dedup: Deduplicator,
    clock: Arc<dyn Clock>,
    settings: ExportSettings,
}

impl Exporter {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, settings: ExportSettings) -> Self {
        Self {
            dedup: Deduplicator::new(store.clone()),
            store,
            clock,
            settings,
        }
    }

    /// Build one archive for the selected tasks and mark the processed ones exported.
    ///
    /// Per-task failures are logged and reported in `skipped`. An empty
    /// selection still yields a valid, empty archive. Once the archive and its
    /// record exist the export succeeds; a failed exported-flag update is
    /// reported in `mark_exported_error` and those tasks stay unexported.
    pub fn export(&self, request: &ExportRequest) -> crate::Result<ExportOutcome> {
        fs::create_dir_all(&self.settings.downloads_dir)?;
        fs::create_dir_all(&self.settings.scratch_root)?;

        let now = self.clock.now();
        let batch_id = format!(
            "{}-{}",
            now.timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..6]
        );
        let scratch = tempfile::Builder::new()
            .prefix(&format!("export-{}-", batch_id))
            .tempdir_in(&self.settings.scratch_root)?;

        let tasks = self.select(request)?;
        info!(batch_id = %batch_id, tasks = tasks.len(), "Starting export");

        let mut allocator = BasenameAllocator::default();
        let mut artifacts = Vec::new();
        let mut processed = Vec::new();
        let mut skipped = Vec::new();
        for task in &tasks {
            match self.process_task(task, scratch.path(), &mut allocator) {
                Ok(files) => {
                    debug!(task_id = %task.id, files = files.len(), "Task exported");
                    artifacts.extend(files);
                    processed.push(task.id);
                }
                Err(e) => {
                    warn!(task_id = %task.id, batch_id = %batch_id, "Skipping task: {}", e);
                    skipped.push(SkippedTask {
                        task_id: task.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let archive_name = format!("export_{}.zip", batch_id);
        let archive_path = self.settings.downloads_dir.join(&archive_name);
        write_archive(&archive_path, &artifacts)?;

        if let Err(e) = scratch.close() {
            warn!(batch_id = %batch_id, "Failed to remove scratch directory: {}", e);
        }

        let record_id = self
            .store
            .record_export(&archive_name, &archive_path, processed.len(), now)?;
        let mut mark_exported_error = None;
        if !processed.is_empty() {
            match self.store.mark_exported(&processed) {
                Ok(marked) => debug!(batch_id = %batch_id, marked, "Marked tasks exported"),
                Err(e) => {
                    warn!(
                        batch_id = %batch_id,
                        archive = %archive_path.display(),
                        "Archive written but tasks were not marked exported: {}", e
                    );
                    mark_exported_error = Some(e.to_string());
                }
            }
        }

        info!(
            batch_id = %batch_id,
            archive = %archive_path.display(),
            processed = processed.len(),
            skipped = skipped.len(),
            "Export finished"
        );
        Ok(ExportOutcome {
            archive_path,
            record_id,
            batch_id,
            processed,
            skipped,
            mark_exported_error,
        })
    }

    fn select(&self, request: &ExportRequest) -> crate::Result<Vec<Task>> {
        let mut tasks = match request.ids.as_deref() {
            Some(ids) if !ids.is_empty() => {
                let mut seen = HashSet::new();
                let mut tasks = Vec::with_capacity(ids.len());
                for &id in ids {
                    if !seen.insert(id) {
                        continue;
                    }
                    match self.store.get_task(id)? {
                        Some(task) => tasks.push(task),
                        None => debug!(task_id = %id, "Requested task does not exist"),
                    }
                }
                tasks
            }
            _ => self
                .store
                .completed_tasks_in_range(&request.range, request.only_unexported)?,
        };

        if let Some(filter) = request
            .filename_filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
        {
            let needle = filter.to_lowercase();
            tasks.retain(|t| t.image.filename.to_lowercase().contains(&needle));
        }
        Ok(tasks)
    }

    fn process_task(
        &self,
        task: &Task,
        scratch: &Path,
        allocator: &mut BasenameAllocator,
    ) -> crate::Result<Artifacts> {
        let source = self.settings.uploads_dir.join(&task.image.filename);
        if !source.is_file() {
            return Err(crate::Error::not_found(format!(
                "source image {}",
                source.display()
            )));
        }

        let name = allocator.allocate(&task.image.filename);
        let image_name = format!("{}.jpg", name);
        let image_path = scratch.join(&image_name);
        self.reencode_jpeg(&source, &image_path)?;

        let (width, height) = image::image_dimensions(&image_path).unwrap_or_else(|e| {
            warn!(task_id = %task.id, "Falling back to stored dimensions: {}", e);
            (task.image.width, task.image.height)
        });
        let image_bytes = fs::read(&image_path)?;

        let polygons = self.dedup.current_polygons_for_task(task.id)?;
        let shapes = LabelmeShape::from_polygons(&polygons);
        let document = LabelmeDocument::new(shapes, image_name.as_str(), &image_bytes, width, height);

        let json_name = format!("{}.json", name);
        let json_path = scratch.join(&json_name);
        fs::write(&json_path, serde_json::to_string_pretty(&document)?)?;

        let mut files = vec![(image_name, image_path), (json_name, json_path)];

        let marker = self.settings.marker_label.as_str();
        if document.points_labeled(marker).next().is_some() {
            let mask = rasterize(width, height, document.points_labeled(marker));
            let mask_name = format!("{}.png", name);
            let mask_path = scratch.join(&mask_name);
            mask.to_rgba_image()
                .save_with_format(&mask_path, ImageFormat::Png)?;
            files.push((mask_name, mask_path));
        }

        Ok(files)
    }

    fn reencode_jpeg(&self, source: &Path, dest: &Path) -> crate::Result<()> {
        let rgb = image::open(source)?.to_rgb8();
        let mut writer = BufWriter::new(File::create(dest)?);
        let encoder = JpegEncoder::new_with_quality(&mut writer, self.settings.jpeg_quality);
        rgb.write_with_encoder(encoder)?;
        writer.flush()?;
        Ok(())
    }
}

/// Write `files` into a zip at `path`. A partly written archive is removed on failure.
fn write_archive(path: &Path, files: &[(String, PathBuf)]) -> crate::Result<()> {
    let written = write_entries(path, files);
    if written.is_err() {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(archive = %path.display(), "Failed to remove partial archive: {}", e),
        }
    }
    written
}

fn write_entries(path: &Path, files: &[(String, PathBuf)]) -> crate::Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, source) in files {
        zip.start_file(name.as_str(), options)?;
        let mut input = File::open(source)?;
        io::copy(&mut input, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}
