//! Image ingestion: copy a source file into the uploads directory and create its task.

use image::{ImageFormat, ImageReader};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::db::DatabaseManager;
use crate::export::safe_stem;
use crate::task::{ImageId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedImage {
    pub image_id: ImageId,
    pub task_id: TaskId,
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub succeeded: Vec<IngestedImage>,
    pub failed: Vec<IngestFailure>,
}

pub struct Ingestor {
    db: DatabaseManager,
    clock: Arc<dyn Clock>,
    uploads_dir: PathBuf,
}

impl Ingestor {
    pub fn new(db: DatabaseManager, clock: Arc<dyn Clock>, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            clock,
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Copy one JPEG or PNG into the uploads directory and create its image and task.
    pub fn ingest(&self, path: &Path) -> crate::Result<IngestedImage> {
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let extension = match reader.format() {
            Some(ImageFormat::Jpeg) => "jpg",
            Some(ImageFormat::Png) => "png",
            other => {
                return Err(crate::Error::validation(format!(
                    "{} is not a JPEG or PNG image (detected {:?})",
                    path.display(),
                    other
                )))
            }
        };
        let (width, height) = reader.into_dimensions()?;

        fs::create_dir_all(&self.uploads_dir)?;
        let filename = self.free_filename(path, extension)?;
        let dest = self.uploads_dir.join(&filename);
        fs::copy(path, &dest)?;

        let created = self
            .db
            .create_image_task(&filename, width, height, self.clock.now());
        let (image_id, task_id) = match created {
            Ok(ids) => ids,
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&dest) {
                    warn!("Failed to remove {} after error: {}", dest.display(), remove_err);
                }
                return Err(e);
            }
        };

        info!(task_id = %task_id, image_id = %image_id, filename = %filename, "Image ingested");
        Ok(IngestedImage {
            image_id,
            task_id,
            filename,
            width,
            height,
        })
    }

    /// Ingest files one after another, reporting each failure without stopping.
    pub fn ingest_many<P: AsRef<Path>>(&self, paths: &[P]) -> IngestReport {
        let mut report = IngestReport::default();
        for path in paths {
            let path = path.as_ref();
            match self.ingest(path) {
                Ok(image) => report.succeeded.push(image),
                Err(e) => {
                    warn!("Failed to ingest {}: {}", path.display(), e);
                    report.failed.push(IngestFailure {
                        path: path.to_path_buf(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// A name unused both on disk and in the image table.
    fn free_filename(&self, source: &Path, extension: &str) -> crate::Result<String> {
        let stem = safe_stem(&source.to_string_lossy());
        let mut candidate = format!("{}.{}", stem, extension);
        let mut n = 1;
        while self.uploads_dir.join(&candidate).exists() || self.db.filename_exists(&candidate)? {
            n += 1;
            candidate = format!("{}_{}.{}", stem, n, extension);
        }
        Ok(candidate)
    }
}
