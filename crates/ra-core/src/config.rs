//! Resolved runtime configuration.
//!
//! The home directory comes from an explicit value, then `RA_HOME`, then the
//! platform state directory. Everything else lives underneath it.

use std::fs;
use std::path::PathBuf;

use crate::db::DatabaseManager;
use crate::export::ExportSettings;

pub const DEFAULT_LEASE_MINUTES: f64 = 30.0;
pub const DEFAULT_JPEG_QUALITY: u8 = 95;
/// Polygon label whose regions are rasterized into export masks.
pub const MARKER_LABEL: &str = "liexi";

pub const UPLOADS_DIR: &str = "uploads";
pub const DOWNLOADS_DIR: &str = "downloads";
pub const SCRATCH_DIR: &str = "tmp";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub home: PathBuf,
    pub database_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub scratch_root: PathBuf,
    pub lease_minutes: f64,
    pub jpeg_quality: u8,
    pub marker_label: String,
}

impl Config {
    pub fn from_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            database_path: home.join(ra_local_db::DATABASE_FILE),
            uploads_dir: home.join(UPLOADS_DIR),
            downloads_dir: home.join(DOWNLOADS_DIR),
            scratch_root: home.join(SCRATCH_DIR),
            home,
            lease_minutes: DEFAULT_LEASE_MINUTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            marker_label: MARKER_LABEL.to_string(),
        }
    }

    /// Use `home` if given, otherwise the default home.
    pub fn resolve(home: Option<PathBuf>) -> crate::Result<Self> {
        let home = match home {
            Some(home) => home,
            None => ra_local_db::connection::default_home()?,
        };
        Ok(Self::from_home(home))
    }

    pub fn ensure_dirs(&self) -> crate::Result<()> {
        for dir in [
            &self.home,
            &self.uploads_dir,
            &self.downloads_dir,
            &self.scratch_root,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn open_database(&self) -> crate::Result<DatabaseManager> {
        DatabaseManager::with_path(&self.database_path)
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            uploads_dir: self.uploads_dir.clone(),
            downloads_dir: self.downloads_dir.clone(),
            scratch_root: self.scratch_root.clone(),
            jpeg_quality: self.jpeg_quality,
            marker_label: self.marker_label.clone(),
        }
    }
}
