//! Task coordination and export for Rock Annotator.
//!
//! This crate hands annotation tasks out to annotators under time-bounded
//! leases, collapses repeated submissions into latest-wins views, rasterizes
//! labeled polygons into masks, and packages completed work into labelme
//! archives.

pub mod admin;
pub mod annotators;
pub mod clock;
pub mod config;
pub mod db;
pub mod dedup;
pub mod descriptor;
pub mod error;
pub mod export;
pub mod ingest;
pub mod lease;
pub mod raster;
pub mod store;
pub mod submission;
pub mod task;

/// Core result type used throughout Rock Annotator.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for all Rock Annotator operations.
pub use error::Error;

/// Task lifecycle types.
pub use task::{
    Annotation, AnnotationId, AnnotatorId, ExportId, ImageId, ImageInfo, Lease, Task, TaskId,
    TaskState, TaskStatus,
};

/// Storage interface and its SQLite implementation.
pub use db::DatabaseManager;
pub use store::{StaleBefore, Store, TimeRange};

/// Time sources.
pub use clock::{Clock, ManualClock, SystemClock};

/// Lease coordination and submissions.
pub use lease::{LeaseCoordinator, StalenessPolicy, LEASE_RACE_ATTEMPTS};
pub use submission::{AnnotationContent, Point, Polygon, Submission};

/// Latest-wins annotation views.
pub use dedup::{DedupKey, Deduplicator, LatestEntry};

/// Rasterization and export.
pub use descriptor::{LabelmeDocument, LabelmeShape};
pub use export::{
    BasenameAllocator, ExportEntry, ExportOutcome, ExportRequest, ExportSettings, Exporter,
    SkippedTask,
};
pub use raster::{rasterize, Mask};

/// Operator tooling.
pub use admin::{Admin, TaskDetail, TaskPage};
pub use annotators::{Annotator, AnnotatorAccounts};
pub use config::Config;
pub use ingest::{IngestReport, IngestedImage, Ingestor};
