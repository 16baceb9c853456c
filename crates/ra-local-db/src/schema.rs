//! Database schema definitions and constants.

// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the SQLite database inside the Rock Annotator home.
pub const DATABASE_FILE: &str = "state.db";

// Table names
pub const TABLE_SCHEMA_MIGRATIONS: &str = "schema_migrations";
pub const TABLE_IMAGES: &str = "images";
pub const TABLE_ANNOTATION_TASKS: &str = "annotation_tasks";
pub const TABLE_ANNOTATIONS: &str = "annotations";
pub const TABLE_ANNOTATORS: &str = "annotators";
pub const TABLE_EXPORTS: &str = "exports";

// Stored values of annotation_tasks.status
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";

/// Every table created by the current schema.
pub const ALL_TABLES: [&str; 6] = [
    TABLE_SCHEMA_MIGRATIONS,
    TABLE_IMAGES,
    TABLE_ANNOTATION_TASKS,
    TABLE_ANNOTATIONS,
    TABLE_ANNOTATORS,
    TABLE_EXPORTS,
];
