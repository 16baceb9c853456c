use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use ra_core::{admin::DEFAULT_PAGE_SIZE, Admin, Ingestor, TaskId, TaskStatus};
use serde_json::json;
use std::path::PathBuf;
use tracing::warn;

use crate::{print_json, AppContext};

/// Arguments for ingesting source images
#[derive(Args)]
pub struct IngestArgs {
    /// JPEG or PNG files to ingest
    #[arg(value_name = "FILES", required = true)]
    pub files: Vec<PathBuf>,
}

impl IngestArgs {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        let ingestor = Ingestor::new(ctx.db.clone(), ctx.clock.clone(), &ctx.config.uploads_dir);
        let report = ingestor.ingest_many(self.files.as_slice());
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "Some files were not ingested");
        }
        print_json(&report)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Completed,
}

impl From<StatusFilter> for TaskStatus {
    fn from(value: StatusFilter) -> Self {
        match value {
            StatusFilter::Pending => TaskStatus::Pending,
            StatusFilter::Completed => TaskStatus::Completed,
        }
    }
}

/// Task administration commands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// List tasks, newest first
    List(TaskListArgs),
    /// Show a task and all of its submissions
    Show {
        #[arg(value_name = "ID")]
        id: i64,
    },
    /// Delete a task, its submissions and its uploaded image
    Delete {
        #[arg(value_name = "ID")]
        id: i64,
    },
    /// Return a task to unleased pending
    Reset {
        #[arg(value_name = "ID")]
        id: i64,

        /// Keep the task's submissions instead of deleting them
        #[arg(long = "keep-annotations")]
        keep_annotations: bool,
    },
    /// Clear the exported flag of a task
    Unexport {
        #[arg(value_name = "ID")]
        id: i64,
    },
}

#[derive(Args)]
pub struct TaskListArgs {
    /// Page number, starting at 1
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Tasks per page
    #[arg(long = "page-size", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Only list tasks with this status
    #[arg(long, value_enum)]
    pub status: Option<StatusFilter>,
}

impl TaskCommands {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        let admin = Admin::new(ctx.db.clone(), &ctx.config.uploads_dir);
        match self {
            TaskCommands::List(args) => {
                let page = admin
                    .list_tasks(args.page, args.page_size, args.status.map(Into::into))
                    .context("Failed to list tasks")?;
                print_json(&page)
            }
            TaskCommands::Show { id } => print_json(&admin.task_detail(TaskId(id))?),
            TaskCommands::Delete { id } => {
                let task = admin
                    .delete_task(TaskId(id))
                    .with_context(|| format!("Failed to delete task {}", id))?;
                print_json(&task)
            }
            TaskCommands::Reset {
                id,
                keep_annotations,
            } => {
                let deleted = admin
                    .reset_task(TaskId(id), keep_annotations)
                    .with_context(|| format!("Failed to reset task {}", id))?;
                print_json(&json!({ "taskId": id, "deletedAnnotations": deleted }))
            }
            TaskCommands::Unexport { id } => {
                admin
                    .unexport_task(TaskId(id))
                    .with_context(|| format!("Failed to unexport task {}", id))?;
                print_json(&json!({ "taskId": id, "exported": false }))
            }
        }
    }
}
