use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use ra_core::{AnnotatorId, Deduplicator, LeaseCoordinator, TaskId};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use crate::{print_json, AppContext};

/// Default number of entries shown by `progress`
pub const DEFAULT_PROGRESS_LIMIT: usize = 20;

fn coordinator(ctx: &AppContext) -> LeaseCoordinator {
    LeaseCoordinator::new(ctx.store(), ctx.clock.clone())
}

/// Lease commands
#[derive(Subcommand)]
pub enum LeaseCommands {
    /// Lease a task to an annotator, or return the one already held
    Acquire {
        #[arg(long, value_name = "ID")]
        annotator: i64,

        /// Lease duration in minutes [default: 30]
        #[arg(long = "lease-minutes", env = "RA_LEASE_MINUTES", value_name = "MINUTES")]
        lease_minutes: Option<f64>,
    },
    /// Record a liveness ping for an annotator
    Heartbeat {
        #[arg(long, value_name = "ID")]
        annotator: i64,
    },
    /// Clear the lease on a task
    Release {
        #[arg(value_name = "TASK")]
        task: i64,
    },
    /// Clear every lease held by an annotator
    ReleaseAll {
        #[arg(long, value_name = "ID")]
        annotator: i64,
    },
    /// Mark a task completed
    Complete {
        #[arg(value_name = "TASK")]
        task: i64,

        /// Only complete if this annotator holds the lease
        #[arg(long, value_name = "ID")]
        annotator: Option<i64>,
    },
}

impl LeaseCommands {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        let coordinator = coordinator(ctx);
        match self {
            LeaseCommands::Acquire {
                annotator,
                lease_minutes,
            } => {
                let minutes = lease_minutes.unwrap_or(ctx.config.lease_minutes);
                let task = coordinator
                    .acquire_lease(AnnotatorId(annotator), minutes)
                    .with_context(|| format!("Failed to acquire a lease for annotator {}", annotator))?;
                if task.is_none() {
                    info!(annotator_id = annotator, "No task available");
                }
                print_json(&task)
            }
            LeaseCommands::Heartbeat { annotator } => {
                coordinator.heartbeat(AnnotatorId(annotator))?;
                print_json(&json!({ "annotatorId": annotator, "ok": true }))
            }
            LeaseCommands::Release { task } => {
                coordinator.release(TaskId(task))?;
                print_json(&json!({ "taskId": task, "released": true }))
            }
            LeaseCommands::ReleaseAll { annotator } => {
                let released = coordinator.release_all(AnnotatorId(annotator))?;
                print_json(&json!({ "annotatorId": annotator, "released": released }))
            }
            LeaseCommands::Complete { task, annotator } => {
                let completed = match annotator {
                    Some(annotator) => coordinator.complete_as(TaskId(task), AnnotatorId(annotator)),
                    None => coordinator.complete(TaskId(task)),
                };
                completed.with_context(|| format!("Failed to complete task {}", task))?;
                print_json(&json!({ "taskId": task, "completed": true }))
            }
        }
    }
}

/// Arguments for submitting annotation content
#[derive(Args)]
pub struct SubmitArgs {
    #[arg(long, value_name = "ID")]
    pub annotator: i64,

    /// Annotation content as JSON text
    #[arg(long, value_name = "JSON", conflicts_with = "content_file", required_unless_present = "content_file")]
    pub content: Option<String>,

    /// Read the annotation content from FILE
    #[arg(long = "content-file", value_name = "FILE")]
    pub content_file: Option<PathBuf>,
}

impl SubmitArgs {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        let content = match (self.content, self.content_file) {
            (Some(content), _) => content,
            (None, Some(path)) => tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
            (None, None) => anyhow::bail!("Either --content or --content-file is required"),
        };
        let submission = coordinator(ctx)
            .submit(AnnotatorId(self.annotator), &content)
            .context("Submission rejected")?;
        print_json(&submission)
    }
}

/// Arguments for showing an annotator's progress
#[derive(Args)]
pub struct ProgressArgs {
    #[arg(long, value_name = "ID")]
    pub annotator: i64,

    /// Maximum number of recent entries
    #[arg(long, default_value_t = DEFAULT_PROGRESS_LIMIT)]
    pub limit: usize,
}

impl ProgressArgs {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        let dedup = Deduplicator::new(ctx.store());
        let annotator = AnnotatorId(self.annotator);
        let completed = dedup.unique_task_count(annotator)?;
        let recent = dedup.latest_unique_for_annotator(annotator, self.limit)?;
        print_json(&json!({
            "annotatorId": self.annotator,
            "uniqueTasks": completed,
            "recent": recent,
        }))
    }
}
