use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use ra_core::{Admin, ExportId, ExportRequest, Exporter, TaskId, TimeRange};

use crate::{print_json, AppContext};

/// Arguments for producing an export archive
#[derive(Args)]
pub struct ExportArgs {
    /// Earliest completion time to include (RFC 3339)
    #[arg(long, value_name = "RFC3339")]
    pub start: Option<DateTime<Utc>>,

    /// Latest completion time to include (RFC 3339)
    #[arg(long, value_name = "RFC3339")]
    pub end: Option<DateTime<Utc>>,

    /// Include tasks that were already exported
    #[arg(long)]
    pub all: bool,

    /// Export exactly these task ids, whatever their status
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub ids: Vec<i64>,

    /// Only export tasks whose filename contains this text (case-insensitive)
    #[arg(long, value_name = "SUBSTR")]
    pub filter: Option<String>,
}

impl ExportArgs {
    pub fn request(&self) -> Result<ExportRequest> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                anyhow::bail!("--start {} is after --end {}", start, end);
            }
        }
        Ok(ExportRequest {
            ids: (!self.ids.is_empty()).then(|| self.ids.iter().copied().map(TaskId).collect()),
            range: TimeRange::new(self.start, self.end),
            only_unexported: !self.all,
            filename_filter: self.filter.clone(),
        })
    }

    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        let request = self.request()?;
        let exporter = Exporter::new(ctx.store(), ctx.clock.clone(), ctx.config.export_settings());
        let outcome = exporter.export(&request).context("Export failed")?;
        print_json(&outcome)
    }
}

/// Export archive commands
#[derive(Subcommand)]
pub enum ExportsCommands {
    /// List produced archives, newest first
    List,
    /// Delete an export record and its archive
    Delete {
        #[arg(value_name = "ID")]
        id: i64,
    },
}

impl ExportsCommands {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        let admin = Admin::new(ctx.db.clone(), &ctx.config.uploads_dir);
        match self {
            ExportsCommands::List => print_json(&admin.list_exports()?),
            ExportsCommands::Delete { id } => {
                let entry = admin
                    .delete_export(ExportId(id))
                    .with_context(|| format!("Failed to delete export {}", id))?;
                print_json(&entry)
            }
        }
    }
}
