use anyhow::{Context, Result};
use clap::Subcommand;
use ra_core::AnnotatorAccounts;
use serde_json::json;

use crate::{print_json, AppContext};

/// Annotator account commands
#[derive(Subcommand)]
pub enum AnnotatorCommands {
    /// Create an annotator account
    Add {
        #[arg(value_name = "USERNAME")]
        username: String,

        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Check a username and password, printing the annotator id
    Verify {
        #[arg(value_name = "USERNAME")]
        username: String,

        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
}

impl AnnotatorCommands {
    pub async fn run(self, ctx: &AppContext) -> Result<()> {
        let accounts = AnnotatorAccounts::new(ctx.db.clone(), ctx.clock.clone());
        match self {
            AnnotatorCommands::Add { username, password } => {
                let id = accounts
                    .create(&username, &password)
                    .with_context(|| format!("Failed to create annotator '{}'", username))?;
                print_json(&json!({ "id": id, "username": username.trim() }))
            }
            AnnotatorCommands::Verify { username, password } => {
                let id = accounts.verify(&username, &password)?;
                print_json(&json!({ "id": id, "username": username.trim() }))
            }
        }
    }
}
