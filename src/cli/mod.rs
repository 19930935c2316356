pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "pms")]
#[command(about = "PMS CLI - tenant maintenance for the project-management data core")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Tenant catalog, connectivity and schema")]
    Tenant {
        #[command(subcommand)]
        cmd: commands::tenant::TenantCommands,
    },

    #[command(about = "Scheduled maintenance jobs")]
    Job {
        #[command(subcommand)]
        cmd: commands::job::JobCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Tenant { cmd } => commands::tenant::handle(cmd, output_format).await,
        Commands::Job { cmd } => commands::job::handle(cmd, output_format).await,
    }
}
