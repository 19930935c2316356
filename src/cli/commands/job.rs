use chrono::Utc;
use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::TenantRegistry;
use crate::jobs;

#[derive(Subcommand)]
pub enum JobCommands {
    #[command(about = "Stop every task left running and credit its worked minutes")]
    StopRunningTasks {
        #[arg(long, help = "Tenant key (defaults to the configured default tenant)")]
        tenant: Option<String>,

        #[arg(long, help = "Run against every tenant in the catalog")]
        all: bool,
    },
}

pub async fn handle(cmd: JobCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let registry = TenantRegistry::global()?;

    match cmd {
        JobCommands::StopRunningTasks { tenant, all } => {
            let keys: Vec<String> = if all {
                registry.catalog().keys().map(str::to_string).collect()
            } else {
                vec![resolve_tenant(tenant)]
            };

            let now = Utc::now();
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                let conn = registry.get_or_create(&key).await?;
                let report = jobs::stop_running_tasks(&conn, now).await?;
                if let OutputFormat::Text = output_format {
                    println!("{:<20} stopped {}", key, report.stopped);
                }
                results.push(json!({ "tenant": key, "stopped": report.stopped, "tasks": report.tasks }));
            }

            registry.close_all().await;

            let stopped: usize = results.iter().filter_map(|r| r["stopped"].as_u64()).sum::<u64>() as usize;
            output_success(
                &output_format,
                &format!("Stopped {} running task(s)", stopped),
                Some(json!({ "results": results })),
            )
        }
    }
}
