use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::TenantRegistry;

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "List tenants in the catalog")]
    List,

    #[command(about = "Open a tenant connection and check it responds")]
    Probe {
        #[arg(help = "Tenant key (defaults to the configured default tenant)")]
        tenant: Option<String>,
    },

    #[command(about = "Create missing tables in a tenant database")]
    Migrate {
        #[arg(help = "Tenant key (defaults to the configured default tenant)")]
        tenant: Option<String>,
    },
}

pub async fn handle(cmd: TenantCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let registry = TenantRegistry::global()?;

    match cmd {
        TenantCommands::List => {
            let catalog = registry.catalog();
            if catalog.is_empty() {
                return output_empty_collection(&output_format, "tenants", "No tenants configured");
            }

            match output_format {
                OutputFormat::Json => {
                    let tenants: Vec<_> = catalog
                        .iter()
                        .map(|(key, entry)| {
                            json!({
                                "key": key,
                                "dialect": entry.dialect,
                                "database": entry.database,
                                "host": entry.host,
                                "migrate_on_connect": entry.migrate_on_connect,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json!({ "tenants": tenants }))?);
                }
                OutputFormat::Text => {
                    println!("{:<20} {:<10} {:<20} {}", "KEY", "DIALECT", "HOST", "DATABASE");
                    println!("{}", "-".repeat(70));

                    for (key, entry) in catalog.iter() {
                        let dialect = serde_json::to_value(entry.dialect)?;
                        println!(
                            "{:<20} {:<10} {:<20} {}",
                            key,
                            dialect.as_str().unwrap_or_default(),
                            entry.host.as_deref().unwrap_or("-"),
                            entry.database
                        );
                    }
                }
            }

            Ok(())
        }
        TenantCommands::Probe { tenant } => {
            let key = resolve_tenant(tenant);
            let conn = registry.get_or_create(&key).await?;
            registry.probe(&key).await?;

            output_success(
                &output_format,
                &format!("Tenant '{}' is reachable", key),
                Some(json!({ "tenant": key, "connected_at": conn.created_at() })),
            )
        }
        TenantCommands::Migrate { tenant } => {
            let key = resolve_tenant(tenant);
            let conn = registry.get_or_create(&key).await?;
            let statements = conn.migrate().await?;

            output_success(
                &output_format,
                &format!("Tenant '{}' schema up to date ({} statements)", key, statements),
                Some(json!({ "tenant": key, "statements": statements })),
            )
        }
    }
}
