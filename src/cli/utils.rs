use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::config::CONFIG;

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = serde_json::Map::new();
            response.insert("success".to_string(), json!(true));
            response.insert("message".to_string(), json!(message));

            if let Some(Value::Object(extra)) = data {
                response.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&Value::Object(response))?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(output_format: &OutputFormat, collection_name: &str, message: &str) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    collection_name: []
                }))?
            );
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

/// Explicit tenant, or the configured default
pub fn resolve_tenant(tenant: Option<String>) -> String {
    tenant.unwrap_or_else(|| CONFIG.tenants.default_tenant.clone())
}
