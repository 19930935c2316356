use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub filter: FilterConfig,
    pub database: DatabaseConfig,
    pub tenants: TenantConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub max_limit: Option<i32>,
    pub max_nested_depth: u32,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Upper bound of pooled connections per tenant
    pub max_connections: u32,
    /// Seconds a transaction start waits for a free connection before failing
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    /// Interval of the tenant liveness probe; 0 disables the monitor
    pub health_probe_interval_secs: u64,
    pub enable_slow_query_warning: bool,
    pub slow_query_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// YAML tenant catalog; when absent a single tenant is derived from DATABASE_URL
    pub catalog_path: Option<String>,
    pub default_tenant: String,
    pub table_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub cors_origins: Vec<String>,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn health_probe_interval(&self) -> Option<Duration> {
        match self.health_probe_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Filter overrides
        if let Ok(v) = env::var("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.parse().ok();
        }
        if let Ok(v) = env::var("FILTER_MAX_NESTED_DEPTH") {
            self.filter.max_nested_depth = v.parse().unwrap_or(self.filter.max_nested_depth);
        }
        if let Ok(v) = env::var("FILTER_DEBUG_LOGGING") {
            self.filter.debug_logging = v.parse().unwrap_or(self.filter.debug_logging);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            self.database.acquire_timeout_secs = v.parse().unwrap_or(self.database.acquire_timeout_secs);
        }
        if let Ok(v) = env::var("DATABASE_IDLE_TIMEOUT_SECS") {
            self.database.idle_timeout_secs = v.parse().ok();
        }
        if let Ok(v) = env::var("DATABASE_HEALTH_PROBE_INTERVAL_SECS") {
            self.database.health_probe_interval_secs = v.parse().unwrap_or(self.database.health_probe_interval_secs);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_SLOW_QUERY_WARNING") {
            self.database.enable_slow_query_warning = v.parse().unwrap_or(self.database.enable_slow_query_warning);
        }
        if let Ok(v) = env::var("DATABASE_SLOW_QUERY_THRESHOLD_MS") {
            self.database.slow_query_threshold_ms = v.parse().unwrap_or(self.database.slow_query_threshold_ms);
        }

        // Tenant overrides
        if let Ok(v) = env::var("PMS_TENANT_CATALOG") {
            self.tenants.catalog_path = Some(v).filter(|p| !p.trim().is_empty());
        }
        if let Ok(v) = env::var("PMS_DEFAULT_TENANT") {
            self.tenants.default_tenant = v;
        }
        if let Ok(v) = env::var("DB_PREFIX") {
            self.tenants.table_prefix = v;
        }

        // API overrides
        if let Ok(v) = env::var("PMS_API_PORT").or_else(|_| env::var("PORT")) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_CORS_ORIGINS") {
            self.api.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        self
    }

    fn tenant_defaults() -> TenantConfig {
        TenantConfig {
            catalog_path: None,
            default_tenant: "default-shared".to_string(),
            table_prefix: "pms".to_string(),
        }
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            filter: FilterConfig {
                max_limit: Some(1000),
                max_nested_depth: 10,
                debug_logging: true,
            },
            database: DatabaseConfig {
                max_connections: 10,
                acquire_timeout_secs: 30,
                idle_timeout_secs: Some(600),
                health_probe_interval_secs: 0,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 100,
            },
            tenants: Self::tenant_defaults(),
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            filter: FilterConfig {
                max_limit: Some(500),
                max_nested_depth: 5,
                debug_logging: false,
            },
            database: DatabaseConfig {
                max_connections: 10,
                acquire_timeout_secs: 10,
                idle_timeout_secs: Some(600),
                health_probe_interval_secs: 60,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 500,
            },
            tenants: Self::tenant_defaults(),
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            filter: FilterConfig {
                max_limit: Some(100),
                max_nested_depth: 3,
                debug_logging: false,
            },
            database: DatabaseConfig {
                max_connections: 10,
                acquire_timeout_secs: 5,
                idle_timeout_secs: Some(300),
                health_probe_interval_secs: 30,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 1000,
            },
            tenants: Self::tenant_defaults(),
            api: ApiConfig {
                port: 3000,
                enable_request_logging: false,
                cors_origins: vec!["https://app.example.com".to_string()],
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.filter.max_limit, Some(1000));
        assert_eq!(config.database.max_connections, 10);
        assert!(config.database.health_probe_interval().is_none());
        assert_eq!(config.tenants.default_tenant, "default-shared");
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.filter.max_limit, Some(100));
        assert_eq!(config.database.acquire_timeout(), Duration::from_secs(5));
        assert_eq!(config.database.health_probe_interval(), Some(Duration::from_secs(30)));
    }
}
