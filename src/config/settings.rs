use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub rate_limit: RateLimitConfig,
    pub providers: Vec<ProviderConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub initial_pool_size: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub url: String,
    pub allowed_origins: Vec<String>,
    pub max_request_body_size_mb: usize,
}

/// Gateway-wide behaviour toggles, from spec.md §6's "Configuration surface".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub drop_excess_requests: bool,
    pub prometheus_labels: Vec<String>,
    pub enable_logging: bool,
    pub enable_governance: bool,
    pub enforce_governance_header: bool,
    pub allow_direct_keys: bool,
    pub enable_litellm_fallbacks: bool,
    pub pricing_datasheet_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u64,
    pub use_redis: bool,
    pub redis_url: Option<String>,
    pub redis_key_prefix: Option<String>,
    pub cleanup_interval_secs: u64,
}

/// Proxy mode for a provider's outbound HTTP client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProxyMode {
    None,
    Http(String),
    Socks5(String),
    Environment,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub max_concurrency: usize,
    pub queue_buffer: usize,
    pub extra_headers: Vec<(String, String)>,
    pub proxy: ProxyMode,
    /// Fallback credential used when a request carries no per-VK credential.
    pub default_api_key: Option<String>,
    /// AWS region, only meaningful for the bedrock adapter.
    pub region: Option<String>,
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "gateway-core".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Configuration("DATABASE_URL must be set".to_string()))?;

        let initial_pool_size = env::var("DB_INITIAL_POOL_SIZE")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()
            .map_err(|_| {
                AppError::Configuration("DB_INITIAL_POOL_SIZE must be a valid number".to_string())
            })?;

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| {
                AppError::Configuration("SERVER_PORT must be a valid port number".to_string())
            })?;
        let server_url = env::var("SERVER_URL")
            .unwrap_or_else(|_| format!("http://{server_host}:{server_port}"));

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let max_request_body_size_mb = env::var("MAX_REQUEST_BODY_SIZE_MB")
            .unwrap_or_else(|_| "25".to_string())
            .parse::<usize>()
            .map_err(|_| {
                AppError::Configuration(
                    "MAX_REQUEST_BODY_SIZE_MB must be a valid number".to_string(),
                )
            })?;

        let drop_excess_requests = env::var("DROP_EXCESS_REQUESTS")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|_| {
                AppError::Configuration("DROP_EXCESS_REQUESTS must be true or false".to_string())
            })?;

        let prometheus_labels = env::var("PROMETHEUS_LABELS")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().to_string())
            .collect();

        let enable_logging = env::var("ENABLE_LOGGING")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .map_err(|_| {
                AppError::Configuration("ENABLE_LOGGING must be true or false".to_string())
            })?;

        let enable_governance = env::var("ENABLE_GOVERNANCE")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .map_err(|_| {
                AppError::Configuration("ENABLE_GOVERNANCE must be true or false".to_string())
            })?;

        let enforce_governance_header = env::var("ENFORCE_GOVERNANCE_HEADER")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|_| {
                AppError::Configuration(
                    "ENFORCE_GOVERNANCE_HEADER must be true or false".to_string(),
                )
            })?;

        let allow_direct_keys = env::var("ALLOW_DIRECT_KEYS")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|_| {
                AppError::Configuration("ALLOW_DIRECT_KEYS must be true or false".to_string())
            })?;

        let enable_litellm_fallbacks = env::var("ENABLE_LITELLM_FALLBACKS")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|_| {
                AppError::Configuration(
                    "ENABLE_LITELLM_FALLBACKS must be true or false".to_string(),
                )
            })?;

        let rate_limit_window_ms = env::var("RATE_LIMIT_WINDOW_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration("RATE_LIMIT_WINDOW_MS must be a valid number".to_string())
            })?;

        let rate_limit_max_requests = env::var("RATE_LIMIT_MAX_REQUESTS")
            .unwrap_or_else(|_| "600".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration(
                    "RATE_LIMIT_MAX_REQUESTS must be a valid number".to_string(),
                )
            })?;

        let rate_limit_use_redis = env::var("RATE_LIMIT_USE_REDIS")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .map_err(|_| {
                AppError::Configuration("RATE_LIMIT_USE_REDIS must be true or false".to_string())
            })?;

        let rate_limit_redis_url = env::var("RATE_LIMIT_REDIS_URL").ok();
        let rate_limit_redis_key_prefix = env::var("RATE_LIMIT_REDIS_KEY_PREFIX").ok();

        let rate_limit_cleanup_interval_secs = env::var("RATE_LIMIT_CLEANUP_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration(
                    "RATE_LIMIT_CLEANUP_INTERVAL_SECS must be a valid number".to_string(),
                )
            })?;

        let pricing_datasheet_url = env::var("PRICING_DATASHEET_URL").unwrap_or_else(|_| {
            "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json".to_string()
        });

        let providers = Self::providers_from_env()?;

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            database: DatabaseConfig {
                url: database_url,
                initial_pool_size,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                url: server_url,
                allowed_origins,
                max_request_body_size_mb,
            },
            gateway: GatewayConfig {
                drop_excess_requests,
                prometheus_labels,
                enable_logging,
                enable_governance,
                enforce_governance_header,
                allow_direct_keys,
                enable_litellm_fallbacks,
                pricing_datasheet_url,
            },
            rate_limit: RateLimitConfig {
                window_ms: rate_limit_window_ms,
                max_requests: rate_limit_max_requests,
                use_redis: rate_limit_use_redis,
                redis_url: rate_limit_redis_url,
                redis_key_prefix: rate_limit_redis_key_prefix,
                cleanup_interval_secs: rate_limit_cleanup_interval_secs,
            },
            providers,
        })
    }

    /// Reads `GATEWAY_PROVIDERS` (a comma-separated list of provider names)
    /// and, for each, an optional `{NAME}_BASE_URL` / `{NAME}_TIMEOUT_SECS` /
    /// etc. override, falling back to documented defaults.
    fn providers_from_env() -> Result<Vec<ProviderConfig>, AppError> {
        let names = env::var("GATEWAY_PROVIDERS")
            .unwrap_or_else(|_| "openai,anthropic,bedrock".to_string());

        names
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|name| {
                let upper = name.to_uppercase();
                let base_url = env::var(format!("{upper}_BASE_URL")).ok();
                let timeout_secs = env::var(format!("{upper}_TIMEOUT_SECS"))
                    .unwrap_or_else(|_| "60".to_string())
                    .parse::<u64>()
                    .map_err(|_| {
                        AppError::Configuration(format!(
                            "{upper}_TIMEOUT_SECS must be a valid number"
                        ))
                    })?;
                let max_retries = env::var(format!("{upper}_MAX_RETRIES"))
                    .unwrap_or_else(|_| "2".to_string())
                    .parse::<u32>()
                    .map_err(|_| {
                        AppError::Configuration(format!(
                            "{upper}_MAX_RETRIES must be a valid number"
                        ))
                    })?;
                let backoff_initial_ms = env::var(format!("{upper}_BACKOFF_INITIAL_MS"))
                    .unwrap_or_else(|_| "250".to_string())
                    .parse::<u64>()
                    .map_err(|_| {
                        AppError::Configuration(format!(
                            "{upper}_BACKOFF_INITIAL_MS must be a valid number"
                        ))
                    })?;
                let backoff_max_ms = env::var(format!("{upper}_BACKOFF_MAX_MS"))
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse::<u64>()
                    .map_err(|_| {
                        AppError::Configuration(format!(
                            "{upper}_BACKOFF_MAX_MS must be a valid number"
                        ))
                    })?;
                let max_concurrency = env::var(format!("{upper}_MAX_CONCURRENCY"))
                    .unwrap_or_else(|_| "32".to_string())
                    .parse::<usize>()
                    .map_err(|_| {
                        AppError::Configuration(format!(
                            "{upper}_MAX_CONCURRENCY must be a valid number"
                        ))
                    })?;
                let queue_buffer = env::var(format!("{upper}_QUEUE_BUFFER"))
                    .unwrap_or_else(|_| "64".to_string())
                    .parse::<usize>()
                    .map_err(|_| {
                        AppError::Configuration(format!(
                            "{upper}_QUEUE_BUFFER must be a valid number"
                        ))
                    })?;
                let proxy = match env::var(format!("{upper}_PROXY")).ok().as_deref() {
                    None | Some("") | Some("none") => ProxyMode::None,
                    Some("environment") => ProxyMode::Environment,
                    Some(url) if url.starts_with("socks5://") => {
                        ProxyMode::Socks5(url.to_string())
                    }
                    Some(url) => ProxyMode::Http(url.to_string()),
                };

                let default_api_key = env::var(format!("{upper}_API_KEY")).ok();
                let region = env::var(format!("{upper}_REGION")).ok();

                Ok(ProviderConfig {
                    name: name.to_string(),
                    base_url,
                    timeout_secs,
                    max_retries,
                    backoff_initial_ms,
                    backoff_max_ms,
                    max_concurrency,
                    queue_buffer,
                    extra_headers: Vec::new(),
                    proxy,
                    default_api_key,
                    region,
                })
            })
            .collect()
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
