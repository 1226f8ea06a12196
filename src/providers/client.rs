use crate::config::settings::{ProviderConfig, ProxyMode};
use crate::error::AppError;
use reqwest::{Client, Proxy};
use std::time::Duration;

/// Builds the shared `reqwest::Client` a provider adapter sends requests
/// through. Timeout and connection pooling follow the gateway's long-running
/// AI call profile; proxying is opt-in per provider.
pub fn build_http_client(config: &ProviderConfig) -> Result<Client, AppError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(1740))
        .connect_timeout(Duration::from_secs(180))
        .pool_idle_timeout(Some(Duration::from_secs(240)))
        .tcp_keepalive(Duration::from_secs(60));

    builder = match &config.proxy {
        ProxyMode::None => builder.no_proxy(),
        ProxyMode::Environment => builder,
        ProxyMode::Http(url) => {
            let proxy = Proxy::all(url).map_err(|e| {
                AppError::Configuration(format!("invalid proxy url for {}: {e}", config.name))
            })?;
            builder.proxy(proxy)
        }
        ProxyMode::Socks5(url) => {
            let proxy = Proxy::all(url).map_err(|e| {
                AppError::Configuration(format!("invalid socks5 proxy url for {}: {e}", config.name))
            })?;
            builder.proxy(proxy)
        }
    };

    builder
        .build()
        .map_err(|e| AppError::Configuration(format!("failed to build http client for {}: {e}", config.name)))
}

/// Resolves the credential a request should present upstream: the per-request
/// value set by the governance plugin takes priority over the provider's
/// statically configured key.
pub fn resolve_credential<'a>(
    request_credential: &'a Option<String>,
    config: &'a ProviderConfig,
) -> Result<&'a str, AppError> {
    request_credential
        .as_deref()
        .or(config.default_api_key.as_deref())
        .ok_or_else(|| AppError::Configuration(format!("no credential available for provider '{}'", config.name)))
}
