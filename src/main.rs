use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod admin;
mod config;
mod db;
mod dispatcher;
mod error;
mod governance;
mod mcp;
mod models;
mod pipeline;
mod plugins;
mod pricing;
mod providers;
mod streaming;
mod transport;

use crate::admin::log_ws::LogTailBroadcaster;
use crate::config::AppSettings;
use crate::db::connection::{create_pool, verify_connection};
use crate::db::repositories::governance_repository::GovernanceRepository;
use crate::db::repositories::log_repository::LogRepository;
use crate::db::repositories::pricing_repository::PricingRepository;
use crate::dispatcher::worker_pool::Dispatcher;
use crate::governance::store::GovernanceStore;
use crate::mcp::registry::McpRegistry;
use crate::models::runtime_config::AppState;
use crate::pipeline::chain::PluginChain;
use crate::plugins::{GovernancePlugin, JsonRepairPlugin, LoggingPlugin};
use crate::pricing::manager::PricingManager;
use crate::providers::build_client;
use crate::streaming::accumulator::StreamAccumulator;
use dashmap::DashMap;

const LOG_BUFFER_SIZE: usize = 1024;
const LOG_WRITER_WORKERS: usize = 4;
const STREAM_MAX_AGE: Duration = Duration::from_secs(3600);
const STREAM_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const JSON_REPAIR_MAX_AGE: Duration = Duration::from_secs(600);
const JSON_REPAIR_CLEANUP_INTERVAL: Duration = Duration::from_secs(120);
const GOVERNANCE_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match AppSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "failed to load application settings from environment");
            std::process::exit(1);
        }
    };

    let db_pool = match create_pool(&settings.database).await {
        Ok(pool) => {
            if let Err(e) = verify_connection(&pool).await {
                error!(error = %e, "database connection verification failed");
                std::process::exit(1);
            }
            info!("database connection established");
            pool
        }
        Err(e) => {
            error!(error = %e, "failed to create database connection pool");
            std::process::exit(1);
        }
    };

    let settings = Arc::new(settings);
    let governance_repository = Arc::new(GovernanceRepository::new(db_pool.clone()));
    let pricing_repository = Arc::new(PricingRepository::new(db_pool.clone()));
    let log_repository = Arc::new(LogRepository::new(db_pool));
    let governance = GovernanceStore::new();
    let accumulator = StreamAccumulator::new();
    let pricing = PricingManager::new(settings.gateway.pricing_datasheet_url.clone());
    let mcp = McpRegistry::new();
    let log_tail = LogTailBroadcaster::new();

    if let Err(e) = governance_repository.load_into(&governance).await {
        error!(error = %e, "failed to load governance configuration from database");
        std::process::exit(1);
    }
    let plugin_configs = Arc::new(DashMap::new());
    match governance_repository.list_plugin_configs().await {
        Ok(configs) => {
            for config in configs {
                plugin_configs.insert(config.name.clone(), config);
            }
        }
        Err(e) => {
            error!(error = %e, "failed to load plugin configs from database");
            std::process::exit(1);
        }
    }
    governance::reset_worker::spawn_reset_worker(governance.clone());
    governance::persistence_worker::spawn_checkpoint_worker(
        governance.clone(),
        governance_repository.clone(),
        GOVERNANCE_CHECKPOINT_INTERVAL,
    );

    let persisted_pricing_rows = match pricing_repository.load_rows().await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "failed to load pricing rows from database");
            std::process::exit(1);
        }
    };
    if let Err(e) = pricing.startup_refresh(persisted_pricing_rows).await {
        error!(error = %e, "pricing datasheet startup refresh failed");
        std::process::exit(1);
    }
    pricing::manager::persist_snapshot(&pricing, &pricing_repository).await;
    pricing::manager::spawn_refresh_worker(pricing.clone(), pricing_repository.clone());
    streaming::accumulator::spawn_cleanup_worker(accumulator.clone(), STREAM_MAX_AGE, STREAM_CLEANUP_INTERVAL);

    let json_repair = JsonRepairPlugin::new();
    plugins::json_repair::spawn_cleanup_worker(json_repair.clone(), JSON_REPAIR_MAX_AGE, JSON_REPAIR_CLEANUP_INTERVAL);

    let logging = LoggingPlugin::new(
        log_repository.clone(),
        pricing.clone(),
        accumulator.clone(),
        LOG_BUFFER_SIZE,
        LOG_WRITER_WORKERS,
        Some(log_tail.clone() as Arc<dyn crate::plugins::LogSubscriber>),
    );
    plugins::logging::spawn_cleanup_worker(log_repository.clone());

    let governance_plugin = GovernancePlugin::new(governance.clone(), settings.gateway.allow_direct_keys);

    // Registration order matters: governance runs first so a denial never
    // reaches the repair/logging plugins' PreHook, but every plugin's
    // PostHook still runs (in reverse) regardless of where PreHook stopped.
    let plugin_chain = Arc::new(PluginChain::new(vec![governance_plugin, json_repair, logging]));

    let dispatcher = Dispatcher::new(settings.gateway.drop_excess_requests);
    for provider_config in settings.providers.clone() {
        let name = provider_config.name.clone();
        match build_client(provider_config.clone()) {
            Ok(client) => dispatcher.register_provider(provider_config, client),
            Err(e) => {
                error!(provider = %name, error = %e, "failed to build provider client, skipping");
            }
        }
    }

    let app_state = AppState {
        settings: settings.clone(),
        dispatcher,
        plugin_chain,
        governance,
        governance_repository,
        pricing,
        accumulator,
        log_repository,
        mcp,
        log_tail,
        plugin_configs,
    };

    let host = settings.server.host.clone();
    let port = settings.server.port;
    let server_addr = format!("{host}:{port}");
    info!(address = %server_addr, "starting gateway");
    let listener = TcpListener::bind(&server_addr)?;

    HttpServer::new(move || {
        let app_state = web::Data::new(app_state.clone());

        let mut cors = Cors::default().supports_credentials();
        if app_state.settings.server.allowed_origins.iter().any(|o| o == "*") {
            cors = cors.allow_any_origin();
        } else {
            for origin in &app_state.settings.server.allowed_origins {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors.allow_any_method().allow_any_header();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(app_state.clone())
            .app_data(web::PayloadConfig::new(
                app_state.settings.server.max_request_body_size_mb * 1024 * 1024,
            ))
            .configure(transport::configure)
            .service(web::scope("/admin").configure(admin::configure))
    })
    .listen(listener)?
    .run()
    .await
}
