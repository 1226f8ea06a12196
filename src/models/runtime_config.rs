use crate::admin::log_ws::LogTailBroadcaster;
use crate::config::settings::AppSettings;
use crate::db::repositories::governance_repository::GovernanceRepository;
use crate::dispatcher::worker_pool::Dispatcher;
use crate::governance::store::GovernanceStore;
use crate::mcp::registry::McpRegistry;
use crate::models::plugin_config::PluginConfig;
use crate::pipeline::chain::PluginChain;
use crate::pricing::manager::PricingManager;
use crate::streaming::accumulator::StreamAccumulator;
use dashmap::DashMap;
use std::sync::Arc;

/// Everything a transport or admin handler needs, shared across the worker
/// threads `HttpServer` spawns per the teacher's `web::Data<AppState>`
/// pattern. Built once at startup in `main.rs` and cloned cheaply (every
/// field is already an `Arc`) into each request.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppSettings>,
    pub dispatcher: Arc<Dispatcher>,
    pub plugin_chain: Arc<PluginChain>,
    pub governance: Arc<GovernanceStore>,
    pub governance_repository: Arc<GovernanceRepository>,
    pub pricing: Arc<PricingManager>,
    pub accumulator: Arc<StreamAccumulator>,
    pub log_repository: Arc<crate::db::repositories::log_repository::LogRepository>,
    pub mcp: Arc<McpRegistry>,
    pub log_tail: Arc<LogTailBroadcaster>,
    pub plugin_configs: Arc<DashMap<String, PluginConfig>>,
}