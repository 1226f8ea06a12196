pub mod log_ws;

use crate::admin::log_ws::LogTailWs;
use crate::db::repositories::log_repository::LogFilter;
use crate::error::AppError;
use crate::models::governance::{Budget, Customer, OwnerRef, ProviderAllowance, RateLimit, SlidingCounter, Team, VirtualKey};
use crate::models::log_entry::LogStatus;
use crate::models::plugin_config::PluginConfig;
use crate::models::runtime_config::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct VirtualKeyBody {
    pub value: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub description: Option<String>,
    #[serde(default)]
    pub providers: Vec<ProviderAllowance>,
    pub upstream_credential_set: Option<String>,
    pub budget_id: Option<Uuid>,
    pub rate_limit_id: Option<Uuid>,
    #[serde(default)]
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}

async fn create_virtual_key(state: web::Data<AppState>, body: web::Json<VirtualKeyBody>) -> Result<HttpResponse, AppError> {
    let owner = match (body.team_id, body.customer_id) {
        (Some(id), _) => OwnerRef::Team(id),
        (None, Some(id)) => OwnerRef::Customer(id),
        (None, None) => OwnerRef::None,
    };
    let vk = VirtualKey {
        id: Uuid::new_v4(),
        value: body.value.clone(),
        name: body.name.clone(),
        active: body.active,
        description: body.description.clone(),
        providers: body.providers.clone(),
        upstream_credential_set: body.upstream_credential_set.clone(),
        budget_id: body.budget_id,
        rate_limit_id: body.rate_limit_id,
        owner,
    };
    state.governance_repository.upsert_virtual_key(&vk).await?;
    state.governance.upsert_virtual_key(vk.clone());
    Ok(HttpResponse::Created().json(vk))
}

async fn list_virtual_keys(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.governance.list_virtual_keys())
}

async fn get_virtual_key(state: web::Data<AppState>, value: web::Path<String>) -> Result<HttpResponse, AppError> {
    state
        .governance
        .get_virtual_key(&value)
        .map(|vk| HttpResponse::Ok().json(vk))
        .ok_or(AppError::VirtualKeyNotFound)
}

async fn delete_virtual_key(state: web::Data<AppState>, value: web::Path<String>) -> Result<HttpResponse, AppError> {
    state.governance_repository.delete_virtual_key(&value).await?;
    state
        .governance
        .remove_virtual_key(&value)
        .map(|_| HttpResponse::NoContent().finish())
        .ok_or(AppError::VirtualKeyNotFound)
}

#[derive(Deserialize)]
pub struct TeamBody {
    pub name: String,
    pub customer_id: Option<Uuid>,
    pub budget_id: Option<Uuid>,
}

async fn create_team(state: web::Data<AppState>, body: web::Json<TeamBody>) -> Result<HttpResponse, AppError> {
    let team = Team { id: Uuid::new_v4(), name: body.name.clone(), customer_id: body.customer_id, budget_id: body.budget_id };
    state.governance_repository.upsert_team(&team).await?;
    state.governance.upsert_team(team.clone());
    Ok(HttpResponse::Created().json(team))
}

async fn list_teams(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.governance.list_teams())
}

#[derive(Deserialize)]
pub struct CustomerBody {
    pub name: String,
    pub budget_id: Option<Uuid>,
}

async fn create_customer(state: web::Data<AppState>, body: web::Json<CustomerBody>) -> Result<HttpResponse, AppError> {
    let customer = Customer { id: Uuid::new_v4(), name: body.name.clone(), budget_id: body.budget_id };
    state.governance_repository.upsert_customer(&customer).await?;
    state.governance.upsert_customer(customer.clone());
    Ok(HttpResponse::Created().json(customer))
}

async fn list_customers(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.governance.list_customers())
}

#[derive(Deserialize)]
pub struct BudgetBody {
    pub max_limit: bigdecimal::BigDecimal,
    pub reset_duration: String,
}

async fn create_budget(state: web::Data<AppState>, body: web::Json<BudgetBody>) -> Result<HttpResponse, AppError> {
    let budget = Budget {
        id: Uuid::new_v4(),
        max_limit: body.max_limit.clone(),
        current_usage: bigdecimal::BigDecimal::from(0),
        last_reset: Utc::now(),
        reset_duration: body.reset_duration.clone(),
    };
    state.governance_repository.upsert_budget(&budget).await?;
    state.governance.upsert_budget(budget.clone());
    Ok(HttpResponse::Created().json(budget))
}

async fn list_budgets(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.governance.list_budgets())
}

#[derive(Deserialize)]
pub struct RateLimitBody {
    pub token_limit: Option<i64>,
    pub request_limit: Option<i64>,
    #[serde(default = "default_reset_duration")]
    pub reset_duration: String,
}

fn default_reset_duration() -> String {
    "1m".to_string()
}

async fn create_rate_limit(state: web::Data<AppState>, body: web::Json<RateLimitBody>) -> Result<HttpResponse, AppError> {
    let now = Utc::now();
    let counter = |max: i64| SlidingCounter { max_limit: max, current_usage: 0, reset_duration: body.reset_duration.clone(), last_reset: now };
    let rate_limit = RateLimit {
        id: Uuid::new_v4(),
        token_limit: body.token_limit.map(counter),
        request_limit: body.request_limit.map(counter),
    };
    state.governance_repository.upsert_rate_limit(&rate_limit).await?;
    state.governance.upsert_rate_limit(rate_limit.clone());
    Ok(HttpResponse::Created().json(rate_limit))
}

async fn list_rate_limits(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.governance.list_rate_limits())
}

async fn list_providers(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.dispatcher.list_providers())
}

#[derive(Deserialize)]
pub struct LogQuery {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

async fn list_logs(state: web::Data<AppState>, query: web::Query<LogQuery>) -> Result<HttpResponse, AppError> {
    let status = match query.status.as_deref() {
        Some("processing") => Some(LogStatus::Processing),
        Some("success") => Some(LogStatus::Success),
        Some("error") => Some(LogStatus::Error),
        Some(other) => return Err(AppError::Validation(format!("unknown log status '{other}'"))),
        None => None,
    };
    let filter = LogFilter { provider: query.provider.clone(), model: query.model.clone(), status, before: None };
    let entries = state.log_repository.list_recent(&filter, query.limit.unwrap_or(100)).await?;
    Ok(HttpResponse::Ok().json(entries.into_iter().map(|e| e.request_id).collect::<Vec<_>>()))
}

async fn pricing_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "last_sync": state.pricing.last_sync().await }))
}

async fn dropped_requests(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "dropped": state.dispatcher.dropped_count() }))
}

async fn core_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(&state.settings.gateway)
}

#[derive(Deserialize)]
pub struct PluginConfigBody {
    pub enabled: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
}

async fn list_plugin_configs(state: web::Data<AppState>) -> HttpResponse {
    let configs: Vec<PluginConfig> = state.plugin_configs.iter().map(|e| e.value().clone()).collect();
    HttpResponse::Ok().json(configs)
}

async fn update_plugin_config(
    state: web::Data<AppState>,
    name: web::Path<String>,
    body: web::Json<PluginConfigBody>,
) -> Result<HttpResponse, AppError> {
    let config = PluginConfig { name: name.into_inner(), enabled: body.enabled, settings: body.settings.clone() };
    state.governance_repository.upsert_plugin_config(&config).await?;
    state.plugin_configs.insert(config.name.clone(), config.clone());
    Ok(HttpResponse::Ok().json(config))
}

#[derive(Deserialize)]
pub struct McpClientBody {
    pub name: String,
    pub transport: McpTransportBody,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub skipped_tools: Vec<String>,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum McpTransportBody {
    Stdio { command: String, #[serde(default)] args: Vec<String>, #[serde(default)] env_allowlist: Vec<String> },
    Http { url: String },
    Sse { url: String },
}

async fn create_mcp_client(state: web::Data<AppState>, body: web::Json<McpClientBody>) -> Result<HttpResponse, AppError> {
    use crate::mcp::client::{McpClientConfig, McpTransport};
    let transport = match &body.transport {
        McpTransportBody::Stdio { command, args, env_allowlist } => {
            McpTransport::Stdio { command: command.clone(), args: args.clone(), env_allowlist: env_allowlist.clone() }
        }
        McpTransportBody::Http { url } => McpTransport::Http { url: url.clone() },
        McpTransportBody::Sse { url } => McpTransport::Sse { url: url.clone() },
    };
    let config = McpClientConfig::new(body.name.clone(), transport, body.allowed_tools.clone(), body.skipped_tools.clone())?;
    let client = state.mcp.register(config).await?;
    Ok(HttpResponse::Created().json(json!({ "name": client.config.name, "state": format!("{:?}", client.state().await) })))
}

async fn list_mcp_clients(state: web::Data<AppState>) -> HttpResponse {
    let mut out = Vec::new();
    for client in state.mcp.list() {
        out.push(json!({ "name": client.config.name, "state": format!("{:?}", client.state().await) }));
    }
    HttpResponse::Ok().json(out)
}

async fn delete_mcp_client(state: web::Data<AppState>, name: web::Path<String>) -> Result<HttpResponse, AppError> {
    state
        .mcp
        .remove(&name)
        .await
        .map(|_| HttpResponse::NoContent().finish())
        .ok_or_else(|| AppError::NotFound(format!("mcp client '{name}' not found")))
}

async fn log_tail_ws(req: HttpRequest, stream: web::Payload, state: web::Data<AppState>) -> Result<HttpResponse, actix_web::Error> {
    ws::WsResponseBuilder::new(LogTailWs::new(state.log_tail.clone()), &req, stream).start()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/virtual-keys", web::post().to(create_virtual_key))
        .route("/virtual-keys", web::get().to(list_virtual_keys))
        .route("/virtual-keys/{value}", web::get().to(get_virtual_key))
        .route("/virtual-keys/{value}", web::delete().to(delete_virtual_key))
        .route("/teams", web::post().to(create_team))
        .route("/teams", web::get().to(list_teams))
        .route("/customers", web::post().to(create_customer))
        .route("/customers", web::get().to(list_customers))
        .route("/budgets", web::post().to(create_budget))
        .route("/budgets", web::get().to(list_budgets))
        .route("/rate-limits", web::post().to(create_rate_limit))
        .route("/rate-limits", web::get().to(list_rate_limits))
        .route("/providers", web::get().to(list_providers))
        .route("/mcp-clients", web::post().to(create_mcp_client))
        .route("/mcp-clients", web::get().to(list_mcp_clients))
        .route("/mcp-clients/{name}", web::delete().to(delete_mcp_client))
        .route("/logs", web::get().to(list_logs))
        .route("/pricing/status", web::get().to(pricing_status))
        .route("/dropped-requests", web::get().to(dropped_requests))
        .route("/config", web::get().to(core_config))
        .route("/plugins", web::get().to(list_plugin_configs))
        .route("/plugins/{name}", web::put().to(update_plugin_config))
        .route("/logs/tail", web::get().to(log_tail_ws));
}
