use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Admin-configurable knobs for a plugin, keyed by its `Plugin::name()`.
/// Distinct from `GatewayConfig`'s env-sourced flags: this is the part of a
/// plugin's configuration an operator can change at runtime through the
/// admin surface instead of a redeploy.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PluginConfig {
    pub name: String,
    pub enabled: bool,
    pub settings: Value,
}
