use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Pricing modes, one per distinct billing shape a provider request can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    Chat,
    Completion,
    Responses,
    Embedding,
    AudioSpeech,
    AudioTranscription,
}

/// Keyed by `(provider, model, mode)`. Carries per-token rates and the
/// optional tiers the cost calculator applies in priority order: above-128k,
/// cache read/write, batch, then base rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRow {
    pub provider: String,
    pub model: String,
    pub mode: PricingMode,
    pub input_cost_per_token: BigDecimal,
    pub output_cost_per_token: BigDecimal,
    pub input_cost_per_token_above_128k_tokens: Option<BigDecimal>,
    pub output_cost_per_token_above_128k_tokens: Option<BigDecimal>,
    pub cache_read_input_token_cost: Option<BigDecimal>,
    pub cache_write_input_token_cost: Option<BigDecimal>,
    pub input_cost_per_token_batches: Option<BigDecimal>,
    pub output_cost_per_token_batches: Option<BigDecimal>,
    pub input_cost_per_second: Option<BigDecimal>,
    pub input_cost_per_image: Option<BigDecimal>,
}

impl PricingRow {
    pub fn key(provider: &str, model: &str, mode: PricingMode) -> String {
        format!("{provider}:{model}:{mode:?}")
    }

    pub fn own_key(&self) -> String {
        Self::key(&self.provider, &self.model, self.mode)
    }
}
