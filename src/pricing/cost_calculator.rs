use crate::models::neutral::{CacheDebug, TokenUsage};
use crate::models::pricing::PricingRow;
use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;

const LONG_CONTEXT_THRESHOLD_TOKENS: i64 = 128_000;
const MIN_PRICE: &str = "0.0000000001";
const MAX_PRICE: i64 = 1000;

/// Priority-ordered usage source selection: `response.Usage` first, then a
/// synthesised PromptTokens-only record from speech usage, then transcribe
/// usage (preferring its token counts, keeping `Seconds` for duration-based
/// pricing).
pub enum UsageSource {
    Response(TokenUsage),
    Speech { prompt_tokens: i64 },
    Transcribe(TokenUsage),
}

impl UsageSource {
    pub fn into_token_usage(self) -> TokenUsage {
        match self {
            UsageSource::Response(u) => u,
            UsageSource::Speech { prompt_tokens } => TokenUsage {
                prompt_tokens,
                ..Default::default()
            },
            UsageSource::Transcribe(u) => u,
        }
    }
}

fn clamp_rate(rate: &BigDecimal) -> BigDecimal {
    let min_price = BigDecimal::from_str(MIN_PRICE).expect("valid literal");
    let max_price = BigDecimal::from(MAX_PRICE);
    if rate < &min_price {
        min_price
    } else if rate > &max_price {
        max_price
    } else {
        rate.clone()
    }
}

fn token_cost(tokens: i64, rate: &BigDecimal) -> BigDecimal {
    if tokens <= 0 {
        return BigDecimal::zero();
    }
    BigDecimal::from(tokens) * clamp_rate(rate)
}

/// Computes the cost of a single request from its price row and usage,
/// following the tier-selection order: above-128k, then audio-by-duration,
/// then audio-token-split, then cache-read, then batch, then the base rate.
pub fn calculate_cost(row: &PricingRow, usage: &TokenUsage) -> BigDecimal {
    let total_tokens = usage.prompt_tokens + usage.completion_tokens;
    let use_above_128k = total_tokens > LONG_CONTEXT_THRESHOLD_TOKENS;

    let input_rate = if use_above_128k {
        row.input_cost_per_token_above_128k_tokens
            .as_ref()
            .unwrap_or(&row.input_cost_per_token)
    } else {
        &row.input_cost_per_token
    };
    let output_rate = if use_above_128k {
        row.output_cost_per_token_above_128k_tokens
            .as_ref()
            .unwrap_or(&row.output_cost_per_token)
    } else {
        &row.output_cost_per_token
    };

    if let Some(seconds) = usage.audio_seconds {
        if let Some(per_second) = &row.input_cost_per_second {
            let input_cost = BigDecimal::from_str(&seconds.to_string())
                .unwrap_or_else(|_| BigDecimal::zero())
                * clamp_rate(per_second);
            let output_cost = token_cost(usage.completion_tokens, output_rate);
            return input_cost + output_cost;
        }
    }

    if let (Some(audio_in), Some(audio_out)) = (usage.audio_prompt_tokens, usage.audio_completion_tokens) {
        let text_in = (usage.prompt_tokens - audio_in).max(0);
        let text_out = (usage.completion_tokens - audio_out).max(0);
        return token_cost(audio_in, input_rate)
            + token_cost(text_in, input_rate)
            + token_cost(audio_out, output_rate)
            + token_cost(text_out, output_rate);
    }

    if let Some(cache_read) = usage.cache_read_tokens {
        if cache_read > 0 {
            let cache_rate = row.cache_read_input_token_cost.as_ref().unwrap_or(input_rate);
            let base_input = (usage.prompt_tokens - cache_read).max(0);
            return token_cost(base_input, input_rate)
                + token_cost(cache_read, cache_rate)
                + token_cost(usage.completion_tokens, output_rate);
        }
    }

    if row.input_cost_per_token_batches.is_some() || row.output_cost_per_token_batches.is_some() {
        let batch_in = row.input_cost_per_token_batches.as_ref().unwrap_or(input_rate);
        let batch_out = row.output_cost_per_token_batches.as_ref().unwrap_or(output_rate);
        return token_cost(usage.prompt_tokens, batch_in) + token_cost(usage.completion_tokens, batch_out);
    }

    token_cost(usage.prompt_tokens, input_rate) + token_cost(usage.completion_tokens, output_rate)
}

/// Cache-aware entry point (spec §4.F, §8 scenario 5): short-circuits the
/// normal calculation when `cache_debug` indicates a direct or semantic hit.
pub fn calculate_cache_aware_cost(
    row: &PricingRow,
    usage: &TokenUsage,
    cache_debug: Option<&CacheDebug>,
    embedding_row: Option<&PricingRow>,
) -> BigDecimal {
    match cache_debug {
        Some(debug) if debug.cache_hit => match debug.hit_type.as_deref() {
            Some("direct") => BigDecimal::zero(),
            Some("semantic") => match (embedding_row, debug.input_tokens) {
                (Some(embedding_row), Some(tokens)) => {
                    token_cost(tokens, &embedding_row.input_cost_per_token)
                }
                _ => BigDecimal::zero(),
            },
            _ => BigDecimal::zero(),
        },
        _ => {
            let response_cost = calculate_cost(row, usage);
            let embedding_cost = match (embedding_row, cache_debug.and_then(|d| d.input_tokens)) {
                (Some(embedding_row), Some(tokens)) => token_cost(tokens, &embedding_row.input_cost_per_token),
                _ => BigDecimal::zero(),
            };
            response_cost + embedding_cost
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pricing::PricingMode;

    fn row() -> PricingRow {
        PricingRow {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            mode: PricingMode::Chat,
            input_cost_per_token: BigDecimal::from_str("0.000001").unwrap(),
            output_cost_per_token: BigDecimal::from_str("0.000002").unwrap(),
            input_cost_per_token_above_128k_tokens: Some(BigDecimal::from_str("0.000002").unwrap()),
            output_cost_per_token_above_128k_tokens: None,
            cache_read_input_token_cost: Some(BigDecimal::from_str("0.0000005").unwrap()),
            cache_write_input_token_cost: None,
            input_cost_per_token_batches: None,
            output_cost_per_token_batches: None,
            input_cost_per_second: None,
            input_cost_per_image: None,
        }
    }

    #[test]
    fn above_128k_tier_is_used() {
        let usage = TokenUsage {
            prompt_tokens: 130_000,
            completion_tokens: 0,
            ..Default::default()
        };
        let cost = calculate_cost(&row(), &usage);
        assert_eq!(cost, BigDecimal::from_str("0.26").unwrap());
    }

    #[test]
    fn cache_hit_direct_is_free() {
        let usage = TokenUsage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            ..Default::default()
        };
        let cache_debug = CacheDebug {
            cache_hit: true,
            hit_type: Some("direct".to_string()),
            ..Default::default()
        };
        let cost = calculate_cache_aware_cost(&row(), &usage, Some(&cache_debug), None);
        assert_eq!(cost, BigDecimal::zero());
    }

    #[test]
    fn cache_hit_semantic_charges_only_embedding() {
        let embedding_row = PricingRow {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            mode: PricingMode::Embedding,
            input_cost_per_token: BigDecimal::from_str("0.00000002").unwrap(),
            output_cost_per_token: BigDecimal::zero(),
            input_cost_per_token_above_128k_tokens: None,
            output_cost_per_token_above_128k_tokens: None,
            cache_read_input_token_cost: None,
            cache_write_input_token_cost: None,
            input_cost_per_token_batches: None,
            output_cost_per_token_batches: None,
            input_cost_per_second: None,
            input_cost_per_image: None,
        };
        let usage = TokenUsage::default();
        let cache_debug = CacheDebug {
            cache_hit: true,
            hit_type: Some("semantic".to_string()),
            provider_used: Some("openai".to_string()),
            model_used: Some("gpt-4o-mini".to_string()),
            input_tokens: Some(200),
        };
        let cost = calculate_cache_aware_cost(&row(), &usage, Some(&cache_debug), Some(&embedding_row));
        assert_eq!(cost, BigDecimal::from_str("0.000004").unwrap());
    }

    #[test]
    fn plain_request_uses_base_rate() {
        let usage = TokenUsage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            ..Default::default()
        };
        let cost = calculate_cost(&row(), &usage);
        assert_eq!(cost, BigDecimal::from_str("0.002").unwrap());
    }
}
