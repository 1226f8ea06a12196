use crate::models::governance::ProviderAllowance;
use rand::Rng;

/// Weighted-random selection over a VK's qualifying provider-configs: sample
/// uniformly in `[0, total)` and linear-scan cumulative weights. When the
/// weights sum to zero, falls through to the first candidate rather than
/// rejecting the configuration (pinned by an explicit Open Question in the
/// governing spec).
pub fn select_weighted<'a>(candidates: &'a [ProviderAllowance]) -> Option<&'a ProviderAllowance> {
    select_weighted_with_rng(candidates, &mut rand::rng())
}

pub fn select_weighted_with_rng<'a, R: Rng>(
    candidates: &'a [ProviderAllowance],
    rng: &mut R,
) -> Option<&'a ProviderAllowance> {
    if candidates.is_empty() {
        return None;
    }

    let total: f64 = candidates.iter().map(|c| c.weight).sum();
    if total <= 0.0 {
        return candidates.first();
    }

    let draw = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    for candidate in candidates {
        cumulative += candidate.weight;
        if draw < cumulative {
            return Some(candidate);
        }
    }
    candidates.last()
}

/// Filters a VK's provider-configs to those whose allowed-models list is
/// empty or contains `model`, per the transport interceptor's first step.
pub fn qualifying_providers<'a>(
    candidates: &'a [ProviderAllowance],
    model: &str,
) -> Vec<&'a ProviderAllowance> {
    candidates.iter().filter(|c| c.allows_model(model)).collect()
}

/// Remaining providers in descending weight order, for the `fallbacks` list.
pub fn fallback_order<'a>(
    candidates: &[&'a ProviderAllowance],
    selected: &ProviderAllowance,
) -> Vec<&'a ProviderAllowance> {
    let mut rest: Vec<&ProviderAllowance> = candidates
        .iter()
        .copied()
        .filter(|c| c.provider != selected.provider)
        .collect();
    rest.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    rest
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn allowance(provider: &str, weight: f64) -> ProviderAllowance {
        ProviderAllowance {
            provider: provider.to_string(),
            weight,
            allowed_models: vec![],
        }
    }

    #[test]
    fn single_candidate_is_deterministic() {
        let candidates = vec![allowance("openai", 1.0)];
        let mut rng = StdRng::seed_from_u64(1);
        let selected = select_weighted_with_rng(&candidates, &mut rng).unwrap();
        assert_eq!(selected.provider, "openai");
    }

    #[test]
    fn zero_weight_falls_through_to_first() {
        let candidates = vec![allowance("openai", 0.0), allowance("anthropic", 0.0)];
        let mut rng = StdRng::seed_from_u64(7);
        let selected = select_weighted_with_rng(&candidates, &mut rng).unwrap();
        assert_eq!(selected.provider, "openai");
    }

    #[test]
    fn converges_to_weight_ratio() {
        let candidates = vec![allowance("openai", 0.8), allowance("anthropic", 0.2)];
        let mut rng = StdRng::seed_from_u64(42);
        let mut openai_count = 0;
        const N: usize = 10_000;
        for _ in 0..N {
            if select_weighted_with_rng(&candidates, &mut rng).unwrap().provider == "openai" {
                openai_count += 1;
            }
        }
        let ratio = openai_count as f64 / N as f64;
        assert!((ratio - 0.8).abs() < 0.03, "ratio was {ratio}");
    }

    #[test]
    fn fallback_order_is_descending_weight_excluding_selected() {
        let candidates = vec![allowance("openai", 0.8), allowance("anthropic", 0.2)];
        let refs: Vec<&ProviderAllowance> = candidates.iter().collect();
        let fallbacks = fallback_order(&refs, &candidates[0]);
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].provider, "anthropic");
    }
}
