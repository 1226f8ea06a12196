use crate::models::neutral::UpstreamErrorClass;
use std::time::Duration;

/// Exponential backoff bounded by `initial` and `max`, doubling per attempt.
pub fn backoff_delay(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let scaled = initial_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX).max(1));
    Duration::from_millis(scaled.min(max_ms))
}

pub fn should_retry(class: UpstreamErrorClass, attempt: u32, max_retries: u32) -> bool {
    class.is_retriable() && attempt < max_retries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        assert_eq!(backoff_delay(0, 250, 5000), Duration::from_millis(250));
        assert_eq!(backoff_delay(1, 250, 5000), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, 250, 5000), Duration::from_millis(1000));
        assert_eq!(backoff_delay(10, 250, 5000), Duration::from_millis(5000));
    }

    #[test]
    fn only_retriable_classes_retry() {
        assert!(should_retry(UpstreamErrorClass::Timeout, 0, 2));
        assert!(should_retry(UpstreamErrorClass::Upstream5xx, 1, 2));
        assert!(!should_retry(UpstreamErrorClass::Upstream4xx, 0, 2));
        assert!(!should_retry(UpstreamErrorClass::Malformed, 0, 2));
        assert!(!should_retry(UpstreamErrorClass::Timeout, 2, 2));
    }
}
