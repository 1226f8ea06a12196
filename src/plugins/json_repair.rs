use crate::error::AppError;
use crate::models::neutral::NeutralResponse;
use crate::pipeline::context::RequestContext;
use crate::pipeline::plugin::{Plugin, PreHookOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

const HEADER: &str = "enable-streaming-json-parser";

struct Buffer {
    content: String,
    last_seen: Instant,
}

/// Per-request opt-in plugin: while a caller streams `delta.content` chunks
/// with a header opting in, this accumulates them and writes a repaired,
/// parseable JSON string back into each chunk, so a consumer reading
/// partial JSON mid-stream never sees a syntactically broken document.
pub struct JsonRepairPlugin {
    buffers: DashMap<Uuid, Buffer>,
}

impl JsonRepairPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { buffers: DashMap::new() })
    }

    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<Uuid> = self
            .buffers
            .iter()
            .filter(|e| now.duration_since(e.last_seen) >= max_age)
            .map(|e| *e.key())
            .collect();
        let count = stale.len();
        for id in stale {
            self.buffers.remove(&id);
        }
        count
    }
}

#[async_trait]
impl Plugin for JsonRepairPlugin {
    fn name(&self) -> &'static str {
        "json_repair"
    }

    async fn pre_hook(&self, _ctx: &mut RequestContext, request: crate::models::neutral::NeutralRequest) -> Result<PreHookOutcome, AppError> {
        Ok(PreHookOutcome::Continue(request))
    }

    async fn post_hook(
        &self,
        ctx: &mut RequestContext,
        response: Option<NeutralResponse>,
        error: Option<&AppError>,
    ) -> (Option<NeutralResponse>, Option<AppError>) {
        if error.is_some() {
            self.buffers.remove(&ctx.request_id);
            return (response, None);
        }

        let enabled = ctx.headers.get(HEADER).map(|v| v == "true").unwrap_or(false);
        if !enabled {
            return (response, None);
        }

        let Some(mut resp) = response else {
            return (None, None);
        };

        let Some(content) = resp.delta.as_ref().and_then(|d| d.get("content")).and_then(|c| c.as_str()).map(str::to_string) else {
            return (Some(resp), None);
        };

        let snapshot = {
            let mut entry = self.buffers.entry(ctx.request_id).or_insert_with(|| Buffer {
                content: String::new(),
                last_seen: Instant::now(),
            });
            entry.content.push_str(&content);
            entry.last_seen = Instant::now();
            entry.content.clone()
        };

        match repair_partial_json(&snapshot) {
            Some(repaired) => {
                if let Some(obj) = resp.delta.as_mut().and_then(|d| d.as_object_mut()) {
                    obj.insert("content".to_string(), Value::String(repaired));
                }
                if resp.is_final {
                    self.buffers.remove(&ctx.request_id);
                }
                (Some(resp), None)
            }
            None => {
                debug!(request_id = %ctx.request_id, "json repair: no parseable prefix, dropping chunk");
                self.buffers.remove(&ctx.request_id);
                (None, None)
            }
        }
    }

    async fn cleanup(&self, ctx: &RequestContext) {
        self.buffers.remove(&ctx.request_id);
    }
}

/// Returns a JSON string parseable from `buf`, per the algorithm: accept as
/// is if already valid, else close open brackets/strings, else fall back to
/// the longest prefix (after closing) that parses.
fn repair_partial_json(buf: &str) -> Option<String> {
    if serde_json::from_str::<Value>(buf).is_ok() {
        return Some(buf.to_string());
    }

    let closed = close_structure(buf);
    if serde_json::from_str::<Value>(&closed).is_ok() {
        return Some(closed);
    }

    longest_valid_prefix(buf)
}

/// Walks `buf` tracking a stack of unclosed `{`/`[` and whether the cursor
/// is inside a string (honouring `\` escapes), then closes everything still
/// open at the end.
fn close_structure(buf: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in buf.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = buf.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Binary-searches the longest character prefix of `buf` that parses once
/// closed, since the shortest invalid tail is usually a half-written token
/// rather than a structural break.
fn longest_valid_prefix(buf: &str) -> Option<String> {
    let chars: Vec<char> = buf.chars().collect();
    if chars.is_empty() {
        return None;
    }

    let mut lo = 0usize;
    let mut hi = chars.len();
    let mut best: Option<String> = None;

    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let candidate: String = chars[..mid].iter().collect();
        let closed = close_structure(&candidate);
        if serde_json::from_str::<Value>(&closed).is_ok() {
            best = Some(closed);
            lo = mid + 1;
        } else if mid == 0 {
            break;
        } else {
            hi = mid - 1;
        }
    }

    best
}

/// Sweeps buffers idle for `max_age` (default 30 min), waking every
/// `cleanup_interval` (default 5 min), mirroring the streaming accumulator's
/// own abandoned-stream sweep.
pub fn spawn_cleanup_worker(plugin: Arc<JsonRepairPlugin>, max_age: Duration, cleanup_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            ticker.tick().await;
            let swept = plugin.sweep_stale(max_age);
            if swept > 0 {
                debug!(swept, "json repair plugin: swept stale buffers");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn already_valid_json_is_unchanged() {
        let input = r#"{"a": 1, "b": [1, 2, 3]}"#;
        assert_eq!(repair_partial_json(input).unwrap(), input);
    }

    #[test]
    fn closes_unterminated_object_and_string() {
        let input = r#"{"name": "Ada, "age": 30"#;
        let repaired = repair_partial_json(input).unwrap();
        assert!(serde_json::from_str::<Value>(&repaired).is_ok());
    }

    #[test]
    fn closes_nested_array_and_object() {
        let input = r#"{"items": [1, 2, {"x": 3"#;
        let repaired = repair_partial_json(input).unwrap();
        let parsed: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(parsed["items"][2]["x"], 3);
    }

    #[test]
    fn trailing_lone_backslash_is_dropped_before_closing_quote() {
        let input = r#"{"text": "line one\"#;
        let repaired = repair_partial_json(input).unwrap();
        assert!(serde_json::from_str::<Value>(&repaired).is_ok());
    }

    #[test]
    fn garbage_prefix_falls_back_to_longest_valid_prefix() {
        let input = r#"{"a": 1}garbage{{{"#;
        let repaired = repair_partial_json(input).unwrap();
        assert!(serde_json::from_str::<Value>(&repaired).is_ok());
    }

    #[test]
    fn empty_buffer_has_no_repair() {
        assert!(repair_partial_json("").is_none());
    }

    proptest! {
        #[test]
        fn repairing_a_repaired_buffer_is_idempotent(s in "[a-zA-Z0-9{}\\[\\]\":, ]{0,64}") {
            if let Some(first) = repair_partial_json(&s) {
                let second = repair_partial_json(&first);
                prop_assert_eq!(second.as_deref(), Some(first.as_str()));
            }
        }
    }
}
