use crate::models::neutral::TokenUsage;
use crate::models::stream_event::ChunkEvent;
use bigdecimal::BigDecimal;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// A single streamed tool call as it is rebuilt from `tool_call_start`/
/// `tool_call_delta` chunks, keyed by its index within the response.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

struct AccumulatorEntry {
    output_text: String,
    tool_calls: BTreeMap<usize, AccumulatedToolCall>,
    usage: Option<TokenUsage>,
    model: String,
    first_chunk_at: Instant,
    last_chunk_at: Instant,
}

impl AccumulatorEntry {
    fn new(model: String) -> Self {
        let now = Instant::now();
        Self {
            output_text: String::new(),
            tool_calls: BTreeMap::new(),
            usage: None,
            model,
            first_chunk_at: now,
            last_chunk_at: now,
        }
    }
}

/// The final aggregation handed to the logging plugin once a stream's final
/// chunk has arrived. `cost` starts unset — the logging PostHook fills it in
/// once it has looked up the pricing row for `model`, keeping the accumulator
/// itself free of a pricing-manager dependency.
#[derive(Debug, Clone)]
pub struct FinalStreamData {
    pub request_id: Uuid,
    pub token_usage: Option<TokenUsage>,
    pub tool_calls: Vec<AccumulatedToolCall>,
    pub output_message: String,
    pub audio_output: Option<String>,
    pub transcription_output: Option<String>,
    pub cost: Option<BigDecimal>,
    pub model: String,
    pub object: String,
    pub latency_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ErrorStreamData {
    pub request_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum ProcessedStreamResponse {
    Final(FinalStreamData),
    Error(ErrorStreamData),
}

/// Per-request-id buffer that absorbs streamed chunk deltas and, on the
/// chunk marked final, produces a single aggregated summary. One entry per
/// in-flight stream; entries are removed as soon as they finalise or error,
/// so a stale sweep only ever catches requests whose client disconnected
/// without a terminal chunk.
pub struct StreamAccumulator {
    entries: DashMap<Uuid, AccumulatorEntry>,
}

impl StreamAccumulator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { entries: DashMap::new() })
    }

    /// Absorbs one chunk. Returns `Some` exactly once per request-id, on the
    /// chunk that finalises (or errors) the stream.
    pub fn absorb_chunk(&self, request_id: Uuid, model: &str, chunk: &ChunkEvent) -> Option<ProcessedStreamResponse> {
        let mut entry = self
            .entries
            .entry(request_id)
            .or_insert_with(|| AccumulatorEntry::new(model.to_string()));

        entry.last_chunk_at = Instant::now();

        if let Some(delta) = &chunk.content_delta {
            entry.output_text.push_str(delta);
        }

        if let Some(start) = &chunk.tool_call_start {
            entry.tool_calls.insert(
                start.index,
                AccumulatedToolCall {
                    id: start.id.clone(),
                    name: start.name.clone(),
                    arguments: String::new(),
                },
            );
        }

        if let Some(delta) = &chunk.tool_call_delta {
            entry
                .tool_calls
                .entry(delta.index)
                .or_default()
                .arguments
                .push_str(&delta.arguments_delta);
        }

        if let Some(usage) = &chunk.usage {
            entry.usage = Some(usage.clone());
        }

        if !chunk.is_final {
            return None;
        }

        drop(entry);
        let (_, entry) = self.entries.remove(&request_id)?;
        Some(ProcessedStreamResponse::Final(FinalStreamData {
            request_id,
            token_usage: entry.usage,
            tool_calls: entry.tool_calls.into_values().collect(),
            output_message: entry.output_text,
            audio_output: None,
            transcription_output: None,
            cost: None,
            model: entry.model,
            object: "chat.completion.chunk".to_string(),
            latency_ms: entry.last_chunk_at.duration_since(entry.first_chunk_at).as_millis() as i64,
        }))
    }

    /// Short-circuits a stream on upstream/transport error, producing an
    /// error summary and discarding any partial accumulation.
    pub fn fail(&self, request_id: Uuid, message: impl Into<String>) -> ProcessedStreamResponse {
        self.entries.remove(&request_id);
        ProcessedStreamResponse::Error(ErrorStreamData {
            request_id,
            message: message.into(),
        })
    }

    /// Explicit cleanup entry point for request abort, independent of the
    /// chunk-driven finalisation path.
    pub fn cleanup(&self, request_id: &Uuid) {
        self.entries.remove(request_id);
    }

    /// Removes entries whose last chunk is older than `max_age`; returns how
    /// many were swept. Guards against a client that disconnects mid-stream
    /// without ever sending (or us ever observing) a final chunk.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let cutoff = Instant::now();
        let stale: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|entry| cutoff.duration_since(entry.last_chunk_at) >= max_age)
            .map(|entry| *entry.key())
            .collect();
        let count = stale.len();
        for request_id in stale {
            self.entries.remove(&request_id);
        }
        count
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries.len()
    }
}

/// Background sweep for abandoned streams, analogous to the governance
/// reset worker's interval loop. Default `max_age` 30 minutes, default
/// `cleanup_interval` 5 minutes.
pub fn spawn_cleanup_worker(accumulator: Arc<StreamAccumulator>, max_age: Duration, cleanup_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            ticker.tick().await;
            let swept = accumulator.sweep_stale(max_age);
            if swept > 0 {
                warn!(swept, "swept stale stream accumulator entries");
            } else {
                debug!("stream accumulator sweep found nothing stale");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stream_event::{ToolCallDelta, ToolCallStart};

    fn chunk(content: Option<&str>, is_final: bool) -> ChunkEvent {
        ChunkEvent {
            request_id: "r1".to_string(),
            role: None,
            content_delta: content.map(str::to_string),
            tool_call_start: None,
            tool_call_delta: None,
            stop_reason: None,
            usage: None,
            is_final,
        }
    }

    #[test]
    fn absorbs_until_final_then_emits_once() {
        let acc = StreamAccumulator::new();
        let id = Uuid::new_v4();
        assert!(acc.absorb_chunk(id, "gpt-4o", &chunk(Some("Hel"), false)).is_none());
        assert!(acc.absorb_chunk(id, "gpt-4o", &chunk(Some("lo"), false)).is_none());

        let mut final_chunk = chunk(None, true);
        final_chunk.usage = Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 2,
            total_tokens: 12,
            ..Default::default()
        });
        let result = acc.absorb_chunk(id, "gpt-4o", &final_chunk);
        match result {
            Some(ProcessedStreamResponse::Final(data)) => {
                assert_eq!(data.output_message, "Hello");
                assert_eq!(data.token_usage.unwrap().total_tokens, 12);
            }
            _ => panic!("expected final response"),
        }
        assert_eq!(acc.in_flight_count(), 0);
    }

    #[test]
    fn tool_call_start_and_delta_merge_by_index() {
        let acc = StreamAccumulator::new();
        let id = Uuid::new_v4();

        let mut start_chunk = chunk(None, false);
        start_chunk.tool_call_start = Some(ToolCallStart {
            index: 0,
            id: "call_1".to_string(),
            name: "get_weather".to_string(),
        });
        acc.absorb_chunk(id, "gpt-4o", &start_chunk);

        let mut delta_chunk = chunk(None, false);
        delta_chunk.tool_call_delta = Some(ToolCallDelta {
            index: 0,
            arguments_delta: "{\"city\":".to_string(),
        });
        acc.absorb_chunk(id, "gpt-4o", &delta_chunk);

        let mut delta_chunk2 = chunk(None, false);
        delta_chunk2.tool_call_delta = Some(ToolCallDelta {
            index: 0,
            arguments_delta: "\"nyc\"}".to_string(),
        });
        acc.absorb_chunk(id, "gpt-4o", &delta_chunk2);

        let result = acc.absorb_chunk(id, "gpt-4o", &chunk(None, true));
        match result {
            Some(ProcessedStreamResponse::Final(data)) => {
                assert_eq!(data.tool_calls.len(), 1);
                assert_eq!(data.tool_calls[0].arguments, "{\"city\":\"nyc\"}");
            }
            _ => panic!("expected final response"),
        }
    }

    #[test]
    fn fail_discards_partial_state() {
        let acc = StreamAccumulator::new();
        let id = Uuid::new_v4();
        acc.absorb_chunk(id, "gpt-4o", &chunk(Some("partial"), false));
        let result = acc.fail(id, "upstream disconnected");
        match result {
            ProcessedStreamResponse::Error(data) => assert_eq!(data.message, "upstream disconnected"),
            _ => panic!("expected error response"),
        }
        assert_eq!(acc.in_flight_count(), 0);
    }
}
