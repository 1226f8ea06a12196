use crate::db::repositories::log_repository::{LogRepository, LogUpdate};
use crate::error::AppError;
use crate::models::log_entry::{LogEntry, LogStatus};
use crate::models::neutral::{NeutralResponse, RequestKind, TokenUsage};
use crate::models::pricing::PricingMode;
use crate::models::stream_event::ChunkEvent;
use crate::pipeline::context::RequestContext;
use crate::pipeline::plugin::{Plugin, PreHookOutcome};
use crate::pricing::cost_calculator::calculate_cost;
use crate::pricing::manager::PricingManager;
use crate::streaming::accumulator::{ProcessedStreamResponse, StreamAccumulator};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

/// Caps how many recycled buffers a pool holds, so a traffic burst followed
/// by a quiet period doesn't let the free list grow without bound.
const POOL_CAP: usize = 256;

/// Free-list of recycled `LogUpdate` buffers. `post_hook` fills one per
/// response; `log_writer_loop` hands it back once the write completes,
/// instead of letting it drop and forcing a fresh allocation on the next
/// request.
struct LogUpdatePool {
    free: StdMutex<Vec<LogUpdate>>,
}

impl LogUpdatePool {
    fn new() -> Self {
        Self { free: StdMutex::new(Vec::new()) }
    }

    fn acquire(&self) -> LogUpdate {
        let mut update = self.free.lock().unwrap().pop().unwrap_or_default();
        update.reset();
        update
    }

    fn release(&self, update: LogUpdate) {
        let mut free = self.free.lock().unwrap();
        if free.len() < POOL_CAP {
            free.push(update);
        }
    }
}

/// Free-list of recycled `PendingMeta` buffers. Unlike `LogUpdatePool`,
/// reuse here actually keeps the `provider`/`model` `String` allocations
/// alive across requests instead of dropping and reallocating them.
struct PendingMetaPool {
    free: StdMutex<Vec<PendingMeta>>,
}

impl PendingMetaPool {
    fn new() -> Self {
        Self { free: StdMutex::new(Vec::new()) }
    }

    fn acquire(&self, provider: &str, model: &str, kind: RequestKind, streaming: bool) -> PendingMeta {
        let mut meta = self.free.lock().unwrap().pop().unwrap_or_else(|| PendingMeta {
            provider: String::new(),
            model: String::new(),
            kind,
            streaming,
        });
        meta.provider.clear();
        meta.provider.push_str(provider);
        meta.model.clear();
        meta.model.push_str(model);
        meta.kind = kind;
        meta.streaming = streaming;
        meta
    }

    fn release(&self, meta: PendingMeta) {
        let mut free = self.free.lock().unwrap();
        if free.len() < POOL_CAP {
            free.push(meta);
        }
    }
}

fn pricing_mode(kind: RequestKind) -> PricingMode {
    match kind {
        RequestKind::TextCompletion => PricingMode::Completion,
        RequestKind::ChatCompletion => PricingMode::Chat,
        RequestKind::Responses => PricingMode::Responses,
        RequestKind::Embedding => PricingMode::Embedding,
        RequestKind::SpeechSynthesis => PricingMode::AudioSpeech,
        RequestKind::Transcription => PricingMode::AudioTranscription,
    }
}

/// Callback surface for the live-tail UI stream; errors here never affect
/// persistence, per the logging plugin's contract.
pub trait LogSubscriber: Send + Sync {
    fn on_create(&self, entry: &LogEntry) {
        let _ = entry;
    }
    fn on_update(&self, request_id: Uuid, update: &LogUpdate) {
        let _ = (request_id, update);
    }
}

enum LogTask {
    Create(LogEntry),
    Update(Uuid, LogUpdate),
}

#[derive(Clone)]
struct PendingMeta {
    provider: String,
    model: String,
    kind: RequestKind,
    streaming: bool,
}

/// Persists one row per request through its lifecycle, per the request-id
/// keyed accumulator for streams. Writes happen on a small fixed pool of
/// background workers draining a bounded channel, the logging analogue of
/// the dispatcher's per-provider worker pool: a full channel drops the
/// create (recorded via `ctx.dropped_create`) rather than blocking the
/// request path, since this plugin must never block it.
pub struct LoggingPlugin {
    pricing: Arc<PricingManager>,
    accumulator: Arc<StreamAccumulator>,
    sender: mpsc::Sender<LogTask>,
    pending: DashMap<Uuid, PendingMeta>,
    update_pool: Arc<LogUpdatePool>,
    meta_pool: PendingMetaPool,
}

impl LoggingPlugin {
    pub fn new(
        repo: Arc<LogRepository>,
        pricing: Arc<PricingManager>,
        accumulator: Arc<StreamAccumulator>,
        buffer_size: usize,
        workers: usize,
        subscriber: Option<Arc<dyn LogSubscriber>>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<LogTask>(buffer_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let update_pool = Arc::new(LogUpdatePool::new());

        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            let repo = repo.clone();
            let subscriber = subscriber.clone();
            let update_pool = update_pool.clone();
            tokio::spawn(async move {
                log_writer_loop(receiver, repo, subscriber, update_pool).await;
            });
        }

        Arc::new(Self {
            pricing,
            accumulator,
            sender,
            pending: DashMap::new(),
            update_pool,
            meta_pool: PendingMetaPool::new(),
        })
    }

    fn cost_for(&self, meta: &PendingMeta, usage: &TokenUsage) -> Option<bigdecimal::BigDecimal> {
        self.pricing
            .lookup(&meta.provider, &meta.model, pricing_mode(meta.kind))
            .map(|row| calculate_cost(&row, usage))
    }
}

fn chunk_from_response(request_id: Uuid, response: &NeutralResponse) -> ChunkEvent {
    let content_delta = response
        .delta
        .as_ref()
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string);

    ChunkEvent {
        request_id: request_id.to_string(),
        role: None,
        content_delta,
        tool_call_start: None,
        tool_call_delta: None,
        stop_reason: None,
        usage: response.usage.clone(),
        is_final: response.is_final,
    }
}

#[async_trait]
impl Plugin for LoggingPlugin {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn pre_hook(
        &self,
        ctx: &mut RequestContext,
        request: crate::models::neutral::NeutralRequest,
    ) -> Result<PreHookOutcome, AppError> {
        self.pending.insert(
            ctx.request_id,
            self.meta_pool.acquire(&request.provider, &request.model, request.kind, request.streaming),
        );

        let mut entry = LogEntry::new_processing(
            ctx.request_id,
            &request.provider,
            &request.model,
            request.streaming,
            request.payload.clone(),
        );
        if let Some(parent) = ctx.parent_request_id {
            entry = entry.as_fallback_of(parent);
        }

        match self.sender.try_send(LogTask::Create(entry)) {
            Ok(()) => {}
            Err(_) => {
                ctx.dropped_create = true;
                warn!(request_id = %ctx.request_id, "logging plugin: create dropped, buffer full");
            }
        }

        Ok(PreHookOutcome::Continue(request))
    }

    async fn post_hook(
        &self,
        ctx: &mut RequestContext,
        response: Option<NeutralResponse>,
        error: Option<&AppError>,
    ) -> (Option<NeutralResponse>, Option<AppError>) {
        if ctx.dropped_create {
            self.remove_pending(ctx.request_id);
            return (response, None);
        }

        let Some(meta) = self.pending.get(&ctx.request_id).map(|m| m.clone()) else {
            return (response, None);
        };

        let latency_ms = (chrono::Utc::now() - ctx.created_at).num_milliseconds();

        if let Some(err) = error {
            self.remove_pending(ctx.request_id);
            if meta.streaming {
                self.accumulator.fail(ctx.request_id, err.to_string());
            }
            let mut update = self.update_pool.acquire();
            update.status = LogStatus::Error;
            update.error_details = Some(json!({ "message": err.to_string() }));
            update.latency_ms = Some(latency_ms);
            let _ = self.sender.try_send(LogTask::Update(ctx.request_id, update));
            return (response, None);
        }

        let Some(resp) = response.clone() else {
            return (response, None);
        };
        let mut response = response;

        if meta.streaming {
            let chunk = chunk_from_response(ctx.request_id, &resp);
            match self.accumulator.absorb_chunk(ctx.request_id, &meta.model, &chunk) {
                Some(ProcessedStreamResponse::Final(data)) => {
                    self.remove_pending(ctx.request_id);
                    let cost = data.token_usage.as_ref().and_then(|u| self.cost_for(&meta, u));
                    if let Some(r) = response.as_mut() {
                        r.cost = cost.clone();
                    }
                    let mut update = self.update_pool.acquire();
                    update.status = LogStatus::Success;
                    update.output_message = Some(json!(data.output_message));
                    update.prompt_tokens = data.token_usage.as_ref().map(|u| u.prompt_tokens);
                    update.completion_tokens = data.token_usage.as_ref().map(|u| u.completion_tokens);
                    update.total_tokens = data.token_usage.as_ref().map(|u| u.total_tokens);
                    update.cost = cost;
                    update.latency_ms = Some(data.latency_ms);
                    let _ = self.sender.try_send(LogTask::Update(ctx.request_id, update));
                }
                Some(ProcessedStreamResponse::Error(data)) => {
                    self.remove_pending(ctx.request_id);
                    let mut update = self.update_pool.acquire();
                    update.status = LogStatus::Error;
                    update.error_details = Some(json!({ "message": data.message }));
                    update.latency_ms = Some(latency_ms);
                    let _ = self.sender.try_send(LogTask::Update(ctx.request_id, update));
                }
                None => {}
            }
        } else {
            self.remove_pending(ctx.request_id);
            let cost = resp.usage.as_ref().and_then(|u| self.cost_for(&meta, u));
            if let Some(r) = response.as_mut() {
                r.cost = cost.clone();
            }
            let mut update = self.update_pool.acquire();
            update.status = LogStatus::Success;
            update.output_message = resp.choices.clone();
            update.prompt_tokens = resp.usage.as_ref().map(|u| u.prompt_tokens);
            update.completion_tokens = resp.usage.as_ref().map(|u| u.completion_tokens);
            update.total_tokens = resp.usage.as_ref().map(|u| u.total_tokens);
            update.cost = cost;
            update.cache_debug = resp.extra.cache_debug.as_ref().map(|d| json!(d));
            update.latency_ms = Some(latency_ms);
            let _ = self.sender.try_send(LogTask::Update(ctx.request_id, update));
        }

        (response, None)
    }

    async fn cleanup(&self, ctx: &RequestContext) {
        self.remove_pending(ctx.request_id);
        self.accumulator.cleanup(&ctx.request_id);
    }
}

impl LoggingPlugin {
    fn remove_pending(&self, request_id: Uuid) {
        if let Some((_, meta)) = self.pending.remove(&request_id) {
            self.meta_pool.release(meta);
        }
    }
}

async fn log_writer_loop(
    receiver: Arc<Mutex<mpsc::Receiver<LogTask>>>,
    repo: Arc<LogRepository>,
    subscriber: Option<Arc<dyn LogSubscriber>>,
    update_pool: Arc<LogUpdatePool>,
) {
    loop {
        let task = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let Some(task) = task else {
            return;
        };

        match task {
            LogTask::Create(entry) => {
                if let Err(e) = repo.insert_processing(&entry).await {
                    warn!(error = %e, request_id = %entry.request_id, "logging plugin: create failed");
                }
                if let Some(subscriber) = &subscriber {
                    subscriber.on_create(&entry);
                }
            }
            LogTask::Update(request_id, update) => {
                if let Err(e) = repo.apply_update_with_retry(request_id, &update).await {
                    warn!(error = %e, %request_id, "logging plugin: update failed");
                }
                if let Some(subscriber) = &subscriber {
                    subscriber.on_update(request_id, &update);
                }
                update_pool.release(update);
            }
        }
    }
}

/// Sweeps rows still `processing` older than five minutes, presumed
/// abandoned; wakes every 30 seconds per the logging plugin's contract.
pub fn spawn_cleanup_worker(repo: Arc<LogRepository>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::minutes(5);
            match repo.cleanup_abandoned(cutoff).await {
                Ok(n) if n > 0 => warn!(removed = n, "logging plugin: swept abandoned processing rows"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "logging plugin: cleanup sweep failed"),
            }
        }
    })
}
