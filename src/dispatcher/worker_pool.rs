use crate::config::settings::ProviderConfig;
use crate::dispatcher::policies::{backoff_delay, should_retry};
use crate::error::AppError;
use crate::models::neutral::NeutralRequest;
use crate::models::neutral::NeutralResponse;
use crate::providers::{classify_reqwest_error, ProviderClient};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

struct Job {
    request: NeutralRequest,
    deadline: Instant,
    respond_to: oneshot::Sender<Result<NeutralResponse, AppError>>,
}

struct ProviderQueue {
    sender: mpsc::Sender<Job>,
}

/// Per-provider bounded work queue and fixed worker-task pool. A request is
/// enqueued; a worker picks it up, performs the upstream call with retry,
/// and reports the neutral response back to the submitter through a oneshot
/// channel — the async equivalent of the teacher's per-stream `tokio::spawn`
/// task in `proxy_service.rs`, generalized into a standing pool instead of a
/// spawn per call.
pub struct Dispatcher {
    queues: DashMap<String, ProviderQueue>,
    clients: DashMap<String, Arc<dyn ProviderClient>>,
    configs: DashMap<String, ProviderConfig>,
    dropped_counter: Arc<AtomicU64>,
    drop_excess_requests: bool,
}

impl Dispatcher {
    pub fn new(drop_excess_requests: bool) -> Arc<Self> {
        Arc::new(Self {
            queues: DashMap::new(),
            clients: DashMap::new(),
            configs: DashMap::new(),
            dropped_counter: Arc::new(AtomicU64::new(0)),
            drop_excess_requests,
        })
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_counter.load(Ordering::Relaxed)
    }

    /// Configured providers, for the admin read surface. Reflects the set
    /// passed to `register_provider` at startup; there is no hot-reload.
    pub fn list_providers(&self) -> Vec<ProviderConfig> {
        self.configs.iter().map(|e| e.value().clone()).collect()
    }

    /// Registers a provider, spawning `concurrency` worker tasks consuming a
    /// channel of capacity `queue_buffer`.
    pub fn register_provider(self: &Arc<Self>, config: ProviderConfig, client: Arc<dyn ProviderClient>) {
        let (sender, receiver) = mpsc::channel::<Job>(config.queue_buffer.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for _ in 0..config.max_concurrency.max(1) {
            let receiver = receiver.clone();
            let client = client.clone();
            let config = config.clone();
            tokio::spawn(async move {
                worker_loop(receiver, client, config).await;
            });
        }

        self.queues.insert(config.name.clone(), ProviderQueue { sender });
        self.configs.insert(config.name.clone(), config.clone());
        self.clients.insert(config.name.clone(), client);
    }

    /// Submits a request to its provider's queue, honouring
    /// `drop_excess_requests` and the request's deadline. When the flag is
    /// set, a full queue drops the request immediately. When it's clear, the
    /// submitter instead waits for room up to the request's own deadline,
    /// trading a dropped request for added latency.
    pub async fn submit(&self, provider: &str, request: NeutralRequest) -> Result<NeutralResponse, AppError> {
        let config = self
            .configs
            .get(provider)
            .map(|c| c.clone())
            .ok_or_else(|| AppError::Configuration(format!("unknown provider '{provider}'")))?;
        let queue = self
            .queues
            .get(provider)
            .ok_or_else(|| AppError::Configuration(format!("provider '{provider}' has no worker pool")))?;

        let deadline = Instant::now() + config.timeout();
        let (respond_to, response_rx) = oneshot::channel();
        let job = Job {
            request,
            deadline,
            respond_to,
        };

        match queue.sender.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) if self.drop_excess_requests => {
                drop(job);
                self.dropped_counter.fetch_add(1, Ordering::Relaxed);
                warn!(provider, "dispatcher queue full, dropping request");
                return Err(AppError::Dropped);
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), queue.sender.send(job)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        return Err(AppError::Internal(format!("provider '{provider}' worker pool is shut down")));
                    }
                    Err(_) => {
                        warn!(provider, "dispatcher queue still full at deadline, giving up");
                        return Err(AppError::Timeout);
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Err(AppError::Internal(format!("provider '{provider}' worker pool is shut down")));
            }
        }

        match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::Internal("worker dropped response channel".to_string())),
            Err(_) => Err(AppError::Timeout),
        }
    }

    /// Hands a streaming request directly to the provider's client, bypassing
    /// the bounded-queue worker pool: an SSE connection is long-lived and
    /// doesn't fit the same one-job-in-one-job-out model as a unary call, so
    /// there is no queueing or retry here, just the lookup.
    pub async fn stream(
        &self,
        provider: &str,
        request: &NeutralRequest,
    ) -> Result<futures_util::stream::BoxStream<'static, Result<crate::models::stream_event::ChunkEvent, AppError>>, AppError> {
        let client = self
            .clients
            .get(provider)
            .map(|c| c.clone())
            .ok_or_else(|| AppError::Configuration(format!("unknown provider '{provider}'")))?;
        client.stream(request).await
    }

    /// Attempts `request` against its primary provider; on terminal failure,
    /// iterates `request.fallbacks` in order. `on_attempt` is invoked once
    /// per attempt (including the primary) so the caller can emit a linked
    /// log record per fallback, per §4.C.
    pub async fn submit_with_fallback(
        &self,
        request: NeutralRequest,
        mut on_attempt: impl FnMut(&str, &str),
    ) -> Result<NeutralResponse, AppError> {
        on_attempt(&request.provider, &request.model);
        let primary_provider = request.provider.clone();
        let fallbacks = request.fallbacks.clone();
        match self.submit(&primary_provider, request.clone()).await {
            Ok(response) => return Ok(response),
            Err(last_err) => {
                let mut last_err = last_err;
                for fallback in fallbacks {
                    let (provider, model) = match fallback.split_once('/') {
                        Some((p, m)) => (p.to_string(), m.to_string()),
                        None => continue,
                    };
                    on_attempt(&provider, &model);
                    let mut fallback_request = request.clone();
                    fallback_request.provider = provider.clone();
                    fallback_request.model = model;
                    fallback_request.fallbacks = Vec::new();
                    match self.submit(&provider, fallback_request).await {
                        Ok(response) => return Ok(response),
                        Err(e) => last_err = e,
                    }
                }
                Err(last_err)
            }
        }
    }
}

async fn worker_loop(
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    client: Arc<dyn ProviderClient>,
    config: ProviderConfig,
) {
    loop {
        let job = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            info!(provider = config.name, "dispatcher worker shutting down, channel closed");
            return;
        };

        if Instant::now() >= job.deadline {
            let _ = job.respond_to.send(Err(AppError::Timeout));
            continue;
        }

        let result = call_with_retry(&client, &job.request, &config, job.deadline).await;
        let _ = job.respond_to.send(result);
    }
}

async fn call_with_retry(
    client: &Arc<dyn ProviderClient>,
    request: &NeutralRequest,
    config: &ProviderConfig,
    deadline: Instant,
) -> Result<NeutralResponse, AppError> {
    let mut attempt = 0u32;
    loop {
        if Instant::now() >= deadline {
            return Err(AppError::Timeout);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = tokio::time::timeout(remaining, client.send(request)).await;

        let error = match outcome {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) => e,
            Err(_) => return Err(AppError::Timeout),
        };

        let class = classify_upstream_app_error(&error);
        if !should_retry(class, attempt, config.max_retries) {
            return Err(error);
        }
        attempt += 1;
        tokio::time::sleep(backoff_delay(attempt, config.backoff_initial_ms, config.backoff_max_ms)).await;
    }
}

fn classify_upstream_app_error(error: &AppError) -> crate::models::neutral::UpstreamErrorClass {
    use crate::models::neutral::UpstreamErrorClass as C;
    match error {
        AppError::Timeout => C::Timeout,
        AppError::Upstream { status, .. } if *status >= 500 => C::Upstream5xx,
        AppError::Upstream { .. } => C::Upstream4xx,
        AppError::UnsupportedOperation(_) => C::UnsupportedOperation,
        _ => C::Malformed,
    }
}

/// Workaround so `classify_reqwest_error` stays reachable from provider
/// adapters that translate a raw `reqwest::Error` before it becomes an
/// `AppError`.
pub fn reqwest_class(error: &reqwest::Error) -> crate::models::neutral::UpstreamErrorClass {
    classify_reqwest_error(error)
}

pub type DispatchDuration = Duration;
