use crate::error::AppError;
use crate::models::error_details::ErrorDetails;
use crate::models::neutral::{NeutralRequest, NeutralResponse, RequestKind};
use crate::models::runtime_config::AppState;
use crate::models::stream_event::{ChunkEvent, StreamEvent};
use crate::pipeline::chain::DispatchOutcome;
use crate::pipeline::context::RequestContext;
use actix_web::{web, Either, HttpRequest, HttpResponse};
use actix_web_lab::sse;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use tracing::debug;

const GOVERNANCE_HEADERS: &[&str] = &["x-bf-vk", "x-bf-team", "x-bf-customer", "x-bf-user"];

type SseResponse = sse::Sse<BoxStream<'static, Result<sse::Event, Infallible>>>;
type RouteResponse = Either<HttpResponse, SseResponse>;

/// Lifts the headers the pipeline cares about out of the incoming request:
/// the governance audit labels always pass through, `authorization`/
/// `x-api-key` only when direct keys are allowed, stripped otherwise so they
/// never reach the plugin chain and never leak upstream by accident.
fn extract_headers(req: &HttpRequest, allow_direct_keys: bool) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for name in GOVERNANCE_HEADERS {
        if let Some(v) = req.headers().get(*name).and_then(|v| v.to_str().ok()) {
            headers.insert(name.to_string(), v.to_string());
        }
    }
    if allow_direct_keys {
        if let Some(v) = req.headers().get("authorization").and_then(|v| v.to_str().ok()) {
            headers.insert("authorization".to_string(), v.to_string());
        }
        if let Some(v) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
            headers.insert("x-api-key".to_string(), v.to_string());
        }
    }
    headers
}

fn direct_credential(headers: &HashMap<String, String>) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string))
        .or_else(|| headers.get("x-api-key").cloned())
}

/// `model` may already be `provider/model` (rewritten by the governance
/// plugin's transport interceptor, or supplied directly by the caller); when
/// it isn't, the route's own default provider applies.
fn split_provider_model(payload: &Value, default_provider: &str) -> (String, String) {
    let raw = payload.get("model").and_then(Value::as_str).unwrap_or("");
    match raw.split_once('/') {
        Some((p, m)) => (p.to_string(), m.to_string()),
        None => (default_provider.to_string(), raw.to_string()),
    }
}

fn kind_from_path(path: &str) -> RequestKind {
    if path.contains("embedding") {
        RequestKind::Embedding
    } else if path.contains("speech") {
        RequestKind::SpeechSynthesis
    } else if path.contains("transcription") {
        RequestKind::Transcription
    } else if path.contains("responses") {
        RequestKind::Responses
    } else if path.ends_with("completions") && !path.contains("chat") {
        RequestKind::TextCompletion
    } else {
        RequestKind::ChatCompletion
    }
}

fn error_payload(err: &AppError) -> String {
    json!({ "error": { "message": err.to_string(), "type": "error" } }).to_string()
}

fn stream_event_payload(event: &StreamEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| error_payload(&AppError::Internal("failed to encode stream event".to_string())))
}

fn sse_event(payload: String) -> Result<sse::Event, Infallible> {
    Ok(sse::Event::Data(sse::Data::new(payload)))
}

fn one_shot_sse(payload: String) -> SseResponse {
    let event_stream = stream::once(async move { sse_event(payload) }).boxed();
    sse::Sse::from_stream(event_stream)
}

fn error_stream_event(request_id: String, err: &AppError) -> StreamEvent {
    StreamEvent::ErrorDetails {
        request_id,
        error: ErrorDetails::new("upstream_error", err.to_string()),
    }
}

/// The shared entrypoint every route handler funnels into: transport
/// interceptors, normalise into a `NeutralRequest`, run the plugin chain,
/// dispatch (unary or streaming), run PostHooks on whatever comes back,
/// cleanup, render.
async fn handle(
    state: &AppState,
    http_req: &HttpRequest,
    default_provider: &str,
    kind: RequestKind,
    body: web::Bytes,
) -> Result<RouteResponse, AppError> {
    let mut payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid JSON body: {e}")))?;

    let streaming = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let allow_direct_keys = state.settings.gateway.allow_direct_keys;
    let headers = extract_headers(http_req, allow_direct_keys);

    if state.settings.gateway.enforce_governance_header && !headers.contains_key("x-bf-vk") {
        return Err(AppError::VirtualKeyRequired);
    }

    let (headers, new_payload) = state
        .plugin_chain
        .run_transport_interceptors(http_req.path(), headers, payload)
        .await;
    payload = new_payload;

    let (provider, model) = split_provider_model(&payload, default_provider);
    let mut request = NeutralRequest::new(kind, provider, model, payload);
    request.streaming = streaming;
    request.upstream_credential = direct_credential(&headers);

    let mut ctx = RequestContext::new(request.request_id, headers);
    let (outcome, _ran) = state.plugin_chain.run_pre_hooks(&mut ctx, request).await;

    if streaming {
        return Ok(Either::Right(render_stream(state.clone(), ctx, kind, outcome).await));
    }

    let result = match outcome {
        DispatchOutcome::ShortCircuited(resp) => Ok(resp),
        DispatchOutcome::Forward(req) => {
            state
                .dispatcher
                .submit_with_fallback(req, |p, m| debug!(provider = p, model = m, "dispatch attempt"))
                .await
        }
    };

    let (response, error) = match result {
        Ok(resp) => state.plugin_chain.run_post_hooks(&mut ctx, Some(resp), None).await,
        Err(e) => state.plugin_chain.run_post_hooks(&mut ctx, None, Some(e)).await,
    };
    state.plugin_chain.cleanup_all(&ctx).await;

    match (response, error) {
        (Some(resp), _) => Ok(Either::Left(
            HttpResponse::Ok().json(resp.choices.unwrap_or_else(|| resp.raw.unwrap_or(Value::Null))),
        )),
        (None, Some(e)) => Err(e),
        (None, None) => Err(AppError::Internal(
            "post-hook chain produced neither a response nor an error".to_string(),
        )),
    }
}

struct StreamState {
    chain: std::sync::Arc<crate::pipeline::chain::PluginChain>,
    ctx: RequestContext,
    kind: RequestKind,
    inner: BoxStream<'static, Result<ChunkEvent, AppError>>,
}

/// Streaming rejections emit one SSE frame with the error object and close;
/// forwarded requests stream chunks through PostHook one at a time so the
/// logging/governance plugins see each delta (and the final one) exactly as
/// they arrive, per the accumulator's one-final-per-request-id contract.
async fn render_stream(
    state: AppState,
    mut ctx: RequestContext,
    kind: RequestKind,
    outcome: DispatchOutcome,
) -> SseResponse {
    let request_id = ctx.request_id.to_string();
    match outcome {
        DispatchOutcome::ShortCircuited(resp) => {
            let (response, error) = state.plugin_chain.run_post_hooks(&mut ctx, Some(resp), None).await;
            state.plugin_chain.cleanup_all(&ctx).await;
            let event = match (&response, &error) {
                (Some(r), _) => StreamEvent::ContentChunk(r.choices.clone().unwrap_or(Value::Null)),
                (None, Some(e)) => error_stream_event(request_id, e),
                (None, None) => {
                    error_stream_event(request_id, &AppError::Internal("short-circuit produced no response".to_string()))
                }
            };
            one_shot_sse(stream_event_payload(&event))
        }
        DispatchOutcome::Forward(request) => match state.dispatcher.stream(&request.provider, &request).await {
            Ok(inner) => {
                let started = sse_event(stream_event_payload(&StreamEvent::StreamStarted { request_id }));
                let st = StreamState { chain: state.plugin_chain.clone(), ctx, kind, inner };
                let chunk_stream = stream::unfold(Some(st), move |st| async move {
                    let mut st = st?;
                    match st.inner.next().await {
                        Some(Ok(chunk)) => {
                            let neutral = NeutralResponse::from_chunk(st.ctx.request_id, st.kind, &chunk);
                            let is_final = neutral.is_final;
                            let usage = neutral.usage.clone();
                            let (resp, err) = st.chain.run_post_hooks(&mut st.ctx, Some(neutral), None).await;
                            let event = match (&resp, &err) {
                                (Some(r), _) => StreamEvent::ContentChunk(r.delta.clone().unwrap_or(Value::Null)),
                                (None, Some(e)) => error_stream_event(st.ctx.request_id.to_string(), e),
                                (None, None) => StreamEvent::ContentChunk(Value::Null),
                            };
                            if is_final {
                                st.chain.cleanup_all(&st.ctx).await;
                                let mut tail = vec![sse_event(stream_event_payload(&event))];
                                if let Some(usage) = usage {
                                    tail.push(sse_event(stream_event_payload(&StreamEvent::UsageUpdate(usage))));
                                }
                                tail.push(sse_event(stream_event_payload(&StreamEvent::StreamCompleted)));
                                Some((stream::iter(tail), None))
                            } else {
                                Some((stream::iter(vec![sse_event(stream_event_payload(&event))]), Some(st)))
                            }
                        }
                        Some(Err(e)) => {
                            let event = error_stream_event(st.ctx.request_id.to_string(), &e);
                            let _ = st.chain.run_post_hooks(&mut st.ctx, None, Some(e)).await;
                            st.chain.cleanup_all(&st.ctx).await;
                            Some((stream::iter(vec![sse_event(stream_event_payload(&event))]), None))
                        }
                        None => {
                            st.chain.cleanup_all(&st.ctx).await;
                            None
                        }
                    }
                })
                .flatten();
                let event_stream = stream::once(async move { started }).chain(chunk_stream).boxed();
                sse::Sse::from_stream(event_stream)
            }
            Err(e) => {
                let event = error_stream_event(request_id, &e);
                let _ = state.plugin_chain.run_post_hooks(&mut ctx, None, Some(e)).await;
                state.plugin_chain.cleanup_all(&ctx).await;
                one_shot_sse(stream_event_payload(&event))
            }
        },
    }
}

pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

macro_rules! fixed_kind_route {
    ($name:ident, $provider:expr, $kind:expr) => {
        pub async fn $name(
            state: web::Data<AppState>,
            req: HttpRequest,
            body: web::Bytes,
        ) -> Result<RouteResponse, AppError> {
            handle(&state, &req, $provider, $kind, body).await
        }
    };
}

fixed_kind_route!(chat_completions, "openai", RequestKind::ChatCompletion);
fixed_kind_route!(completions, "openai", RequestKind::TextCompletion);
fixed_kind_route!(embeddings, "openai", RequestKind::Embedding);
fixed_kind_route!(audio_speech, "openai", RequestKind::SpeechSynthesis);
fixed_kind_route!(audio_transcriptions, "openai", RequestKind::Transcription);
fixed_kind_route!(responses, "openai", RequestKind::Responses);

/// One handler shared by every provider-prefixed alias route
/// (`/anthropic/{path}`, `/bedrock/{path}`, `/cohere/{path}`, …): the
/// provider is fixed by which prefix matched, the operation kind is
/// inferred from the trailing path segment the same way the OpenAI-mirror
/// routes are split by their own fixed paths.
pub async fn provider_prefixed(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<RouteResponse, AppError> {
    let provider = req
        .match_pattern()
        .and_then(|p| p.split('/').nth(1).map(str::to_string))
        .unwrap_or_else(|| "openai".to_string());
    let kind = kind_from_path(&path);
    handle(&state, &req, &provider, kind, body).await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(healthz))
        .route("/v1/chat/completions", web::post().to(chat_completions))
        .route("/v1/completions", web::post().to(completions))
        .route("/v1/embeddings", web::post().to(embeddings))
        .route("/v1/audio/speech", web::post().to(audio_speech))
        .route("/v1/audio/transcriptions", web::post().to(audio_transcriptions))
        .route("/v1/responses", web::post().to(responses));

    for provider in [
        "anthropic", "bedrock", "cohere", "gemini", "mistral", "vertex", "ollama", "groq", "sgl", "parasail",
        "cerebras", "openrouter",
    ] {
        cfg.route(&format!("/{provider}/{{path:.*}}"), web::post().to(provider_prefixed));
    }
}
