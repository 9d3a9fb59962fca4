use crate::accounts::{Account, ApiKey};
use crate::app::AppState;
use crate::billing::{self, CommitRequest};
use crate::catalog::{self, ProviderMapping};
use crate::error::{AppError, AppResult};
use crate::providers::ChunkStream;
use crate::upstream::UpstreamCallError;
use crate::usage::UsageTally;
use crate::wire::{ChatMessage, DONE_SENTINEL, StreamChunk, new_completion_id, now_ts};
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

/// `POST /api/v1/chat/completions` — the gateway pipeline: resolve the
/// credential, the balance, the model and a provider mapping, then hand off
/// to the matching adapter.
pub async fn create_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> AppResult<Response> {
    let (api_key, account) = authenticate(&state, &headers).await?;

    if account.credits <= 0.0 {
        return Err(AppError::insufficient_credits());
    }

    let model = state
        .catalog
        .find_model_by_slug(&body.model)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::unknown_model(&body.model))?;

    let mappings = state
        .catalog
        .mappings_for_model(&model.id)
        .await
        .map_err(AppError::internal)?;
    let mapping = catalog::select_mapping(&mappings)
        .cloned()
        .ok_or_else(|| AppError::no_provider_configured(&body.model))?;

    // The slug is "<company>/<providerModelName>"; the upstream call wants
    // the bare provider model name.
    let provider_model = body
        .model
        .split_once('/')
        .map(|(_, name)| name)
        .unwrap_or(body.model.as_str())
        .to_string();
    let completion_id = new_completion_id();

    if body.stream {
        metrics::counter!("tollgate_requests_total", "mode" => "stream").increment(1);
        return dispatch_stream(
            state,
            api_key,
            account,
            mapping,
            body,
            provider_model,
            completion_id,
        )
        .await;
    }

    metrics::counter!("tollgate_requests_total", "mode" => "completion").increment(1);
    dispatch_completion(
        state,
        api_key,
        account,
        mapping,
        body,
        provider_model,
        completion_id,
    )
    .await
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<(ApiKey, Account)> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(AppError::invalid_api_key)?;
    state
        .accounts
        .find_active_key(token)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(AppError::invalid_api_key)
}

async fn dispatch_completion(
    state: AppState,
    api_key: ApiKey,
    account: Account,
    mapping: ProviderMapping,
    body: ChatCompletionRequest,
    provider_model: String,
    completion_id: String,
) -> AppResult<Response> {
    let adapter = state
        .providers
        .get(&mapping.provider_name)
        .ok_or_else(|| AppError::provider_unavailable(&mapping.provider_name))?;

    let mut result = adapter
        .chat(&completion_id, &provider_model, &body.messages)
        .await
        .map_err(|err| upstream_error_to_app(&err))?;
    // Callers address models by catalog slug, not by provider-native name.
    result.model = body.model.clone();

    let mut tally = UsageTally::for_messages(&body.messages);
    tally.record_completion(&result);
    result.input_tokens_consumed = tally.input_tokens;
    result.output_tokens_consumed = tally.output_tokens;

    billing::commit_usage(
        &state,
        CommitRequest {
            account_id: account.id,
            api_key_id: api_key.id,
            mapping,
            input: serialize_input(&body.messages),
            tally,
        },
    )
    .await;

    Ok(Json(result).into_response())
}

async fn dispatch_stream(
    state: AppState,
    api_key: ApiKey,
    account: Account,
    mapping: ProviderMapping,
    body: ChatCompletionRequest,
    provider_model: String,
    completion_id: String,
) -> AppResult<Response> {
    let Some(adapter) = state.providers.get(&mapping.provider_name) else {
        // Headers are committed once we answer with an event stream, so the
        // failure rides inside the stream instead of an HTTP status.
        let message = AppError::provider_unavailable(&mapping.provider_name).message;
        return Ok(sse_response(synthetic_error_stream(
            &completion_id,
            &body.model,
            &message,
        )));
    };

    let chunks = match adapter
        .stream_chat(&completion_id, &provider_model, &body.messages)
        .await
    {
        Ok(chunks) => chunks,
        Err(err) => {
            metrics::counter!("tollgate_upstream_stream_failures_total").increment(1);
            tracing::error!(model = %body.model, "upstream stream open failed: {err}");
            return Ok(sse_response(synthetic_error_stream(
                &completion_id,
                &body.model,
                "upstream provider request failed",
            )));
        }
    };

    let tally = UsageTally::for_messages(&body.messages);
    let input = serialize_input(&body.messages);
    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(drive_stream(
        state,
        chunks,
        tx,
        StreamBilling {
            account_id: account.id,
            api_key_id: api_key.id,
            mapping,
            input,
            tally,
        },
        completion_id,
        body.model,
    ));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(sse_response(stream))
}

struct StreamBilling {
    account_id: String,
    api_key_id: String,
    mapping: ProviderMapping,
    input: String,
    tally: UsageTally,
}

/// Consumes the adapter's chunk sequence, forwards it to the client channel,
/// and commits billing iff the terminal finish chunk was observed. A sequence
/// that errors or ends without one yields no conversation record and no
/// debit; whatever the client already received stays received.
async fn drive_stream(
    state: AppState,
    mut chunks: ChunkStream,
    tx: mpsc::Sender<Event>,
    mut billing: StreamBilling,
    completion_id: String,
    model_slug: String,
) {
    let created = now_ts();
    let mut saw_terminal = false;
    let mut client_gone = false;

    while let Some(item) = chunks.next().await {
        match item {
            Ok(mut chunk) => {
                chunk.model = model_slug.clone();
                billing.tally.record_chunk(&chunk);
                let terminal = chunk.is_terminal();
                if !client_gone && tx.send(chunk_event(&chunk)).await.is_err() {
                    // Client went away: stop forwarding, keep draining so the
                    // usage actually incurred upstream is still accounted.
                    client_gone = true;
                }
                if terminal {
                    saw_terminal = true;
                    break;
                }
            }
            Err(err) => {
                metrics::counter!("tollgate_upstream_stream_failures_total").increment(1);
                tracing::error!(model = %model_slug, "upstream stream failed: {err}");
                break;
            }
        }
    }

    if !saw_terminal {
        let finish = StreamChunk::finish(&completion_id, created, &model_slug);
        let _ = tx.send(chunk_event(&finish)).await;
    }
    let _ = tx.send(Event::default().data(DONE_SENTINEL)).await;

    if saw_terminal {
        billing::commit_usage(
            &state,
            CommitRequest {
                account_id: billing.account_id,
                api_key_id: billing.api_key_id,
                mapping: billing.mapping,
                input: billing.input,
                tally: billing.tally,
            },
        )
        .await;
    }
}

/// Well-formed stream for failures detected before any upstream chunk could
/// flow: one informational chunk carrying the error text, the stop chunk,
/// then the `[DONE]` sentinel.
fn synthetic_error_stream(
    completion_id: &str,
    model_slug: &str,
    message: &str,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let created = now_ts();
    let info = StreamChunk::content(completion_id, created, model_slug, message);
    let finish = StreamChunk::finish(completion_id, created, model_slug);
    futures_util::stream::iter(vec![
        Ok(chunk_event(&info)),
        Ok(chunk_event(&finish)),
        Ok(Event::default().data(DONE_SENTINEL)),
    ])
}

fn chunk_event(chunk: &StreamChunk) -> Event {
    let data = serde_json::to_string(chunk).unwrap_or_else(|_| "{}".to_string());
    Event::default().data(data)
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let mut response = Sse::new(stream).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    response
}

fn serialize_input(messages: &[ChatMessage]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string())
}

fn upstream_error_to_app(err: &UpstreamCallError) -> AppError {
    AppError::new(
        StatusCode::BAD_GATEWAY,
        "upstream_error",
        format!("upstream provider request failed: {}", err.message),
    )
}
