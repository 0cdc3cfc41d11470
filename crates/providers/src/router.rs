//! Completion router and streaming relay.
//!
//! A completion request moves through a fixed sequence: resolve the provider
//! for the caller, build its client, dispatch. Every failure up to the first
//! upstream byte is returned as an [`Error`] the gateway renders as JSON.
//! After that the relay owns the outcome: chunks are forwarded unmodified and
//! in order, and any later failure is only logged as a stream abort.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use mg_domain::error::{Error, Result};
use mg_domain::provider::{CallerScope, Provider};
use mg_domain::stream::{BoxStream, CompletionState};
use serde_json::Value;

use crate::client::{ChatCompletionClient, ClientFactory};
use crate::registry::ProviderRegistry;
use crate::sse::SentinelScanner;
use crate::util::from_reqwest;

/// Body stream handed to the HTTP layer. An `Err` item aborts the transport.
pub type RelayStream = BoxStream<'static, std::io::Result<Bytes>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An inbound OpenAI-style completion request. The body is forwarded as-is
/// apart from `model`, which is normalised to the key that was resolved.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    body: Value,
    model: String,
    stream: bool,
}

impl CompletionRequest {
    pub fn from_body(mut body: Value) -> Result<Self> {
        let Some(obj) = body.as_object_mut() else {
            return Err(Error::Validation("request body must be a JSON object".into()));
        };
        let model = obj
            .get("model")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::Validation("'model' is required".into()))?
            .to_string();
        let stream = match obj.get("stream") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(Error::Validation("'stream' must be a boolean".into())),
        };
        obj.insert("model".into(), Value::String(model.clone()));
        Ok(Self {
            body,
            model,
            stream,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

pub enum CompletionOutcome {
    /// Non-streaming: the upstream JSON document.
    Json(Value),
    /// Streaming: the first upstream chunk is already in hand.
    Stream(RelayStream),
}

impl std::fmt::Debug for CompletionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionOutcome::Json(v) => f.debug_tuple("Json").field(v).finish(),
            CompletionOutcome::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// The provider chosen for a request and its authenticated client.
#[derive(Debug)]
pub struct RouteTarget {
    pub provider: Provider,
    pub client: ChatCompletionClient,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CompletionRouter {
    registry: Arc<ProviderRegistry>,
    clients: Arc<ClientFactory>,
}

impl CompletionRouter {
    pub fn new(registry: Arc<ProviderRegistry>, clients: Arc<ClientFactory>) -> Self {
        Self { registry, clients }
    }

    /// Resolve the provider for `model` and authorize a client for it.
    pub async fn resolve(&self, model: &str, scope: &CallerScope) -> Result<RouteTarget> {
        let provider = self
            .registry
            .get_provider_for_model(model, scope.organization_id, scope.project_id)
            .await?;
        let client = self.clients.chat_completion_client(&provider)?;
        Ok(RouteTarget { provider, client })
    }

    /// Route one completion. No retries are attempted at any stage.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        scope: &CallerScope,
        timeout: Duration,
        correlation_id: &str,
    ) -> Result<CompletionOutcome> {
        let target = match self.resolve(request.model(), scope).await {
            Ok(target) => target,
            Err(e) => {
                log_state(correlation_id, request.model(), None, CompletionState::Rejected, Some(&e));
                return Err(e);
            }
        };
        let slug = target.provider.slug.clone();

        if !request.is_stream() {
            return match target.client.complete(request.body(), Some(timeout)).await {
                Ok(body) => {
                    log_state(correlation_id, request.model(), Some(&slug), CompletionState::Completed, None);
                    Ok(CompletionOutcome::Json(body))
                }
                Err(e) => {
                    log_state(correlation_id, request.model(), Some(&slug), CompletionState::Failed, Some(&e));
                    Err(e)
                }
            };
        }

        match open_relay(&target, &request, timeout, correlation_id).await {
            Ok(stream) => Ok(CompletionOutcome::Stream(stream)),
            Err(e) => {
                log_state(correlation_id, request.model(), Some(&slug), CompletionState::Rejected, Some(&e));
                Err(e)
            }
        }
    }
}

fn log_state(
    correlation_id: &str,
    model: &str,
    provider: Option<&str>,
    state: CompletionState,
    error: Option<&Error>,
) {
    match error {
        None => tracing::info!(
            correlation_id,
            model,
            provider = provider.unwrap_or("-"),
            state = state.as_str(),
            "completion finished"
        ),
        Some(e) => tracing::warn!(
            correlation_id,
            model,
            provider = provider.unwrap_or("-"),
            state = state.as_str(),
            code = e.code(),
            error = %e,
            "completion failed"
        ),
    }
}

// ── Streaming relay ────────────────────────────────────────────────

/// Open the upstream stream and wait for its first non-empty chunk. Anything
/// that goes wrong before that chunk is still a pre-flight error.
async fn open_relay(
    target: &RouteTarget,
    request: &CompletionRequest,
    timeout: Duration,
    correlation_id: &str,
) -> Result<RelayStream> {
    let slug = target.provider.slug.clone();
    let mut upstream = target
        .client
        .open_stream(request.body(), Some(timeout))
        .await?;

    let first = loop {
        match upstream.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => break chunk,
            Some(Err(e)) => return Err(from_reqwest(&slug, e)),
            None => {
                return Err(Error::Upstream {
                    provider: slug,
                    status: None,
                    message: "stream closed before any data was sent".into(),
                })
            }
        }
    };

    let mut guard = RelayGuard::new(correlation_id, request.model(), &slug);
    tracing::debug!(correlation_id, provider = %slug, "relay streaming");

    let stream = async_stream::stream! {
        guard.observe(&first);
        yield Ok(first);

        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    guard.observe(&chunk);
                    yield Ok(chunk);
                }
                Err(e) => {
                    guard.fail(e.to_string());
                    yield Err(std::io::Error::other(format!("upstream stream failed: {e}")));
                    return;
                }
            }
        }
        guard.finish();
    };

    Ok(Box::pin(stream))
}

/// Tracks one relayed stream and logs its terminal state when dropped, so
/// caller disconnects are reported the same way as upstream failures.
struct RelayGuard {
    correlation_id: String,
    model: String,
    provider: String,
    scanner: SentinelScanner,
    bytes: usize,
    chunks: usize,
    started: Instant,
    state: CompletionState,
    reason: Option<String>,
}

impl RelayGuard {
    fn new(correlation_id: &str, model: &str, provider: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            model: model.to_string(),
            provider: provider.to_string(),
            scanner: SentinelScanner::new(),
            bytes: 0,
            chunks: 0,
            started: Instant::now(),
            state: CompletionState::Streaming,
            reason: None,
        }
    }

    fn observe(&mut self, chunk: &Bytes) {
        self.bytes += chunk.len();
        self.chunks += 1;
        self.scanner.feed(chunk);
    }

    fn fail(&mut self, reason: String) {
        self.state = CompletionState::Aborted;
        self.reason = Some(reason);
    }

    fn finish(&mut self) {
        if self.scanner.finish() {
            self.state = CompletionState::Completed;
        } else {
            self.fail("upstream closed without [DONE]".into());
        }
    }

    /// Terminal state when the relay ends. A caller that hangs up after the
    /// sentinel went through still received a complete stream.
    fn settle(&mut self) -> CompletionState {
        if self.state == CompletionState::Streaming && self.scanner.saw_done() {
            self.state = CompletionState::Completed;
        }
        self.state
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let events = self.scanner.events();
        if self.settle() == CompletionState::Completed {
            tracing::info!(
                correlation_id = %self.correlation_id,
                model = %self.model,
                provider = %self.provider,
                state = self.state.as_str(),
                chunks = self.chunks,
                events,
                bytes = self.bytes,
                elapsed_ms,
                "stream completed"
            );
            return;
        }

        let err = Error::StreamAborted {
            correlation_id: self.correlation_id.clone(),
            reason: self
                .reason
                .take()
                .unwrap_or_else(|| "caller disconnected".into()),
        };
        tracing::warn!(
            correlation_id = %self.correlation_id,
            model = %self.model,
            provider = %self.provider,
            state = CompletionState::Aborted.as_str(),
            code = err.code(),
            chunks = self.chunks,
            events,
            bytes = self.bytes,
            elapsed_ms,
            error = %err,
            "stream aborted"
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
