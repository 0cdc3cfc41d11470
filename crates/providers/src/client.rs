//! Outbound client factory.
//!
//! Every provider call goes through a [`ProviderClient`]: the provider's base
//! URL plus an optional bearer credential decrypted from the vault, layered
//! over one shared `reqwest::Client` so connection pools are reused across
//! providers. Two façades sit on top: [`ChatCompletionClient`] for
//! `POST /chat/completions` and [`ChatModelClient`] for `GET /models`.

use std::time::Duration;

use bytes::Bytes;
use mg_domain::config::UpstreamConfig;
use mg_domain::error::{Error, Result};
use mg_domain::provider::{DiscoveredModel, Provider};
use mg_domain::stream::BoxStream;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::util::{from_reqwest, is_absent_credential, upstream_status};
use crate::vault::Vault;

/// Raw upstream body chunks, forwarded unmodified by the streaming relay.
pub type UpstreamByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ClientFactory {
    vault: Vault,
    http: reqwest::Client,
    default_timeout: Duration,
}

impl ClientFactory {
    pub fn new(vault: Vault, upstream: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(upstream.connect_timeout_ms))
            .build()
            .map_err(|e| Error::Configuration(format!("building HTTP client: {e}")))?;
        Ok(Self {
            vault,
            http,
            default_timeout: Duration::from_millis(upstream.default_timeout_ms),
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Build an authenticated client for `provider`.
    ///
    /// A non-empty `encrypted_api_key` is decrypted; unless the plaintext is
    /// blank or `none`, it becomes an `Authorization: Bearer` header. Kinds
    /// whose descriptor requires a credential fail without one.
    pub fn create_client(&self, provider: &Provider) -> Result<ProviderClient> {
        let auth = if provider.encrypted_api_key.is_empty() {
            None
        } else {
            let key = self.vault.decrypt(&provider.encrypted_api_key)?;
            if is_absent_credential(&key) {
                None
            } else {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", key.trim()))
                    .map_err(|_| {
                        Error::Credential(format!(
                            "credential for provider {} is not a valid header value",
                            provider.slug
                        ))
                    })?;
                value.set_sensitive(true);
                Some(value)
            }
        };

        if auth.is_none() && provider.kind.descriptor().requires_credential() {
            return Err(Error::Credential(format!(
                "provider {} has no API key",
                provider.slug
            )));
        }

        Ok(ProviderClient {
            provider: provider.slug.clone(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            auth,
            http: self.http.clone(),
            default_timeout: self.default_timeout,
        })
    }

    pub fn chat_completion_client(&self, provider: &Provider) -> Result<ChatCompletionClient> {
        Ok(ChatCompletionClient {
            inner: self.create_client(provider)?,
        })
    }

    pub fn chat_model_client(&self, provider: &Provider) -> Result<ChatModelClient> {
        Ok(ChatModelClient {
            inner: self.create_client(provider)?,
        })
    }

    /// Discover the models `provider` currently advertises.
    pub async fn list_models(&self, provider: &Provider) -> Result<Vec<DiscoveredModel>> {
        self.chat_model_client(provider)?.list().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Base URL plus credential for one provider, over the shared transport.
#[derive(Clone)]
pub struct ProviderClient {
    provider: String,
    base_url: String,
    auth: Option<HeaderValue>,
    http: reqwest::Client,
    default_timeout: Duration,
}

impl ProviderClient {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether requests carry an `Authorization` header.
    pub fn has_credential(&self) -> bool {
        self.auth.is_some()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.auth {
            Some(value) => builder.header(AUTHORIZATION, value.clone()),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| from_reqwest(&self.provider, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(upstream_status(&self.provider, status, &body));
        }
        Ok(resp)
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("has_credential", &self.has_credential())
            .finish()
    }
}

// ── Chat completions ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    inner: ProviderClient,
}

impl ChatCompletionClient {
    pub fn provider_client(&self) -> &ProviderClient {
        &self.inner
    }

    /// Non-streaming call: the whole upstream JSON document is buffered.
    pub async fn complete(&self, body: &Value, timeout: Option<Duration>) -> Result<Value> {
        let builder = self
            .inner
            .request(reqwest::Method::POST, "chat/completions")
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout.unwrap_or(self.inner.default_timeout))
            .json(body);

        let resp = self.inner.send(builder).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| from_reqwest(&self.inner.provider, e))?;

        serde_json::from_str(&text).map_err(|e| Error::Upstream {
            provider: self.inner.provider.clone(),
            status: None,
            message: format!("malformed response body: {e}"),
        })
    }

    /// Open a streaming call. Returns once upstream headers arrived with a
    /// 2xx status; body chunks are yielded as they are read.
    pub async fn open_stream(
        &self,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<UpstreamByteStream> {
        let builder = self
            .inner
            .request(reqwest::Method::POST, "chat/completions")
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .timeout(timeout.unwrap_or(self.inner.default_timeout))
            .json(body);

        let resp = self.inner.send(builder).await?;
        Ok(Box::pin(resp.bytes_stream()))
    }
}

// ── Model listing ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatModelClient {
    inner: ProviderClient,
}

impl ChatModelClient {
    pub fn provider_client(&self) -> &ProviderClient {
        &self.inner
    }

    pub async fn list(&self) -> Result<Vec<DiscoveredModel>> {
        let builder = self
            .inner
            .request(reqwest::Method::GET, "models")
            .timeout(self.inner.default_timeout);
        let resp = self.inner.send(builder).await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| from_reqwest(&self.inner.provider, e))?;

        parse_model_list(&value).ok_or_else(|| Error::Upstream {
            provider: self.inner.provider.clone(),
            status: None,
            message: "model listing is not a recognised shape".into(),
        })
    }
}

/// Normalise a model-listing body.
///
/// Accepts `{"data": [...]}`, `{"models": [...]}` or a bare array, where
/// each entry is either a string id or an object with an `id` (or `name`).
/// Entries without an id are skipped.
pub fn parse_model_list(value: &Value) -> Option<Vec<DiscoveredModel>> {
    let entries = match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("data")
            .or_else(|| map.get("models"))
            .and_then(Value::as_array)?,
        _ => return None,
    };

    Some(entries.iter().filter_map(parse_model_entry).collect())
}

fn parse_model_entry(entry: &Value) -> Option<DiscoveredModel> {
    match entry {
        Value::String(id) if !id.trim().is_empty() => Some(DiscoveredModel::new(id.trim())),
        Value::Object(obj) => {
            let id = obj
                .get("id")
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())?;
            let flag = |key: &str| obj.get(key).and_then(Value::as_bool);
            Some(DiscoveredModel {
                model_key: id.to_string(),
                supports_images: flag("supports_images"),
                supports_embeddings: flag("supports_embeddings"),
                supports_reasoning: flag("supports_reasoning"),
            })
        }
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
