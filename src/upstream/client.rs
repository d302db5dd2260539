// src/upstream/client.rs

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::{AppError, Result};
use crate::upstream::{ChatPayload, UpstreamClient, UpstreamError, UpstreamResponse};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use futures_util::TryStreamExt;
use reqwest::{Client, Proxy};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

// Hop-by-hop headers that should not be forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Upper bound on how much of an error body is kept for the message.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Sends chat completions to the OpenAI-compatible Gemini endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    completions_url: String,
}

impl GeminiClient {
    pub fn new(upstream: &UpstreamConfig, server: &ServerConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(server.connect_timeout())
            .timeout(server.request_timeout())
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(proxy_url) = &upstream.proxy_url {
            builder = builder.proxy(build_proxy(proxy_url)?);
            info!(proxy_url = %proxy_url, "Upstream HTTP client configured with proxy");
        }

        let http = builder.build()?;
        Ok(Self::with_client(http, &upstream.target_url))
    }

    pub fn with_client(http: Client, target_url: &str) -> Self {
        Self {
            http,
            completions_url: format!("{}/chat/completions", target_url.trim_end_matches('/')),
        }
    }

    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }
}

fn build_proxy(proxy_url: &str) -> Result<Proxy> {
    let parsed = Url::parse(proxy_url)?;
    let scheme = parsed.scheme().to_lowercase();
    let proxy = match scheme.as_str() {
        "http" => Proxy::http(proxy_url),
        "https" => Proxy::https(proxy_url),
        "socks5" => Proxy::all(proxy_url),
        other => {
            return Err(AppError::config_validation(
                format!("Unsupported proxy scheme '{other}'"),
                Some("upstream.proxy_url"),
            ))
        }
    };
    proxy.map_err(AppError::from)
}

/// Copy response headers, dropping hop-by-hop ones. Content length is
/// dropped too because the body is re-streamed.
pub fn build_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        let lower = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&lower) || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Pull `error.message` out of an OpenAI/Gemini style error body, or fall
/// back to the raw text.
fn extract_error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            let error = match &value {
                serde_json::Value::Array(items) => items.first()?.get("error")?.clone(),
                other => other.get("error")?.clone(),
            };
            error.get("message")?.as_str().map(String::from)
        });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("upstream error")
            .to_string(),
        None => body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

#[async_trait]
impl UpstreamClient for GeminiClient {
    async fn send(
        &self,
        secret: &SecretString,
        payload: &ChatPayload,
    ) -> std::result::Result<UpstreamResponse, UpstreamError> {
        let bearer = HeaderValue::from_str(&format!("Bearer {}", secret.expose_secret()))
            .map_err(|_| UpstreamError::transport("API key contains invalid header characters"))?;

        debug!(
            url = %self.completions_url,
            model = %payload.model,
            stream = payload.stream,
            "Forwarding chat completion upstream"
        );

        let response = self
            .http
            .post(&self.completions_url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, bearer)
            .body(payload.body.clone())
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else {
                    "request"
                };
                warn!(error = %e, kind, "Upstream request failed before a response");
                UpstreamError::transport(format!("{kind}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(status, &body);
            debug!(status = status.as_u16(), message = %message, "Upstream returned an error status");
            return Err(UpstreamError::status(status.as_u16(), message));
        }

        let headers = build_response_headers(response.headers());
        // Failures after this point cannot be retried: the status is already
        // committed to the client.
        let body = Body::from_stream(response.bytes_stream().inspect_err(|e| {
            warn!(error = %e, "Upstream response stream broke mid-body");
        }));

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
