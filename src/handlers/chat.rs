// src/handlers/chat.rs

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upstream::ChatPayload;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const SUPPORTED_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
    "gemini-1.5-pro",
];

const MESSAGE_ROLES: &[&str] = &["system", "user", "assistant"];

/// Check the parts of a chat-completion body the proxy depends on and build
/// the payload. Everything else is forwarded untouched.
pub fn parse_chat_request(body: Bytes) -> Result<ChatPayload> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::invalid_request(format!("Invalid request body: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| AppError::invalid_request("Request body must be a JSON object"))?;

    let model = match object.get("model") {
        Some(Value::String(model)) => model.clone(),
        Some(_) => return Err(AppError::validation("model", "model must be a string")),
        None => return Err(AppError::validation("model", "Missing required field: model")),
    };
    if !SUPPORTED_MODELS.contains(&model.as_str()) {
        return Err(AppError::validation(
            "model",
            format!(
                "Unsupported model: {model}. Supported models: {}",
                SUPPORTED_MODELS.join(", ")
            ),
        ));
    }

    let messages = match object.get("messages") {
        Some(Value::Array(messages)) if !messages.is_empty() => messages,
        Some(_) => {
            return Err(AppError::validation(
                "messages",
                "Messages must be a non-empty array",
            ))
        }
        None => {
            return Err(AppError::validation(
                "messages",
                "Missing required field: messages",
            ))
        }
    };
    for message in messages {
        validate_message(message)?;
    }

    let stream = match object.get("stream") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(stream)) => *stream,
        Some(_) => return Err(AppError::validation("stream", "stream must be a boolean")),
    };

    Ok(ChatPayload::new(body, model, stream))
}

fn validate_message(message: &Value) -> Result<()> {
    let role = message.get("role").and_then(Value::as_str);
    let has_content = match message.get("content") {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(parts)) => !parts.is_empty(),
        Some(_) => true,
    };

    match role {
        Some(role) if has_content => {
            if MESSAGE_ROLES.contains(&role) {
                Ok(())
            } else {
                Err(AppError::validation("messages", "Invalid message role"))
            }
        }
        _ => Err(AppError::validation(
            "messages",
            "Each message must have role and content",
        )),
    }
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response> {
    let payload = parse_chat_request(body)?;
    debug!(model = %payload.model, stream = payload.stream, "Chat completion request validated");

    // Cancelled when this future is dropped, i.e. the client went away.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let dispatched = state.dispatcher.execute(&payload, &cancel).await?;
    info!(
        key.id = dispatched.key_id,
        failovers = dispatched.failovers,
        status = dispatched.response.status.as_u16(),
        "Chat completion served"
    );

    let upstream = dispatched.response;
    let mut response = (upstream.status, upstream.body).into_response();
    *response.headers_mut() = upstream.headers;
    if dispatched.failovers > 0 {
        response.headers_mut().insert(
            "x-failover-count",
            HeaderValue::from(dispatched.failovers),
        );
    }
    Ok(response)
}

/// `GET /v1/models`
pub async fn list_models() -> Json<Value> {
    let data: Vec<Value> = SUPPORTED_MODELS
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": "google",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(value: Value) -> Result<ChatPayload> {
        parse_chat_request(Bytes::from(value.to_string()))
    }

    #[test]
    fn test_valid_request_is_forwarded_verbatim() {
        let body = json!({
            "model": "gemini-2.5-flash",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.2,
            "stream": true
        })
        .to_string();
        let payload = parse_chat_request(Bytes::from(body.clone())).unwrap();
        assert_eq!(payload.model, "gemini-2.5-flash");
        assert!(payload.stream);
        assert_eq!(payload.body, Bytes::from(body));
    }

    #[rstest]
    #[case(json!({"messages": [{"role": "user", "content": "hi"}]}))]
    #[case(json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]}))]
    #[case(json!({"model": "gemini-2.5-pro", "messages": []}))]
    #[case(json!({"model": "gemini-2.5-pro", "messages": "hi"}))]
    #[case(json!({"model": "gemini-2.5-pro", "messages": [{"role": "tool", "content": "x"}]}))]
    #[case(json!({"model": "gemini-2.5-pro", "messages": [{"role": "user", "content": ""}]}))]
    #[case(json!({"model": "gemini-2.5-pro", "messages": [{"role": "user"}]}))]
    #[case(json!({"model": "gemini-2.5-pro", "messages": [{"role": "user", "content": "x"}], "stream": "yes"}))]
    #[case(json!(["not", "an", "object"]))]
    fn test_invalid_requests_are_rejected(#[case] body: Value) {
        let err = parse(body).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_multimodal_content_is_accepted() {
        let payload = parse(json!({
            "model": "gemini-2.0-flash",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "describe"}]}]
        }))
        .unwrap();
        assert!(!payload.stream);
    }
}
