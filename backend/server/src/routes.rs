use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract,
    http::{
        HeaderMap,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{pipeline::Inbound, state::State};

pub async fn api_handler(
    extract::State(state): extract::State<Arc<State>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let inbound = Inbound {
        content_type: headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        content_length: headers.get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()),
        body: &body,
    };

    state.pipeline.admit(inbound).await
}

pub async fn hello_handler() -> impl IntoResponse {
    Json(json!({ "hello": "world", "received": "ok" }))
}
