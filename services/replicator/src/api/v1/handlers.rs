//! Entry points of the two roles and of the completion poller.
//!
//! Role endpoints take the raw notification exactly as the bus or the
//! scheduler delivers it. The HTTP status mirrors `statusCode` of the
//! handler response.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use crate::api::error::ApiError;
use crate::error::HandlerResponse;
use crate::poller::{PollRequest, PollResponse};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/producer", post(producer))
        .route("/consumer", post(consumer))
        .route("/wait4copy", post(wait4copy))
}

fn mirrored<T: Serialize>(status_code: u16, body: T) -> Response {
    let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

fn respond(response: HandlerResponse) -> Response {
    mirrored(response.status_code, response)
}

fn not_served(role: &str) -> ApiError {
    ApiError::not_found(
        "role_not_served",
        format!("{role} role is not served by this process"),
    )
}

async fn producer(State(state): State<AppState>, Json(raw): Json<Value>) -> Result<Response, ApiError> {
    let producer = state.producer().ok_or_else(|| not_served("producer"))?;
    Ok(respond(producer.handle(&raw).await))
}

async fn consumer(State(state): State<AppState>, Json(raw): Json<Value>) -> Result<Response, ApiError> {
    let consumer = state.consumer().ok_or_else(|| not_served("consumer"))?;
    Ok(respond(consumer.handle(&raw).await))
}

async fn wait4copy(State(state): State<AppState>, Json(request): Json<PollRequest>) -> Response {
    let response = match state.poller_for(&request.source_arn) {
        Some(poller) => poller.check(&request).await,
        None if request.source_arn.is_empty() => PollResponse::failed(500, "SourceArn not provided"),
        None => PollResponse::failed(
            500,
            format!("no snapshot service for {}", request.source_arn),
        ),
    };
    mirrored(response.status_code, response)
}
