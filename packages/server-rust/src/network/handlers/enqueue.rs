//! `POST /enqueue`.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use enqueuer_core::{EnqueueRequest, EnqueueResult};

use super::AppState;
use crate::network::error::ApiError;

/// Parses the body and runs it through the dispatcher.
///
/// The body is taken as raw bytes so that malformed JSON gets the
/// `invalid_request` error shape instead of axum's plain-text rejection.
pub async fn enqueue_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<EnqueueResult>, ApiError> {
    let _in_flight = state.shutdown.in_flight_guard();

    let request: EnqueueRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    let result = state.dispatcher.enqueue(request).await?;
    Ok(Json(result))
}
