use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::reservation::ReservationError;
use crate::session::{self, CartLine};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reservations", post(reserve))
        .route("/reservations/batch", post(reserve_batch))
        .route("/reservations/confirm", patch(confirm))
        .route("/reservations/cancel", patch(cancel))
        .route("/reservations/cancelBySession", patch(cancel_by_session))
        .route("/reservations/{reservation_id}", get(get_reservation))
}

/* ---------- helpers ---------- */

// Общая раскладка ошибок движка по HTTP-кодам
fn engine_error_response(context: &str, e: ReservationError) -> (StatusCode, String) {
    match e {
        ReservationError::InvalidQuantity(_) => {
            (StatusCode::BAD_REQUEST, "quantity должен быть > 0".to_string())
        }
        ReservationError::UnitNotFound(_) => {
            (StatusCode::NOT_FOUND, "Позиция не найдена".to_string())
        }
        ReservationError::HoldNotFound => {
            (StatusCode::NOT_FOUND, "Бронь не найдена".to_string())
        }
        ReservationError::HoldExpired { .. } => (
            StatusCode::CONFLICT,
            "Бронь больше не активна — начните бронирование заново".to_string(),
        ),
        ReservationError::CapacityExceeded { .. } => {
            // невозможное состояние: reserve пропустил лишнее
            tracing::error!("{context}: invariant violation: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Внутренняя ошибка учёта".to_string())
        }
        e => {
            tracing::error!("{context} error: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Внутренняя ошибка".to_string())
        }
    }
}

/* ---------- RESERVATIONS ---------- */

// POST /api/reservations
#[derive(Debug, Deserialize)]
struct ReserveRequest {
    unit_id: i64,
    quantity: i64,
    session_id: String,
    customer_email: Option<String>,
}

async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReserveRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.session_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "session_id не должен быть пустым".to_string()));
    }

    // нехватка остатка — это 200 с success=false, а не ошибка транспорта
    let result = state
        .engine
        .reserve(
            req.unit_id,
            req.quantity,
            req.session_id.trim(),
            req.customer_email.as_deref(),
        )
        .await
        .map_err(|e| engine_error_response("reserve", e))?;

    Ok((StatusCode::OK, Json(result)))
}

// POST /api/reservations/batch
#[derive(Debug, Deserialize)]
struct ReserveBatchRequest {
    session_id: String,
    customer_email: Option<String>,
    items: Vec<CartLine>,
}

async fn reserve_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReserveBatchRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.session_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "session_id не должен быть пустым".to_string()));
    }
    if req.items.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "items не должен быть пустым".to_string()));
    }

    // частичный успех — валидный исход; удавшиеся строки остаются
    // удержанными, откатывать их или нет — решает клиент
    let outcome = session::reserve_lines(
        &state.engine,
        req.session_id.trim(),
        &req.items,
        req.customer_email.as_deref(),
    )
    .await;

    Ok((StatusCode::OK, Json(outcome)))
}

// PATCH /api/reservations/confirm
#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    reservation_id: Uuid,
    order_id: String,
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.order_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "order_id не должен быть пустым".to_string()));
    }

    let confirmed = state
        .engine
        .confirm(req.reservation_id, req.order_id.trim())
        .await
        .map_err(|e| engine_error_response("confirm", e))?;

    Ok((StatusCode::OK, Json(serde_json::json!({ "success": confirmed }))))
}

// PATCH /api/reservations/cancel
#[derive(Debug, Deserialize)]
struct CancelRequest {
    reservation_id: Uuid,
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let cancelled = state
        .engine
        .cancel(req.reservation_id)
        .await
        .map_err(|e| engine_error_response("cancel", e))?;

    Ok((StatusCode::OK, Json(serde_json::json!({ "success": cancelled }))))
}

// PATCH /api/reservations/cancelBySession
#[derive(Debug, Deserialize)]
struct CancelBySessionRequest {
    session_id: String,
}

async fn cancel_by_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelBySessionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.session_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "session_id не должен быть пустым".to_string()));
    }

    let cancelled = state
        .engine
        .cancel_by_session(req.session_id.trim())
        .await
        .map_err(|e| engine_error_response("cancel_by_session", e))?;

    Ok((StatusCode::OK, Json(serde_json::json!({ "cancelled": cancelled }))))
}

// GET /api/reservations/{reservation_id}
async fn get_reservation(
    State(state): State<Arc<AppState>>,
    Path(reservation_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let hold = state
        .engine
        .get_hold(reservation_id)
        .await
        .map_err(|e| engine_error_response("get_reservation", e))?;

    Ok((StatusCode::OK, Json(hold)))
}
