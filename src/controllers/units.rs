use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::reservation::ReservationError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/units", post(create_unit))
        .route("/units", get(list_units))
        .route("/units/{unit_id}/availability", get(get_availability))
}

// POST /api/units
#[derive(Debug, Deserialize)]
struct CreateUnitRequest {
    name: String,
    total_capacity: i64,
}

async fn create_unit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUnitRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name не должен быть пустым".to_string()));
    }
    if req.total_capacity < 0 {
        return Err((StatusCode::BAD_REQUEST, "total_capacity должен быть >= 0".to_string()));
    }

    match state.engine.create_unit(req.name.trim(), req.total_capacity).await {
        Ok(unit) => {
            state.cache.invalidate_units().await;
            Ok((StatusCode::CREATED, Json(unit)))
        }
        Err(e) => {
            tracing::error!("create_unit error: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Не удалось создать позицию".to_string()))
        }
    }
}

// GET /api/units
async fn list_units(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let units = state.cache.get_units().await.map_err(|e| {
        tracing::error!("list_units error: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Не удалось получить список позиций".to_string())
    })?;
    Ok((StatusCode::OK, Json(units)))
}

// GET /api/units/{unit_id}/availability
//
// Свободный остаток на момент запроса. Значение справочное, для UI:
// reserve пересчитает остаток заново внутри своей транзакции.
async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(unit_id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.engine.availability(unit_id).await {
        Ok(available) => Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "unit_id": unit_id, "available": available })),
        )),
        Err(ReservationError::UnitNotFound(_)) => {
            Err((StatusCode::NOT_FOUND, "Позиция не найдена".to_string()))
        }
        Err(e) => {
            tracing::error!("get_availability error: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Не удалось получить остаток".to_string()))
        }
    }
}
