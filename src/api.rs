use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::coordinator::{BookingError, ReservationCoordinator, ReserveRequest};
use crate::engine::SlotReason;
use crate::model::{hhmm, parse_date, parse_hhmm};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/{tenant}/slots", get(list_slots))
        .route("/api/{tenant}/reservations", post(create_reservation))
        .route("/api/{tenant}/reservations/{id}", delete(cancel_reservation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError(BookingError);

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn validation(msg: impl Into<String>) -> Self {
        ApiError(BookingError::Validation(msg.into()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self.0 {
            BookingError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            BookingError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("reservation {id} not found"),
            ),
            BookingError::Conflict(code) => (StatusCode::CONFLICT, code.as_str(), code.message().to_string()),
            BookingError::Timeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "timeout",
                "The request took too long. Please check your reservation before retrying.".to_string(),
            ),
            BookingError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            BookingError::Internal(msg) => {
                // Logged, never exposed
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };
        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── DTOs ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotsQuery {
    pub date: Option<String>,
    pub staff_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlotView {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlotsResponse {
    pub date: NaiveDate,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationBody {
    pub date: Option<String>,
    pub time: Option<String>,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub staff_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCreated {
    pub reservation_id: Ulid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub customer_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationCanceled {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
}

fn required<'a>(value: &'a Option<String>, field: &str) -> ApiResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{field} is required")))
}

fn date_param(raw: &str) -> ApiResult<NaiveDate> {
    parse_date(raw).map_err(|_| ApiError::validation(format!("date must be YYYY-MM-DD, got {raw:?}")))
}

fn time_param(raw: &str) -> ApiResult<NaiveTime> {
    parse_hhmm(raw).map_err(|_| ApiError::validation(format!("time must be HH:MM, got {raw:?}")))
}

// ── Handlers ─────────────────────────────────────────────

async fn healthz() -> &'static str {
    "ok"
}

/// GET /api/{tenant}/slots?date=YYYY-MM-DD[&staffId=]
async fn list_slots(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> ApiResult<Json<SlotsResponse>> {
    let Query(query) = query.map_err(|e| ApiError::validation(e.body_text()))?;
    let date = date_param(required(&query.date, "date")?)?;
    let staff_id = query.staff_id.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let slots = state.coordinator.day_slots(&tenant, date, staff_id).await?;
    Ok(Json(SlotsResponse {
        date,
        slots: slots
            .into_iter()
            .map(|s| SlotView {
                time: s.time,
                available: s.available,
                reason: s.reason.as_ref().map(SlotReason::as_str).map(str::to_string),
            })
            .collect(),
    }))
}

/// POST /api/{tenant}/reservations
async fn create_reservation(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: Result<Json<CreateReservationBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReservationCreated>)> {
    let Json(body) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let request = ReserveRequest {
        date: date_param(required(&body.date, "date")?)?,
        time: time_param(required(&body.time, "time")?)?,
        customer_name: required(&body.customer_name, "customerName")?.to_string(),
        phone: body.phone,
        staff_id: body.staff_id,
    };

    let record = state.coordinator.reserve(&tenant, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ReservationCreated {
            reservation_id: record.id,
            date: record.date,
            time: record.time,
            customer_name: record.customer_name,
        }),
    ))
}

/// DELETE /api/{tenant}/reservations/{id}
async fn cancel_reservation(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> ApiResult<Json<ReservationCanceled>> {
    let id = Ulid::from_string(id.trim())
        .map_err(|_| ApiError::validation(format!("invalid reservation id {id:?}")))?;
    let record = state.coordinator.cancel(&tenant, id).await?;
    Ok(Json(ReservationCanceled {
        date: record.date,
        time: record.time,
    }))
}
