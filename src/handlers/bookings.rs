use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, Role};
use crate::services::booking::{self, CreateBookingRequest};
use crate::state::AppState;

use super::authenticate;

#[derive(Serialize)]
pub struct BookingResponse {
    success: bool,
    message: String,
    booking: Booking,
}

// POST /bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let actor = authenticate(&state, &headers)?;

    let created = booking::create_booking(&state.db, &actor, &body)?;

    Ok((
        StatusCode::CREATED,
        Json(BookingResponse {
            success: true,
            message: format!("booking {} created", created.booking_reference),
            booking: created,
        }),
    ))
}

// GET /bookings
#[derive(Serialize)]
pub struct BookingListResponse {
    success: bool,
    bookings: Vec<Booking>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BookingListResponse>, AppError> {
    let actor = authenticate(&state, &headers)?;

    let bookings = {
        let conn = state.db.lock().unwrap();
        match actor.role {
            Role::Guest => queries::get_bookings_for_user(&conn, &actor.id)?,
            Role::Staff => queries::get_bookings_for_staff(&conn, &actor.id)?,
            Role::Admin => queries::get_all_bookings(&conn, 200)?,
        }
    };

    Ok(Json(BookingListResponse {
        success: true,
        bookings,
    }))
}

// PATCH /bookings/:id/status
#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub booking_status: String,
}

#[derive(Serialize)]
pub struct StatusUpdateResponse {
    success: bool,
    message: String,
    booking: Booking,
    refund_amount: rust_decimal::Decimal,
    refund_message: String,
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<StatusUpdateResponse>, AppError> {
    let actor = authenticate(&state, &headers)?;
    if !matches!(actor.role, Role::Staff | Role::Admin) {
        return Err(AppError::Forbidden);
    }

    let new_status = BookingStatus::try_parse(&body.booking_status).ok_or_else(|| {
        AppError::Validation(format!("unknown booking status: {}", body.booking_status))
    })?;

    let result = booking::update_status(
        &state.db,
        state.gateway.as_ref(),
        state.notifier.as_ref(),
        &actor,
        &id,
        new_status,
    )
    .await?;

    Ok(Json(StatusUpdateResponse {
        success: true,
        message: format!("booking status set to {}", new_status.as_str()),
        refund_amount: result.refund.amount(),
        refund_message: result.refund.message(),
        booking: result.booking,
    }))
}

// PATCH /bookings/:id/cancel
#[derive(Deserialize, Default)]
pub struct CancelRequest {
    pub cancellation_reason: Option<String>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    success: bool,
    message: String,
    booking: Booking,
    refund_amount: rust_decimal::Decimal,
    refund_message: String,
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<CancelResponse>, AppError> {
    let actor = authenticate(&state, &headers)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let result = booking::cancel_booking(
        &state.db,
        state.gateway.as_ref(),
        state.notifier.as_ref(),
        &actor,
        &id,
        body.cancellation_reason.as_deref(),
    )
    .await?;

    Ok(Json(CancelResponse {
        success: true,
        message: format!("booking {} cancelled", result.booking.booking_reference),
        refund_amount: result.refund.amount(),
        refund_message: result.refund.message(),
        booking: result.booking,
    }))
}
