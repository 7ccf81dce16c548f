use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, Role, Transaction};
use crate::services::settlement;
use crate::state::AppState;

use super::authenticate;

// POST /payments/verify
#[derive(Deserialize)]
pub struct VerifyPaymentRequest {
    pub token: String,
    pub booking_id: String,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
}

fn default_payment_method() -> String {
    "khalti".to_string()
}

#[derive(Serialize)]
pub struct PaymentResponse {
    success: bool,
    message: String,
    transaction: Transaction,
    booking: Booking,
}

pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<VerifyPaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    let actor = authenticate(&state, &headers)?;

    // Only the booking owner may pay for it.
    {
        let conn = state.db.lock().unwrap();
        let booking = queries::get_booking_by_id(&conn, &body.booking_id)?
            .ok_or_else(|| AppError::NotFound("booking".into()))?;
        if booking.user_id != actor.id {
            return Err(AppError::Forbidden);
        }
    }

    let receipt = settlement::process_payment(
        &state.db,
        state.gateway.as_ref(),
        state.notifier.as_ref(),
        &body.booking_id,
        &body.token,
        &body.payment_method,
    )
    .await?;

    Ok(Json(PaymentResponse {
        success: true,
        message: format!(
            "payment of {} confirmed for booking {}",
            receipt.transaction.amount, receipt.booking.booking_reference
        ),
        transaction: receipt.transaction,
        booking: receipt.booking,
    }))
}

// POST /payments/:booking_id/refund
#[derive(Serialize)]
pub struct RefundResponse {
    success: bool,
    message: String,
    refund_amount: rust_decimal::Decimal,
    transaction: Transaction,
    booking: Booking,
}

pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Json<RefundResponse>, AppError> {
    let actor = authenticate(&state, &headers)?;

    // Staff may refund bookings under their own accommodation; admins any.
    {
        let conn = state.db.lock().unwrap();
        let booking = queries::get_booking_by_id(&conn, &booking_id)?
            .ok_or_else(|| AppError::NotFound("booking".into()))?;
        let accommodation = queries::get_accommodation(&conn, &booking.accommodation_id)?
            .ok_or_else(|| AppError::NotFound("accommodation".into()))?;
        let owns = actor.role == Role::Staff && accommodation.staff_id == actor.id;
        if !(owns || actor.role == Role::Admin) {
            return Err(AppError::Forbidden);
        }
    }

    let receipt = settlement::process_refund(
        &state.db,
        state.gateway.as_ref(),
        &booking_id,
        Utc::now().date_naive(),
    )
    .await?;

    Ok(Json(RefundResponse {
        success: true,
        message: format!(
            "refund of {} issued for booking {}",
            receipt.amount, receipt.booking.booking_reference
        ),
        refund_amount: receipt.amount,
        transaction: receipt.transaction,
        booking: receipt.booking,
    }))
}
