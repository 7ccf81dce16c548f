use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::db::queries;
use crate::models::{
    Booking, PaymentStatus, Transaction, TransactionStatus, TransactionType,
};
use crate::services::notify::Notifier;
use crate::services::payment::{GatewayError, PaymentGateway};

/// Refund percentage applied when cancellation happens at least
/// `REFUND_CUTOFF_DAYS` whole days before check-in. One shared policy for
/// user- and staff-initiated cancellations.
const REFUND_RATE: Decimal = dec!(0.80);
const REFUND_CUTOFF_DAYS: i64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("booking not found")]
    BookingNotFound,

    #[error("booking is already paid")]
    AlreadyPaid,

    #[error("booking is not paid")]
    NotPaid,

    /// Refund implies cancellation; a checked-in or completed stay stays
    /// settled as-is.
    #[error("booking can no longer be cancelled")]
    NotCancellable,

    /// Data-integrity fault: a stored amount the gateway cannot represent.
    #[error("amount {amount} does not fit in minor units")]
    AmountOutOfRange { amount: Decimal },

    /// Business decline, not a failure: the cancellation window grants 0.
    #[error("no refund available for this booking")]
    NoRefundAvailable,

    /// Data-integrity fault: a paid booking with no completed payment row.
    #[error("original payment transaction not found")]
    PaymentRecordMissing,

    #[error("{0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct PaymentReceipt {
    pub transaction: Transaction,
    pub booking: Booking,
}

#[derive(Debug)]
pub struct RefundReceipt {
    pub transaction: Transaction,
    pub booking: Booking,
    pub amount: Decimal,
}

/// Convert a major-unit decimal amount to the gateway's integer minor units
/// (paisa). Only the gateway boundary ever sees minor units. An amount that
/// overflows i64 minor units is an error, not a zero-amount charge.
pub fn minor_units(amount: Decimal) -> Result<i64, SettlementError> {
    amount
        .round_dp(2)
        .checked_mul(dec!(100))
        .and_then(|minor| minor.to_i64())
        .ok_or(SettlementError::AmountOutOfRange { amount })
}

/// Refund policy (time-windowed): 80% when cancelling at least two whole
/// days before check-in, nothing otherwise. A past check-in date yields a
/// negative day count and therefore no refund.
pub fn refund_amount(booking: &Booking, today: NaiveDate) -> Decimal {
    if !booking.is_paid() {
        return dec!(0);
    }
    let days_until_checkin = (booking.check_in_date - today).num_days();
    if days_until_checkin >= REFUND_CUTOFF_DAYS {
        crate::services::pricing::money(booking.total_amount * REFUND_RATE)
    } else {
        dec!(0)
    }
}

/// Verify a client-submitted payment token and settle it: ledger row plus
/// booking confirmed/paid in one database transaction. The gateway call
/// happens before the local transaction opens; if persistence fails after
/// the gateway accepted, the charge exists externally only and is logged
/// for manual reconciliation.
pub async fn process_payment(
    db: &Mutex<Connection>,
    gateway: &dyn PaymentGateway,
    notifier: &dyn Notifier,
    booking_id: &str,
    token: &str,
    payment_method: &str,
) -> Result<PaymentReceipt, SettlementError> {
    let booking = {
        let conn = db.lock().unwrap();
        queries::get_booking_by_id(&conn, booking_id)?.ok_or(SettlementError::BookingNotFound)?
    };

    if booking.is_paid() {
        return Err(SettlementError::AlreadyPaid);
    }

    let amount_minor = minor_units(booking.total_amount)?;
    let verified = match gateway.verify_payment(token, amount_minor).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                booking_id,
                amount = %booking.total_amount,
                error = %e,
                "payment verification failed"
            );
            return Err(e.into());
        }
    };

    let now = Utc::now().naive_utc();
    let txn = Transaction {
        id: Uuid::new_v4().to_string(),
        booking_id: booking.id.clone(),
        user_id: booking.user_id.clone(),
        transaction_id: verified.reference.clone(),
        transaction_type: TransactionType::Payment,
        amount: booking.total_amount,
        status: TransactionStatus::Completed,
        payment_method: Some(payment_method.to_string()),
        payment_response: Some(verified.raw_response.clone()),
        refund_id: None,
        refund_amount: None,
        refunded_at: None,
        created_at: now,
    };

    let settled = apply_payment(db, &booking, &txn, payment_method);
    let booking = match settled {
        Ok(b) => b,
        Err(e) => {
            // The gateway has already charged; local state does not reflect
            // it. Out-of-band follow-up required.
            tracing::error!(
                booking_id,
                gateway_reference = %verified.reference,
                amount = %booking.total_amount,
                error = %e,
                "payment settled at gateway but not persisted; manual reconciliation needed"
            );
            return Err(e);
        }
    };

    notify_payment(db, notifier, &booking).await;

    Ok(PaymentReceipt {
        transaction: txn,
        booking,
    })
}

fn apply_payment(
    db: &Mutex<Connection>,
    booking: &Booking,
    txn: &Transaction,
    payment_method: &str,
) -> Result<Booking, SettlementError> {
    let mut conn = db.lock().unwrap();
    let tx = conn.transaction().map_err(anyhow::Error::from)?;

    // Re-check under the transaction: a concurrent settlement may have won.
    let current =
        queries::get_booking_by_id(&tx, &booking.id)?.ok_or(SettlementError::BookingNotFound)?;
    if current.is_paid() {
        return Err(SettlementError::AlreadyPaid);
    }

    queries::insert_transaction(&tx, txn)?;
    queries::mark_booking_paid(&tx, &booking.id, payment_method, txn.created_at)?;

    let updated =
        queries::get_booking_by_id(&tx, &booking.id)?.ok_or(SettlementError::BookingNotFound)?;
    tx.commit().map_err(anyhow::Error::from)?;

    tracing::info!(
        booking_id = %booking.id,
        reference = %booking.booking_reference,
        gateway_reference = %txn.transaction_id,
        amount = %txn.amount,
        "payment settled"
    );

    Ok(updated)
}

async fn notify_payment(db: &Mutex<Connection>, notifier: &dyn Notifier, booking: &Booking) {
    let (payer_email, host_email) = {
        let conn = db.lock().unwrap();
        let payer = queries::get_user(&conn, &booking.user_id)
            .ok()
            .flatten()
            .map(|u| u.email);
        let host = queries::get_accommodation(&conn, &booking.accommodation_id)
            .ok()
            .flatten()
            .and_then(|a| a.contact_email);
        (payer, host)
    };

    let subject = format!("Booking {} confirmed", booking.booking_reference);
    let body = format!(
        "Your booking {} is confirmed. Check-in {}, check-out {}. Amount paid: {}.",
        booking.booking_reference,
        booking.check_in_date,
        booking.check_out_date,
        booking.total_amount
    );

    for to in [payer_email, host_email].into_iter().flatten() {
        if let Err(e) = notifier.send(&to, &subject, &body).await {
            tracing::warn!(to, error = %e, "payment confirmation notification failed");
        }
    }
}

/// Refund a paid booking under the time-windowed policy: gateway refund
/// first, then one database transaction that appends the refund ledger row,
/// links it onto the original payment row, and flips the booking to
/// cancelled/refunded. A second call finds `payment_status == refunded` and
/// fails fast with `NotPaid`, which is what makes the operation idempotent.
pub async fn process_refund(
    db: &Mutex<Connection>,
    gateway: &dyn PaymentGateway,
    booking_id: &str,
    today: NaiveDate,
) -> Result<RefundReceipt, SettlementError> {
    let (booking, original) = {
        let conn = db.lock().unwrap();
        let booking = queries::get_booking_by_id(&conn, booking_id)?
            .ok_or(SettlementError::BookingNotFound)?;
        let original = queries::find_completed_payment(&conn, booking_id)?;
        (booking, original)
    };

    if booking.payment_status != PaymentStatus::Paid {
        return Err(SettlementError::NotPaid);
    }
    if !booking.booking_status.is_cancellable() {
        return Err(SettlementError::NotCancellable);
    }

    let amount = refund_amount(&booking, today);
    if amount.is_zero() {
        return Err(SettlementError::NoRefundAvailable);
    }

    let original = match original {
        Some(txn) => txn,
        None => {
            tracing::error!(
                booking_id,
                "paid booking has no completed payment transaction"
            );
            return Err(SettlementError::PaymentRecordMissing);
        }
    };

    let refund = match gateway
        .initiate_refund(&original.transaction_id, minor_units(amount)?)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(
                booking_id,
                gateway_reference = %original.transaction_id,
                amount = %amount,
                error = %e,
                "refund initiation failed"
            );
            return Err(e.into());
        }
    };

    let now = Utc::now().naive_utc();
    let txn = Transaction {
        id: Uuid::new_v4().to_string(),
        booking_id: booking.id.clone(),
        user_id: booking.user_id.clone(),
        transaction_id: refund.refund_reference.clone(),
        transaction_type: TransactionType::Refund,
        amount,
        status: TransactionStatus::Completed,
        payment_method: original.payment_method.clone(),
        payment_response: Some(refund.raw_response.clone()),
        refund_id: Some(original.transaction_id.clone()),
        refund_amount: Some(amount),
        refunded_at: Some(now),
        created_at: now,
    };

    let applied = apply_refund(db, &booking, &original, &txn, amount);
    let booking = match applied {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(
                booking_id,
                gateway_refund_reference = %refund.refund_reference,
                amount = %amount,
                error = %e,
                "refund settled at gateway but not persisted; manual reconciliation needed"
            );
            return Err(e);
        }
    };

    Ok(RefundReceipt {
        transaction: txn,
        booking,
        amount,
    })
}

fn apply_refund(
    db: &Mutex<Connection>,
    booking: &Booking,
    original: &Transaction,
    txn: &Transaction,
    amount: Decimal,
) -> Result<Booking, SettlementError> {
    let mut conn = db.lock().unwrap();
    let tx = conn.transaction().map_err(anyhow::Error::from)?;

    let current =
        queries::get_booking_by_id(&tx, &booking.id)?.ok_or(SettlementError::BookingNotFound)?;
    if current.payment_status != PaymentStatus::Paid {
        return Err(SettlementError::NotPaid);
    }
    // The guest may have checked in while the gateway call was in flight.
    if !current.booking_status.is_cancellable() {
        return Err(SettlementError::NotCancellable);
    }

    queries::insert_transaction(&tx, txn)?;
    queries::attach_refund_to_payment(&tx, &original.id, &txn.transaction_id, amount, txn.created_at)?;
    queries::mark_booking_refunded(&tx, &booking.id, txn.created_at)?;

    let updated =
        queries::get_booking_by_id(&tx, &booking.id)?.ok_or(SettlementError::BookingNotFound)?;
    tx.commit().map_err(anyhow::Error::from)?;

    tracing::info!(
        booking_id = %booking.id,
        reference = %booking.booking_reference,
        gateway_refund_reference = %txn.transaction_id,
        amount = %amount,
        "refund settled"
    );

    Ok(updated)
}
