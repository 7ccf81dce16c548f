use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::queries;
use crate::models::{Booking, BookingService, BookingStatus, PaymentStatus, Role, User};
use crate::services::notify::Notifier;
use crate::services::payment::PaymentGateway;
use crate::services::{availability, pricing, settlement};
use crate::services::settlement::SettlementError;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSelection {
    pub service_id: String,
    pub quantity: i64,
}

/// Typed creation command: exactly the fields a guest may set, nothing else.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub accommodation_id: String,
    pub room_id: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub number_of_rooms: i64,
    pub number_of_guests: i64,
    #[serde(default)]
    pub services: Vec<ServiceSelection>,
    pub special_requests: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("only {available} room(s) available for the selected dates")]
    InsufficientAvailability { available: i64 },

    #[error("room sleeps at most {max_guests} guest(s) for the requested number of rooms")]
    GuestCapacityExceeded { max_guests: i64 },

    #[error("booking not found")]
    NotFound,

    #[error("cannot change booking status from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("booking is already cancelled")]
    AlreadyCancelled,

    #[error("booking can no longer be cancelled")]
    NotCancellable,

    #[error("not allowed to act on this booking")]
    Forbidden,

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

/// How the refund side of a cancellation went. The cancellation itself can
/// succeed while the refund is declined or fails; callers get both facts
/// instead of a side-channel log line.
#[derive(Debug, Clone)]
pub enum RefundOutcome {
    /// Nothing was paid, nothing to refund.
    NotRequired,
    Refunded { amount: Decimal },
    /// Policy grants no refund (inside the cutoff window).
    Declined { reason: String },
    /// Gateway or persistence failure; the booking is cancelled anyway.
    Failed { message: String },
}

impl RefundOutcome {
    pub fn amount(&self) -> Decimal {
        match self {
            RefundOutcome::Refunded { amount } => *amount,
            _ => Decimal::ZERO,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RefundOutcome::NotRequired => "no payment to refund".to_string(),
            RefundOutcome::Refunded { amount } => format!("refund of {amount} issued"),
            RefundOutcome::Declined { reason } => reason.clone(),
            RefundOutcome::Failed { message } => {
                format!("cancellation succeeded but the refund failed: {message}")
            }
        }
    }
}

#[derive(Debug)]
pub struct Cancellation {
    pub booking: Booking,
    pub refund: RefundOutcome,
}

/// Create a booking in pending/unpaid after validation. The availability
/// check runs inside the same transaction as the insert so two concurrent
/// requests cannot jointly overbook a room.
pub fn create_booking(
    db: &Mutex<Connection>,
    actor: &User,
    req: &CreateBookingRequest,
) -> Result<Booking, BookingError> {
    let today = Utc::now().date_naive();

    if req.check_out_date <= req.check_in_date {
        return Err(BookingError::Validation(
            "check-out date must be after check-in date".into(),
        ));
    }
    if req.check_in_date < today {
        return Err(BookingError::Validation(
            "check-in date must not be in the past".into(),
        ));
    }
    if req.number_of_rooms < 1 {
        return Err(BookingError::Validation("at least one room is required".into()));
    }
    if req.number_of_guests < 1 {
        return Err(BookingError::Validation("at least one guest is required".into()));
    }

    let mut conn = db.lock().unwrap();
    let tx = conn.transaction().map_err(anyhow::Error::from)?;

    let accommodation = queries::get_accommodation(&tx, &req.accommodation_id)?
        .ok_or_else(|| BookingError::Validation("accommodation not found".into()))?;
    if !accommodation.is_verified {
        return Err(BookingError::Validation(
            "accommodation is not accepting bookings".into(),
        ));
    }

    let room = queries::get_room(&tx, &req.room_id)?
        .ok_or_else(|| BookingError::Validation("room not found".into()))?;
    if room.accommodation_id != accommodation.id {
        return Err(BookingError::Validation(
            "room does not belong to the selected accommodation".into(),
        ));
    }

    if !availability::guest_capacity_ok(&room, req.number_of_rooms, req.number_of_guests) {
        return Err(BookingError::GuestCapacityExceeded {
            max_guests: room.capacity * req.number_of_rooms,
        });
    }

    let available = availability::available_units(&tx, &room, req.check_in_date, req.check_out_date)?;
    if available < req.number_of_rooms {
        return Err(BookingError::InsufficientAvailability { available });
    }

    // Snapshot service prices at booking time.
    let mut selected = Vec::with_capacity(req.services.len());
    for sel in &req.services {
        if sel.quantity < 1 {
            return Err(BookingError::Validation("service quantity must be positive".into()));
        }
        let service = queries::get_extra_service(&tx, &sel.service_id)?
            .ok_or_else(|| BookingError::Validation(format!("service {} not found", sel.service_id)))?;
        if service.accommodation_id != accommodation.id || !service.is_active {
            return Err(BookingError::Validation(format!(
                "service {} is not available at this accommodation",
                sel.service_id
            )));
        }
        selected.push((service, sel.quantity));
    }

    let quote = pricing::quote(
        &room,
        req.check_in_date,
        req.check_out_date,
        req.number_of_rooms,
        &selected,
    );

    let prefix = format!("BK-{}-", today.format("%Y%m%d"));
    let sequence = queries::next_reference_sequence(&tx, &prefix)?;
    let now = Utc::now().naive_utc();

    let booking = Booking {
        id: Uuid::new_v4().to_string(),
        booking_reference: format!("{prefix}{sequence:04}"),
        user_id: actor.id.clone(),
        accommodation_id: accommodation.id,
        room_id: room.id,
        check_in_date: req.check_in_date,
        check_out_date: req.check_out_date,
        number_of_rooms: req.number_of_rooms,
        number_of_guests: req.number_of_guests,
        total_nights: quote.total_nights,
        room_subtotal: quote.room_subtotal,
        services_subtotal: quote.services_subtotal,
        total_amount: quote.total_amount,
        booking_status: BookingStatus::Pending,
        payment_status: PaymentStatus::Unpaid,
        payment_method: None,
        special_requests: req.special_requests.clone(),
        cancellation_reason: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    };

    queries::insert_booking(&tx, &booking)?;
    for line in &quote.lines {
        queries::insert_booking_service(
            &tx,
            &BookingService {
                id: Uuid::new_v4().to_string(),
                booking_id: booking.id.clone(),
                service_id: line.service_id.clone(),
                quantity: line.quantity,
                price: line.price,
                subtotal: line.subtotal,
            },
        )?;
    }

    tx.commit().map_err(anyhow::Error::from)?;

    tracing::info!(
        booking_id = %booking.id,
        reference = %booking.booking_reference,
        room_id = %booking.room_id,
        total = %booking.total_amount,
        "booking created"
    );

    Ok(booking)
}

/// Owner-initiated cancellation. Allowed only for pending/confirmed bookings
/// with a future check-in. A paid booking triggers a best-effort refund
/// through the shared policy; refund failure never blocks the cancellation.
pub async fn cancel_booking(
    db: &Mutex<Connection>,
    gateway: &dyn PaymentGateway,
    notifier: &dyn Notifier,
    actor: &User,
    booking_id: &str,
    reason: Option<&str>,
) -> Result<Cancellation, BookingError> {
    let booking = {
        let conn = db.lock().unwrap();
        queries::get_booking_by_id(&conn, booking_id)?.ok_or(BookingError::NotFound)?
    };

    if booking.user_id != actor.id {
        return Err(BookingError::Forbidden);
    }
    if booking.booking_status == BookingStatus::Cancelled {
        return Err(BookingError::AlreadyCancelled);
    }
    if !booking.booking_status.is_cancellable() {
        return Err(BookingError::NotCancellable);
    }
    let today = Utc::now().date_naive();
    if booking.check_in_date <= today {
        return Err(BookingError::NotCancellable);
    }

    let (booking, refund) = cancel_with_refund(db, gateway, &booking, reason, today).await?;

    let conn_user_email = actor.email.clone();
    let body = format!(
        "Your booking {} has been cancelled. {}",
        booking.booking_reference,
        refund.message()
    );
    if let Err(e) = notifier
        .send(&conn_user_email, "Booking cancelled", &body)
        .await
    {
        tracing::warn!(to = %conn_user_email, error = %e, "cancellation notification failed");
    }

    Ok(Cancellation { booking, refund })
}

/// Staff status update for bookings under the staff member's own
/// accommodation (admins may act on any). Transitions outside the lifecycle
/// table are rejected. Cancelling a paid booking routes through the shared
/// refund policy, best-effort.
pub async fn update_status(
    db: &Mutex<Connection>,
    gateway: &dyn PaymentGateway,
    notifier: &dyn Notifier,
    actor: &User,
    booking_id: &str,
    new_status: BookingStatus,
) -> Result<Cancellation, BookingError> {
    let booking = {
        let conn = db.lock().unwrap();
        let booking = queries::get_booking_by_id(&conn, booking_id)?.ok_or(BookingError::NotFound)?;
        let accommodation = queries::get_accommodation(&conn, &booking.accommodation_id)?
            .ok_or(BookingError::NotFound)?;
        let owns = actor.role == Role::Staff && accommodation.staff_id == actor.id;
        if !(owns || actor.role == Role::Admin) {
            return Err(BookingError::Forbidden);
        }
        booking
    };

    if !booking.booking_status.can_transition_to(new_status) {
        return Err(BookingError::InvalidTransition {
            from: booking.booking_status.as_str(),
            to: new_status.as_str(),
        });
    }

    if new_status == BookingStatus::Cancelled {
        let today = Utc::now().date_naive();
        let (booking, refund) =
            cancel_with_refund(db, gateway, &booking, Some("cancelled by accommodation staff"), today)
                .await?;

        let guest_email = {
            let conn = db.lock().unwrap();
            queries::get_user(&conn, &booking.user_id)
                .ok()
                .flatten()
                .map(|u| u.email)
        };
        if let Some(to) = guest_email {
            let body = format!(
                "The accommodation has cancelled your booking {}. {}",
                booking.booking_reference,
                refund.message()
            );
            if let Err(e) = notifier.send(&to, "Booking cancelled by accommodation", &body).await {
                tracing::warn!(to, error = %e, "staff cancellation notification failed");
            }
        }

        return Ok(Cancellation { booking, refund });
    }

    // Re-check and write under one transaction; the pre-check above ran on
    // a read that may already be stale.
    let booking = {
        let mut conn = db.lock().unwrap();
        let tx = conn.transaction().map_err(anyhow::Error::from)?;
        let current =
            queries::get_booking_by_id(&tx, booking_id)?.ok_or(BookingError::NotFound)?;
        if !current.booking_status.can_transition_to(new_status)
            || !queries::update_booking_status(&tx, booking_id, current.booking_status, new_status)?
        {
            return Err(BookingError::InvalidTransition {
                from: current.booking_status.as_str(),
                to: new_status.as_str(),
            });
        }
        let updated =
            queries::get_booking_by_id(&tx, booking_id)?.ok_or(BookingError::NotFound)?;
        tx.commit().map_err(anyhow::Error::from)?;
        updated
    };

    tracing::info!(
        booking_id,
        status = new_status.as_str(),
        "booking status updated"
    );

    Ok(Cancellation {
        booking,
        refund: RefundOutcome::NotRequired,
    })
}

/// Shared cancel path: refund first when a payment exists (the settlement
/// engine cancels the booking atomically with the refund), otherwise — and
/// whenever the refund is declined or fails — mark the booking cancelled
/// directly.
async fn cancel_with_refund(
    db: &Mutex<Connection>,
    gateway: &dyn PaymentGateway,
    booking: &Booking,
    reason: Option<&str>,
    today: NaiveDate,
) -> Result<(Booking, RefundOutcome), BookingError> {
    let refund = if booking.is_paid() {
        match settlement::process_refund(db, gateway, &booking.id, today).await {
            Ok(receipt) => RefundOutcome::Refunded {
                amount: receipt.amount,
            },
            Err(SettlementError::NoRefundAvailable) => RefundOutcome::Declined {
                reason: "no refund available for this cancellation window".into(),
            },
            Err(e) => {
                tracing::error!(
                    booking_id = %booking.id,
                    error = %e,
                    "refund failed during cancellation; cancelling anyway"
                );
                RefundOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    } else {
        RefundOutcome::NotRequired
    };

    let booking = {
        let conn = db.lock().unwrap();
        if matches!(refund, RefundOutcome::Refunded { .. }) {
            // Settlement already cancelled the booking; just record why.
            queries::set_cancellation_reason(&conn, &booking.id, reason)?;
        } else if !queries::mark_booking_cancelled(&conn, &booking.id, reason, Utc::now().naive_utc())?
        {
            // The booking moved on (e.g. the guest checked in) while the
            // gateway call was in flight.
            return Err(BookingError::NotCancellable);
        }
        queries::get_booking_by_id(&conn, &booking.id)?.ok_or(BookingError::NotFound)?
    };

    Ok((booking, refund))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{Accommodation, ExtraService, Room};
    use crate::services::notify::NoopNotifier;
    use crate::services::payment::{GatewayError, GatewayRefund, VerifiedPayment};
    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct AcceptAllGateway;

    #[async_trait]
    impl PaymentGateway for AcceptAllGateway {
        async fn verify_payment(
            &self,
            token: &str,
            amount_minor: i64,
        ) -> Result<VerifiedPayment, GatewayError> {
            Ok(VerifiedPayment {
                reference: format!("pay-{token}"),
                raw_response: serde_json::json!({"amount": amount_minor}),
            })
        }

        async fn initiate_refund(
            &self,
            original_reference: &str,
            _amount_minor: i64,
        ) -> Result<GatewayRefund, GatewayError> {
            Ok(GatewayRefund {
                refund_reference: format!("ref-{original_reference}"),
                raw_response: serde_json::json!({}),
            })
        }
    }

    struct BrokenRefundGateway;

    #[async_trait]
    impl PaymentGateway for BrokenRefundGateway {
        async fn verify_payment(
            &self,
            token: &str,
            amount_minor: i64,
        ) -> Result<VerifiedPayment, GatewayError> {
            Ok(VerifiedPayment {
                reference: format!("pay-{token}"),
                raw_response: serde_json::json!({"amount": amount_minor}),
            })
        }

        async fn initiate_refund(
            &self,
            _original_reference: &str,
            _amount_minor: i64,
        ) -> Result<GatewayRefund, GatewayError> {
            Err(GatewayError::Unavailable("connection reset".into()))
        }
    }

    fn guest() -> User {
        User {
            id: "guest-1".into(),
            name: "Guest".into(),
            email: "guest@example.com".into(),
            role: Role::Guest,
        }
    }

    fn staff() -> User {
        User {
            id: "staff-1".into(),
            name: "Host".into(),
            email: "host@example.com".into(),
            role: Role::Staff,
        }
    }

    fn other_staff() -> User {
        User {
            id: "staff-2".into(),
            name: "Other".into(),
            email: "other@example.com".into(),
            role: Role::Staff,
        }
    }

    fn setup() -> Mutex<Connection> {
        let conn = db::init_db(":memory:").unwrap();
        queries::insert_user(&conn, &guest(), "tok-guest").unwrap();
        queries::insert_user(&conn, &staff(), "tok-staff").unwrap();
        queries::insert_user(&conn, &other_staff(), "tok-other").unwrap();
        queries::insert_accommodation(
            &conn,
            &Accommodation {
                id: "acc-1".into(),
                staff_id: "staff-1".into(),
                name: "Lakeside Inn".into(),
                contact_email: Some("desk@lakeside.example".into()),
                is_verified: true,
            },
        )
        .unwrap();
        queries::insert_room(
            &conn,
            &Room {
                id: "room-1".into(),
                accommodation_id: "acc-1".into(),
                name: "Twin".into(),
                capacity: 2,
                total_rooms: 2,
                base_price: dec!(1000),
            },
        )
        .unwrap();
        queries::insert_extra_service(
            &conn,
            &ExtraService {
                id: "svc-breakfast".into(),
                accommodation_id: "acc-1".into(),
                name: "Breakfast".into(),
                price: dec!(250),
                is_active: true,
            },
        )
        .unwrap();
        Mutex::new(conn)
    }

    fn request(days_ahead: i64, nights: i64, rooms: i64, guests: i64) -> CreateBookingRequest {
        let check_in = Utc::now().date_naive() + Duration::days(days_ahead);
        CreateBookingRequest {
            accommodation_id: "acc-1".into(),
            room_id: "room-1".into(),
            check_in_date: check_in,
            check_out_date: check_in + Duration::days(nights),
            number_of_rooms: rooms,
            number_of_guests: guests,
            services: vec![],
            special_requests: None,
        }
    }

    #[test]
    fn create_booking_prices_and_references() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 5, 2, 4)).unwrap();

        assert_eq!(booking.booking_status, BookingStatus::Pending);
        assert_eq!(booking.payment_status, PaymentStatus::Unpaid);
        assert_eq!(booking.total_nights, 5);
        assert_eq!(booking.room_subtotal, dec!(10000.00));
        assert_eq!(booking.total_amount, dec!(10000.00));
        let prefix = format!("BK-{}-", Utc::now().date_naive().format("%Y%m%d"));
        assert!(booking.booking_reference.starts_with(&prefix));

        let second = create_booking(&db, &guest(), &request(30, 2, 1, 2)).unwrap();
        assert_ne!(second.booking_reference, booking.booking_reference);
    }

    #[test]
    fn create_booking_snapshots_service_prices() {
        let db = setup();
        let mut req = request(5, 2, 1, 2);
        req.services = vec![ServiceSelection {
            service_id: "svc-breakfast".into(),
            quantity: 4,
        }];
        let booking = create_booking(&db, &guest(), &req).unwrap();

        assert_eq!(booking.services_subtotal, dec!(1000.00));
        assert_eq!(booking.total_amount, booking.room_subtotal + booking.services_subtotal);

        let conn = db.lock().unwrap();
        let lines = queries::get_booking_services(&conn, &booking.id).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].price, dec!(250));
        assert_eq!(lines[0].subtotal, dec!(1000.00));
    }

    #[test]
    fn overbooking_is_rejected_and_retry_still_fails() {
        let db = setup();
        create_booking(&db, &guest(), &request(10, 2, 2, 4)).unwrap();

        let overlapping = request(11, 2, 1, 1);
        let first = create_booking(&db, &guest(), &overlapping);
        assert!(matches!(
            first,
            Err(BookingError::InsufficientAvailability { available: 0 })
        ));
        let retry = create_booking(&db, &guest(), &overlapping);
        assert!(matches!(
            retry,
            Err(BookingError::InsufficientAvailability { available: 0 })
        ));

        // Nothing was inserted by the failed attempts.
        let conn = db.lock().unwrap();
        assert_eq!(queries::get_bookings_for_user(&conn, "guest-1").unwrap().len(), 1);
    }

    #[test]
    fn back_to_back_stays_are_allowed() {
        let db = setup();
        let first = create_booking(&db, &guest(), &request(10, 2, 2, 4)).unwrap();

        // Check-in on the prior check-out day.
        let mut touching = request(12, 2, 1, 1);
        touching.check_in_date = first.check_out_date;
        touching.check_out_date = first.check_out_date + Duration::days(2);
        assert!(create_booking(&db, &guest(), &touching).is_ok());
    }

    #[test]
    fn guest_capacity_is_enforced() {
        let db = setup();
        let result = create_booking(&db, &guest(), &request(5, 2, 1, 3));
        assert!(matches!(
            result,
            Err(BookingError::GuestCapacityExceeded { max_guests: 2 })
        ));
    }

    #[test]
    fn date_ordering_is_enforced() {
        let db = setup();
        let mut req = request(5, 2, 1, 2);
        req.check_out_date = req.check_in_date;
        assert!(matches!(
            create_booking(&db, &guest(), &req),
            Err(BookingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn cancel_unpaid_pending_booking() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();

        let result = cancel_booking(
            &db,
            &AcceptAllGateway,
            &NoopNotifier,
            &guest(),
            &booking.id,
            Some("change of plans"),
        )
        .await
        .unwrap();

        assert_eq!(result.booking.booking_status, BookingStatus::Cancelled);
        assert!(matches!(result.refund, RefundOutcome::NotRequired));
        assert_eq!(
            result.booking.cancellation_reason.as_deref(),
            Some("change of plans")
        );
        assert!(result.booking.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn cancel_paid_booking_refunds_through_policy() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();
        settlement::process_payment(&db, &AcceptAllGateway, &NoopNotifier, &booking.id, "t1", "khalti")
            .await
            .unwrap();

        let result = cancel_booking(&db, &AcceptAllGateway, &NoopNotifier, &guest(), &booking.id, None)
            .await
            .unwrap();

        assert_eq!(result.booking.booking_status, BookingStatus::Cancelled);
        assert_eq!(result.booking.payment_status, PaymentStatus::Refunded);
        assert_eq!(result.refund.amount(), dec!(1600.00)); // 2000 * 0.80
    }

    #[tokio::test]
    async fn cancel_survives_refund_failure() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();
        settlement::process_payment(&db, &AcceptAllGateway, &NoopNotifier, &booking.id, "t1", "khalti")
            .await
            .unwrap();

        let result =
            cancel_booking(&db, &BrokenRefundGateway, &NoopNotifier, &guest(), &booking.id, None)
                .await
                .unwrap();

        assert_eq!(result.booking.booking_status, BookingStatus::Cancelled);
        // Money was never returned, so the payment record stands.
        assert_eq!(result.booking.payment_status, PaymentStatus::Paid);
        assert!(matches!(result.refund, RefundOutcome::Failed { .. }));
    }

    /// Gateway whose refund call races a legal confirmed -> checked_in
    /// transition in before returning, like a front desk checking the guest
    /// in while the refund request is in flight.
    struct CheckInDuringRefundGateway<'a> {
        db: &'a Mutex<Connection>,
        booking_id: String,
    }

    #[async_trait]
    impl PaymentGateway for CheckInDuringRefundGateway<'_> {
        async fn verify_payment(
            &self,
            token: &str,
            amount_minor: i64,
        ) -> Result<VerifiedPayment, GatewayError> {
            Ok(VerifiedPayment {
                reference: format!("pay-{token}"),
                raw_response: serde_json::json!({"amount": amount_minor}),
            })
        }

        async fn initiate_refund(
            &self,
            original_reference: &str,
            _amount_minor: i64,
        ) -> Result<GatewayRefund, GatewayError> {
            let conn = self.db.lock().unwrap();
            assert!(queries::update_booking_status(
                &conn,
                &self.booking_id,
                BookingStatus::Confirmed,
                BookingStatus::CheckedIn,
            )
            .unwrap());
            Ok(GatewayRefund {
                refund_reference: format!("ref-{original_reference}"),
                raw_response: serde_json::json!({}),
            })
        }
    }

    #[tokio::test]
    async fn cancel_fails_when_guest_checks_in_mid_refund() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();
        settlement::process_payment(&db, &AcceptAllGateway, &NoopNotifier, &booking.id, "t1", "khalti")
            .await
            .unwrap();

        let gateway = CheckInDuringRefundGateway {
            db: &db,
            booking_id: booking.id.clone(),
        };
        let result =
            cancel_booking(&db, &gateway, &NoopNotifier, &guest(), &booking.id, None).await;
        assert!(matches!(result, Err(BookingError::NotCancellable)));

        // The stay stands: checked in, still paid, never cancelled.
        let conn = db.lock().unwrap();
        let current = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
        assert_eq!(current.booking_status, BookingStatus::CheckedIn);
        assert_eq!(current.payment_status, PaymentStatus::Paid);
        assert!(current.cancelled_at.is_none());
    }

    #[tokio::test]
    async fn stale_status_write_cannot_revive_a_cancelled_booking() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();
        {
            let conn = db.lock().unwrap();
            assert!(queries::update_booking_status(
                &conn,
                &booking.id,
                BookingStatus::Pending,
                BookingStatus::Cancelled,
            )
            .unwrap());
            // A write predicated on the pre-cancel status must not land.
            assert!(!queries::update_booking_status(
                &conn,
                &booking.id,
                BookingStatus::Pending,
                BookingStatus::Confirmed,
            )
            .unwrap());
        }

        let result = update_status(
            &db,
            &AcceptAllGateway,
            &NoopNotifier,
            &staff(),
            &booking.id,
            BookingStatus::Confirmed,
        )
        .await;
        assert!(matches!(result, Err(BookingError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn cancel_is_owner_only() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();

        let result = cancel_booking(
            &db,
            &AcceptAllGateway,
            &NoopNotifier,
            &other_staff(),
            &booking.id,
            None,
        )
        .await;
        assert!(matches!(result, Err(BookingError::Forbidden)));
    }

    #[tokio::test]
    async fn cancel_rejects_checked_in_and_already_cancelled() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();

        {
            let conn = db.lock().unwrap();
            queries::update_booking_status(
                &conn,
                &booking.id,
                BookingStatus::Pending,
                BookingStatus::CheckedIn,
            )
            .unwrap();
        }
        let result =
            cancel_booking(&db, &AcceptAllGateway, &NoopNotifier, &guest(), &booking.id, None).await;
        assert!(matches!(result, Err(BookingError::NotCancellable)));

        {
            let conn = db.lock().unwrap();
            queries::update_booking_status(
                &conn,
                &booking.id,
                BookingStatus::CheckedIn,
                BookingStatus::Cancelled,
            )
            .unwrap();
        }
        let result =
            cancel_booking(&db, &AcceptAllGateway, &NoopNotifier, &guest(), &booking.id, None).await;
        assert!(matches!(result, Err(BookingError::AlreadyCancelled)));
    }

    #[tokio::test]
    async fn staff_updates_follow_the_transition_table() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();

        // pending -> checked_in skips confirmed.
        let result = update_status(
            &db,
            &AcceptAllGateway,
            &NoopNotifier,
            &staff(),
            &booking.id,
            BookingStatus::CheckedIn,
        )
        .await;
        assert!(matches!(result, Err(BookingError::InvalidTransition { .. })));

        let confirmed = update_status(
            &db,
            &AcceptAllGateway,
            &NoopNotifier,
            &staff(),
            &booking.id,
            BookingStatus::Confirmed,
        )
        .await
        .unwrap();
        assert_eq!(confirmed.booking.booking_status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn staff_scope_is_enforced() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();

        let result = update_status(
            &db,
            &AcceptAllGateway,
            &NoopNotifier,
            &other_staff(),
            &booking.id,
            BookingStatus::Confirmed,
        )
        .await;
        assert!(matches!(result, Err(BookingError::Forbidden)));
    }

    #[tokio::test]
    async fn staff_cancel_of_paid_booking_auto_refunds() {
        let db = setup();
        let booking = create_booking(&db, &guest(), &request(5, 2, 1, 2)).unwrap();
        settlement::process_payment(&db, &AcceptAllGateway, &NoopNotifier, &booking.id, "t1", "khalti")
            .await
            .unwrap();

        let result = update_status(
            &db,
            &AcceptAllGateway,
            &NoopNotifier,
            &staff(),
            &booking.id,
            BookingStatus::Cancelled,
        )
        .await
        .unwrap();

        assert_eq!(result.booking.booking_status, BookingStatus::Cancelled);
        assert_eq!(result.booking.payment_status, PaymentStatus::Refunded);
        assert_eq!(result.refund.amount(), dec!(1600.00));
    }
}
