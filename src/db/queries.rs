use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::models::{
    Accommodation, Booking, BookingService, BookingStatus, ExtraService, PaymentStatus, Role, Room,
    Transaction, TransactionStatus, TransactionType, User,
};

const DATE_FMT: &str = "%Y-%m-%d";
const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

fn fmt_dt(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FMT).to_string()
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, DATE_FMT).unwrap_or_else(|_| Utc::now().date_naive())
}

fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DATETIME_FMT).unwrap_or_else(|_| Utc::now().naive_utc())
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

// ── Users ──

pub fn get_user(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    let result = conn
        .query_row(
            "SELECT id, name, email, role FROM users WHERE id = ?1",
            params![id],
            parse_user_row,
        )
        .optional()?;
    Ok(result)
}

pub fn get_user_by_token(conn: &Connection, token: &str) -> anyhow::Result<Option<User>> {
    let result = conn
        .query_row(
            "SELECT id, name, email, role FROM users WHERE api_token = ?1",
            params![token],
            parse_user_row,
        )
        .optional()?;
    Ok(result)
}

pub fn insert_user(conn: &Connection, user: &User, api_token: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, role, api_token) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user.id, user.name, user.email, user.role.as_str(), api_token],
    )?;
    Ok(())
}

fn parse_user_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: Role::parse(&row.get::<_, String>(3)?),
    })
}

// ── Accommodations ──

pub fn get_accommodation(conn: &Connection, id: &str) -> anyhow::Result<Option<Accommodation>> {
    let result = conn
        .query_row(
            "SELECT id, staff_id, name, contact_email, is_verified FROM accommodations WHERE id = ?1",
            params![id],
            |row| {
                Ok(Accommodation {
                    id: row.get(0)?,
                    staff_id: row.get(1)?,
                    name: row.get(2)?,
                    contact_email: row.get(3)?,
                    is_verified: row.get::<_, i64>(4)? != 0,
                })
            },
        )
        .optional()?;
    Ok(result)
}

pub fn insert_accommodation(conn: &Connection, acc: &Accommodation) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO accommodations (id, staff_id, name, contact_email, is_verified)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            acc.id,
            acc.staff_id,
            acc.name,
            acc.contact_email,
            acc.is_verified as i64
        ],
    )?;
    Ok(())
}

// ── Rooms ──

pub fn get_room(conn: &Connection, id: &str) -> anyhow::Result<Option<Room>> {
    let result = conn
        .query_row(
            "SELECT id, accommodation_id, name, capacity, total_rooms, base_price
             FROM rooms WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    Ok(result.map(|(id, accommodation_id, name, capacity, total_rooms, base_price)| Room {
        id,
        accommodation_id,
        name,
        capacity,
        total_rooms,
        base_price: parse_decimal(&base_price),
    }))
}

pub fn insert_room(conn: &Connection, room: &Room) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO rooms (id, accommodation_id, name, capacity, total_rooms, base_price)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            room.id,
            room.accommodation_id,
            room.name,
            room.capacity,
            room.total_rooms,
            room.base_price.to_string()
        ],
    )?;
    Ok(())
}

// ── Extra services ──

pub fn get_extra_service(conn: &Connection, id: &str) -> anyhow::Result<Option<ExtraService>> {
    let result = conn
        .query_row(
            "SELECT id, accommodation_id, name, price, is_active FROM extra_services WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    Ok(result.map(|(id, accommodation_id, name, price, is_active)| ExtraService {
        id,
        accommodation_id,
        name,
        price: parse_decimal(&price),
        is_active: is_active != 0,
    }))
}

pub fn insert_extra_service(conn: &Connection, svc: &ExtraService) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO extra_services (id, accommodation_id, name, price, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            svc.id,
            svc.accommodation_id,
            svc.name,
            svc.price.to_string(),
            svc.is_active as i64
        ],
    )?;
    Ok(())
}

// ── Bookings ──

const BOOKING_COLS: &str = "id, booking_reference, user_id, accommodation_id, room_id, \
     check_in_date, check_out_date, number_of_rooms, number_of_guests, total_nights, \
     room_subtotal, services_subtotal, total_amount, booking_status, payment_status, \
     payment_method, special_requests, cancellation_reason, cancelled_at, created_at, updated_at";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
        ),
        params![
            booking.id,
            booking.booking_reference,
            booking.user_id,
            booking.accommodation_id,
            booking.room_id,
            fmt_date(booking.check_in_date),
            fmt_date(booking.check_out_date),
            booking.number_of_rooms,
            booking.number_of_guests,
            booking.total_nights,
            booking.room_subtotal.to_string(),
            booking.services_subtotal.to_string(),
            booking.total_amount.to_string(),
            booking.booking_status.as_str(),
            booking.payment_status.as_str(),
            booking.payment_method,
            booking.special_requests,
            booking.cancellation_reason,
            booking.cancelled_at.map(fmt_dt),
            fmt_dt(booking.created_at),
            fmt_dt(booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn
        .query_row(
            &format!("SELECT {BOOKING_COLS} FROM bookings WHERE id = ?1"),
            params![id],
            parse_booking_row,
        )
        .optional()?;
    Ok(result)
}

pub fn get_bookings_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLS} FROM bookings WHERE user_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map(params![user_id], parse_booking_row)?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row?);
    }
    Ok(bookings)
}

/// Bookings for every accommodation owned by the given staff user.
pub fn get_bookings_for_staff(conn: &Connection, staff_id: &str) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM bookings b
         INNER JOIN accommodations a ON b.accommodation_id = a.id
         WHERE a.staff_id = ?1 ORDER BY b.created_at DESC",
        BOOKING_COLS
            .split(", ")
            .map(|c| format!("b.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    ))?;
    let rows = stmt.query_map(params![staff_id], parse_booking_row)?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row?);
    }
    Ok(bookings)
}

pub fn get_all_bookings(conn: &Connection, limit: i64) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLS} FROM bookings ORDER BY created_at DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit], parse_booking_row)?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row?);
    }
    Ok(bookings)
}

/// Sum of room-units held by non-cancelled bookings on this room whose
/// half-open [check_in, check_out) interval overlaps the requested one.
pub fn reserved_units(
    conn: &Connection,
    room_id: &str,
    check_in: NaiveDate,
    check_out: NaiveDate,
) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COALESCE(SUM(number_of_rooms), 0) FROM bookings
         WHERE room_id = ?1 AND booking_status != 'cancelled'
           AND check_in_date < ?3 AND check_out_date > ?2",
        params![room_id, fmt_date(check_in), fmt_date(check_out)],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Next sequence number for a date-stamped booking reference, scoped to one
/// day. Must run inside the same transaction as the insert.
pub fn next_reference_sequence(conn: &Connection, prefix: &str) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings WHERE booking_reference LIKE ?1",
        params![format!("{prefix}%")],
        |row| row.get(0),
    )?;
    Ok(count + 1)
}

/// Conditional status write: lands only while the booking is still in the
/// expected prior status, so a check made on a stale read can never clobber
/// a newer state. 0 rows means the booking moved on.
pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
) -> anyhow::Result<bool> {
    let now = fmt_dt(Utc::now().naive_utc());
    let count = conn.execute(
        "UPDATE bookings SET booking_status = ?1, updated_at = ?2
         WHERE id = ?3 AND booking_status = ?4",
        params![to.as_str(), now, id, from.as_str()],
    )?;
    Ok(count > 0)
}

/// Conditional like `update_booking_status`: only pending/confirmed bookings
/// are cancellable, and 0 rows means the booking moved on in between.
pub fn mark_booking_cancelled(
    conn: &Connection,
    id: &str,
    reason: Option<&str>,
    cancelled_at: NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET booking_status = 'cancelled', cancellation_reason = ?1,
             cancelled_at = ?2, updated_at = ?2
         WHERE id = ?3 AND booking_status IN ('pending', 'confirmed')",
        params![reason, fmt_dt(cancelled_at), id],
    )?;
    Ok(count > 0)
}

pub fn set_cancellation_reason(
    conn: &Connection,
    id: &str,
    reason: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET cancellation_reason = ?1 WHERE id = ?2",
        params![reason, id],
    )?;
    Ok(count > 0)
}

/// Settlement step: booking becomes confirmed/paid in the same transaction
/// that records the payment ledger row.
pub fn mark_booking_paid(
    conn: &Connection,
    id: &str,
    payment_method: &str,
    paid_at: NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET booking_status = 'confirmed', payment_status = 'paid',
             payment_method = ?1, updated_at = ?2 WHERE id = ?3",
        params![payment_method, fmt_dt(paid_at), id],
    )?;
    Ok(count > 0)
}

/// Settlement step: booking becomes cancelled/refunded in the same
/// transaction that records the refund ledger row.
pub fn mark_booking_refunded(
    conn: &Connection,
    id: &str,
    cancelled_at: NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET booking_status = 'cancelled', payment_status = 'refunded',
             cancelled_at = ?1, updated_at = ?1 WHERE id = ?2",
        params![fmt_dt(cancelled_at), id],
    )?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> rusqlite::Result<Booking> {
    let check_in: String = row.get(5)?;
    let check_out: String = row.get(6)?;
    let room_subtotal: String = row.get(10)?;
    let services_subtotal: String = row.get(11)?;
    let total_amount: String = row.get(12)?;
    let booking_status: String = row.get(13)?;
    let payment_status: String = row.get(14)?;
    let cancelled_at: Option<String> = row.get(18)?;
    let created_at: String = row.get(19)?;
    let updated_at: String = row.get(20)?;

    Ok(Booking {
        id: row.get(0)?,
        booking_reference: row.get(1)?,
        user_id: row.get(2)?,
        accommodation_id: row.get(3)?,
        room_id: row.get(4)?,
        check_in_date: parse_date(&check_in),
        check_out_date: parse_date(&check_out),
        number_of_rooms: row.get(7)?,
        number_of_guests: row.get(8)?,
        total_nights: row.get(9)?,
        room_subtotal: parse_decimal(&room_subtotal),
        services_subtotal: parse_decimal(&services_subtotal),
        total_amount: parse_decimal(&total_amount),
        booking_status: BookingStatus::parse(&booking_status),
        payment_status: PaymentStatus::parse(&payment_status),
        payment_method: row.get(15)?,
        special_requests: row.get(16)?,
        cancellation_reason: row.get(17)?,
        cancelled_at: cancelled_at.as_deref().map(parse_dt),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

// ── Booking services ──

pub fn insert_booking_service(conn: &Connection, line: &BookingService) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO booking_services (id, booking_id, service_id, quantity, price, subtotal)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            line.id,
            line.booking_id,
            line.service_id,
            line.quantity,
            line.price.to_string(),
            line.subtotal.to_string()
        ],
    )?;
    Ok(())
}

pub fn get_booking_services(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<BookingService>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, service_id, quantity, price, subtotal
         FROM booking_services WHERE booking_id = ?1",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut lines = vec![];
    for row in rows {
        let (id, booking_id, service_id, quantity, price, subtotal) = row?;
        lines.push(BookingService {
            id,
            booking_id,
            service_id,
            quantity,
            price: parse_decimal(&price),
            subtotal: parse_decimal(&subtotal),
        });
    }
    Ok(lines)
}

// ── Transactions ──

const TXN_COLS: &str = "id, booking_id, user_id, transaction_id, transaction_type, amount, \
     status, payment_method, payment_response, refund_id, refund_amount, refunded_at, created_at";

pub fn insert_transaction(conn: &Connection, txn: &Transaction) -> anyhow::Result<()> {
    let payment_response = txn
        .payment_response
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        &format!(
            "INSERT INTO transactions ({TXN_COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            txn.id,
            txn.booking_id,
            txn.user_id,
            txn.transaction_id,
            txn.transaction_type.as_str(),
            txn.amount.to_string(),
            txn.status.as_str(),
            txn.payment_method,
            payment_response,
            txn.refund_id,
            txn.refund_amount.map(|a| a.to_string()),
            txn.refunded_at.map(fmt_dt),
            fmt_dt(txn.created_at),
        ],
    )?;
    Ok(())
}

/// The original completed payment for a booking, if any. Used by the
/// settlement engine to locate the gateway reference when refunding.
pub fn find_completed_payment(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Option<Transaction>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {TXN_COLS} FROM transactions
                 WHERE booking_id = ?1 AND transaction_type = 'payment' AND status = 'completed'
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![booking_id],
            parse_transaction_row,
        )
        .optional()?;
    Ok(result)
}

pub fn get_transactions_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TXN_COLS} FROM transactions WHERE booking_id = ?1 ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt.query_map(params![booking_id], parse_transaction_row)?;

    let mut txns = vec![];
    for row in rows {
        txns.push(row?);
    }
    Ok(txns)
}

/// Attach refund linkage to the original payment row and flip it to
/// refunded. The only mutation the ledger permits after insert.
pub fn attach_refund_to_payment(
    conn: &Connection,
    payment_row_id: &str,
    refund_id: &str,
    refund_amount: Decimal,
    refunded_at: NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE transactions SET status = 'refunded', refund_id = ?1, refund_amount = ?2,
             refunded_at = ?3 WHERE id = ?4",
        params![
            refund_id,
            refund_amount.to_string(),
            fmt_dt(refunded_at),
            payment_row_id
        ],
    )?;
    Ok(count > 0)
}

fn parse_transaction_row(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let transaction_type: String = row.get(4)?;
    let amount: String = row.get(5)?;
    let status: String = row.get(6)?;
    let payment_response: Option<String> = row.get(8)?;
    let refund_amount: Option<String> = row.get(10)?;
    let refunded_at: Option<String> = row.get(11)?;
    let created_at: String = row.get(12)?;

    Ok(Transaction {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        user_id: row.get(2)?,
        transaction_id: row.get(3)?,
        transaction_type: TransactionType::parse(&transaction_type),
        amount: parse_decimal(&amount),
        status: TransactionStatus::parse(&status),
        payment_method: row.get(7)?,
        payment_response: payment_response.and_then(|s| serde_json::from_str(&s).ok()),
        refund_id: row.get(9)?,
        refund_amount: refund_amount.as_deref().map(parse_decimal),
        refunded_at: refunded_at.as_deref().map(parse_dt),
        created_at: parse_dt(&created_at),
    })
}
