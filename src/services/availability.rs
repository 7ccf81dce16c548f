use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::queries;
use crate::models::Room;

/// Room-units still bookable for [check_in, check_out): inventory minus the
/// units held by overlapping non-cancelled bookings. Never negative, never
/// above `total_rooms`. Must be re-evaluated inside the same transaction as
/// the booking insert; two requests passing the check concurrently would
/// otherwise overbook.
pub fn available_units(
    conn: &Connection,
    room: &Room,
    check_in: NaiveDate,
    check_out: NaiveDate,
) -> anyhow::Result<i64> {
    let reserved = queries::reserved_units(conn, &room.id, check_in, check_out)?;
    Ok((room.total_rooms - reserved).max(0))
}

/// Guests must fit in the requested units: `capacity` is per room-unit.
pub fn guest_capacity_ok(room: &Room, number_of_rooms: i64, number_of_guests: i64) -> bool {
    number_of_guests <= room.capacity * number_of_rooms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{Accommodation, Booking, BookingStatus, PaymentStatus, Role, User};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn setup() -> (Connection, Room) {
        let conn = db::init_db(":memory:").unwrap();
        let user = User {
            id: "staff-1".into(),
            name: "Host".into(),
            email: "host@example.com".into(),
            role: Role::Staff,
        };
        queries::insert_user(&conn, &user, "tok-staff").unwrap();
        queries::insert_accommodation(
            &conn,
            &Accommodation {
                id: "acc-1".into(),
                staff_id: "staff-1".into(),
                name: "Hilltop Lodge".into(),
                contact_email: None,
                is_verified: true,
            },
        )
        .unwrap();
        let room = Room {
            id: "room-1".into(),
            accommodation_id: "acc-1".into(),
            name: "Deluxe Double".into(),
            capacity: 2,
            total_rooms: 2,
            base_price: dec!(1000),
        };
        queries::insert_room(&conn, &room).unwrap();
        (conn, room)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn book(conn: &Connection, room: &Room, reference: &str, check_in: &str, check_out: &str, units: i64, status: BookingStatus) {
        let now = Utc::now().naive_utc();
        let booking = Booking {
            id: format!("bk-{reference}"),
            booking_reference: reference.to_string(),
            user_id: "staff-1".into(),
            accommodation_id: room.accommodation_id.clone(),
            room_id: room.id.clone(),
            check_in_date: date(check_in),
            check_out_date: date(check_out),
            number_of_rooms: units,
            number_of_guests: units,
            total_nights: (date(check_out) - date(check_in)).num_days(),
            room_subtotal: dec!(0),
            services_subtotal: dec!(0),
            total_amount: dec!(0),
            booking_status: status,
            payment_status: PaymentStatus::Unpaid,
            payment_method: None,
            special_requests: None,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        queries::insert_booking(conn, &booking).unwrap();
    }

    #[test]
    fn full_inventory_when_no_bookings() {
        let (conn, room) = setup();
        let units = available_units(&conn, &room, date("2026-01-10"), date("2026-01-12")).unwrap();
        assert_eq!(units, 2);
    }

    #[test]
    fn overlapping_booking_consumes_units() {
        let (conn, room) = setup();
        book(&conn, &room, "B1", "2026-01-10", "2026-01-12", 2, BookingStatus::Confirmed);

        // Jan 11–13 overlaps Jan 10–12: nothing left.
        let units = available_units(&conn, &room, date("2026-01-11"), date("2026-01-13")).unwrap();
        assert_eq!(units, 0);
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let (conn, room) = setup();
        book(&conn, &room, "B1", "2026-01-10", "2026-01-12", 2, BookingStatus::Confirmed);

        // Check-out on Jan 12 frees the units for a Jan 12 check-in.
        let units = available_units(&conn, &room, date("2026-01-12"), date("2026-01-14")).unwrap();
        assert_eq!(units, 2);
    }

    #[test]
    fn containing_interval_counts_as_overlap() {
        let (conn, room) = setup();
        book(&conn, &room, "B1", "2026-01-08", "2026-01-20", 1, BookingStatus::Pending);

        let units = available_units(&conn, &room, date("2026-01-10"), date("2026-01-12")).unwrap();
        assert_eq!(units, 1);
    }

    #[test]
    fn cancelled_bookings_release_inventory() {
        let (conn, room) = setup();
        book(&conn, &room, "B1", "2026-01-10", "2026-01-12", 2, BookingStatus::Cancelled);

        let units = available_units(&conn, &room, date("2026-01-10"), date("2026-01-12")).unwrap();
        assert_eq!(units, 2);
    }

    #[test]
    fn never_negative_even_when_oversubscribed() {
        let (conn, room) = setup();
        // Two historical bookings that together exceed inventory (e.g. after
        // a capacity reduction by staff).
        book(&conn, &room, "B1", "2026-01-10", "2026-01-12", 2, BookingStatus::Confirmed);
        book(&conn, &room, "B2", "2026-01-10", "2026-01-12", 1, BookingStatus::Confirmed);

        let units = available_units(&conn, &room, date("2026-01-10"), date("2026-01-12")).unwrap();
        assert_eq!(units, 0);
    }

    #[test]
    fn guest_capacity_check() {
        let (_conn, room) = setup();
        assert!(guest_capacity_ok(&room, 2, 4));
        assert!(!guest_capacity_ok(&room, 2, 5));
        assert!(guest_capacity_ok(&room, 1, 2));
    }
}
