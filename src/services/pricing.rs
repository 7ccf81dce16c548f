use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::{ExtraService, Room};

/// One priced extra-service line. `price` is the service price at quote
/// time; it gets snapshotted into `booking_services` so later catalogue
/// changes never reprice an existing booking.
#[derive(Debug, Clone)]
pub struct QuoteLine {
    pub service_id: String,
    pub price: Decimal,
    pub quantity: i64,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub total_nights: i64,
    pub room_subtotal: Decimal,
    pub lines: Vec<QuoteLine>,
    pub services_subtotal: Decimal,
    pub total_amount: Decimal,
}

/// Whole-day difference. Date ordering (check_out strictly after check_in)
/// is enforced upstream.
pub fn total_nights(check_in: NaiveDate, check_out: NaiveDate) -> i64 {
    (check_out - check_in).num_days()
}

/// Normalize a monetary value to exactly 2 decimal places. `round_dp` alone
/// would leave whole amounts at scale 0, which then serialize as "10000"
/// instead of "10000.00".
pub fn money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded
}

/// Pure pricing: same inputs always produce the same quote. All monetary
/// outputs are rounded to 2 decimal places.
pub fn quote(
    room: &Room,
    check_in: NaiveDate,
    check_out: NaiveDate,
    number_of_rooms: i64,
    services: &[(ExtraService, i64)],
) -> Quote {
    let nights = total_nights(check_in, check_out);

    let room_subtotal =
        money(room.base_price * Decimal::from(number_of_rooms) * Decimal::from(nights));

    let lines: Vec<QuoteLine> = services
        .iter()
        .map(|(service, quantity)| QuoteLine {
            service_id: service.id.clone(),
            price: service.price,
            quantity: *quantity,
            subtotal: money(service.price * Decimal::from(*quantity)),
        })
        .collect();

    let services_subtotal = money(lines.iter().map(|l| l.subtotal).sum::<Decimal>());
    let total_amount = money(room_subtotal + services_subtotal);

    Quote {
        total_nights: nights,
        room_subtotal,
        lines,
        services_subtotal,
        total_amount,
    }
}
