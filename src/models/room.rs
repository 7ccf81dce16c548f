use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accommodation {
    pub id: String,
    pub staff_id: String,
    pub name: String,
    pub contact_email: Option<String>,
    pub is_verified: bool,
}

/// A room *type*: one row may represent several identical bookable units
/// (`total_rooms`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub accommodation_id: String,
    pub name: String,
    /// Max guests per room-unit.
    pub capacity: i64,
    /// Inventory: number of identical units of this room type.
    pub total_rooms: i64,
    /// Per night, per room-unit.
    pub base_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraService {
    pub id: String,
    pub accommodation_id: String,
    pub name: String,
    pub price: Decimal,
    pub is_active: bool,
}
