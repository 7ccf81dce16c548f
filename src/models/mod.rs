pub mod booking;
pub mod room;
pub mod transaction;
pub mod user;

pub use booking::{Booking, BookingService, BookingStatus, PaymentStatus};
pub use room::{Accommodation, ExtraService, Room};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use user::{Role, User};
