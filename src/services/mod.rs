pub mod availability;
pub mod booking;
pub mod notify;
pub mod payment;
pub mod pricing;
pub mod settlement;
