pub mod booking_engine;
pub mod calendar;
pub mod occupancy;
pub mod rent_billing;
