//! Background workers

pub mod pending_order_expiry;
