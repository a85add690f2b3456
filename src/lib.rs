//! Order checkout and payment reconciliation service.
//!
//! Orders reserve stock at creation, hand the customer off to one of the
//! supported payment gateways and are settled by signed gateway callbacks.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod orders;
pub mod payments;
pub mod services;
pub mod workers;
