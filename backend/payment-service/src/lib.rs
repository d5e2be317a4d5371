//! Payment service: consumes payment requests, charges the gateway, records
//! the payment, and reports the outcome back over the broker through its own
//! outbox.

pub mod config;
pub mod consumers;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::AppError;
