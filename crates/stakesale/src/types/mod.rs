pub mod address;
pub mod config;
pub mod transaction;
pub mod units;
