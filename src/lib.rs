pub mod auction;
pub mod bidding;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod notification;
pub mod payments;
pub mod scheduler;
pub mod store;
