//! Exchange module - signed REST client for futures order history

pub mod auth;
pub mod messages;
pub mod rest;

pub use rest::BinanceFuturesClient;
