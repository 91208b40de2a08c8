// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use error::BotError;
pub use models::*;
pub use strategy::SignalEvaluator;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
