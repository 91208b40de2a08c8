// Risk management module
pub mod circuit_breakers;
pub mod risk_manager;

pub use circuit_breakers::{CircuitBreakerTrip, CircuitBreakers};
pub use risk_manager::{RiskConfig, RiskLevels, RiskManager};
