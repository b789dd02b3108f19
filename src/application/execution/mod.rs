mod service;

pub use service::{ExecutionService, RiskSettings};
