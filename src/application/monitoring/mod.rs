mod service;
mod tracker;

pub use service::MonitoringService;
pub use tracker::OrderTracker;
