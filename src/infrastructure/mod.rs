pub mod alert;
pub mod bus;
pub mod cache;
pub mod exchange;
pub mod http_client_factory;
pub mod persistence;
