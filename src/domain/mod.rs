pub mod alert;
pub mod constants;
pub mod decimal;
pub mod errors;
pub mod indicators;
pub mod market;
pub mod repositories;
pub mod trading;
