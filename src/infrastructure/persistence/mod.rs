mod database;
mod in_memory;
mod repositories;

pub use database::Database;
pub use in_memory::{
    InMemoryCandleRepository, InMemoryIndicatorRepository, InMemoryOrderRepository,
    InMemoryPositionRepository, InMemorySignalRepository,
};
pub use repositories::{
    SqliteCandleRepository, SqliteIndicatorRepository, SqliteOrderRepository,
    SqlitePositionRepository, SqliteSignalRepository,
};
