pub mod carts;
pub mod database;
pub mod orders;
pub mod payments;
pub mod reservations;
pub mod shipping;
pub mod stock_ledger;
pub mod sweep_log;

pub use database::Database;
