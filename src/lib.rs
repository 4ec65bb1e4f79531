//! Schema-flexible inventory: user-defined typed columns over a flat
//! item table, kept in sync on disk, with a login gate and an LLM
//! question forwarder.

pub mod agent;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod inventory;
pub mod persist;
pub mod rows;
pub mod schema;
pub mod sync;

pub use config::Config;
pub use error::{InventoryError, Result};
pub use inventory::Inventory;
