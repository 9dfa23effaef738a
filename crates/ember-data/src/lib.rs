//! Persistence contracts used by packet handlers.
//!
//! Each repository is a trait so handlers can run against a database-backed
//! implementation in production and the in-memory one here everywhere else.

pub mod error;
pub mod general_log;
pub mod inventory;

pub use error::{DeleteResult, RepositoryError};
pub use general_log::{GeneralLogEntry, GeneralLogRepository, InMemoryGeneralLog};
pub use inventory::{InMemoryInventory, InventoryEntry, InventoryRepository};
