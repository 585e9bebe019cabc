//! Storage for strategies, orders and the scheduler's records.
//!
//! - [`Store`]: the seam used by the engine and the scheduler
//! - [`MemoryStore`]: in-process implementation for tests and dry runs
//! - `adapters::postgres::PostgresStore`: the production implementation

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{Store, StrategyPage, StrategyPatch};
