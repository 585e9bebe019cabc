//! Strategy execution.
//!
//! [`StrategyEngine::execute`] evaluates one persisted strategy per call:
//! simple, grid and recurring buy on spot; simple on futures; iceberg and
//! slow iceberg on both markets. Futures entries are followed by
//! stop-loss and take-profit orders placed in the background.

pub mod engine;
pub mod futures;
pub mod iceberg;
pub mod layers;
pub mod protective;
pub mod spot;
pub mod watcher;

pub use engine::{trigger_hit, StrategyEngine, TickOutcome};
pub use futures::{floated_price, position_quantity};
pub use layers::{default_ratios, layer_client_id, layer_price, offsets_bp, split_quantity};
pub use protective::protective_orders;
pub use spot::grid_levels;
pub use watcher::LayerSweep;
