//! Background work driven by the [`Scheduler`].

pub mod dual_investment;
pub mod order_monitor;
pub mod position_sync;
pub mod price_feed;
pub mod scheduler;
pub mod withdrawal;

pub use dual_investment::{next_purchase, DualInvestmentService, DualOutcome};
pub use order_monitor::{OrderReconciler, ReconcileStats};
pub use position_sync::PositionSync;
pub use price_feed::PriceFeed;
pub use scheduler::{LoopStats, PassReport, Scheduler};
pub use withdrawal::{WithdrawalOutcome, WithdrawalService};
