//! Shutdown fan-out and supervision of background engine tasks.

pub mod shutdown;
pub mod tasks;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownError, ShutdownPhase, ShutdownSignal,
    ShutdownToken,
};
pub use tasks::TaskSupervisor;
