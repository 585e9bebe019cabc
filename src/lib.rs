pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod services;
pub mod signing;
pub mod strategy;

pub use adapters::{BinanceGateway, PostgresStore};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal, ShutdownToken, TaskSupervisor};
pub use error::{EngineError, ExchangeError, Result};
pub use exchange::{BinanceProvider, ExchangeApi, ExchangeProvider};
pub use persistence::{MemoryStore, Store};
pub use services::Scheduler;
pub use strategy::{StrategyEngine, TickOutcome};
