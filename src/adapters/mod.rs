pub mod binance_rest;
pub mod postgres;

pub use binance_rest::{parse_order_report, round_order, BinanceGateway, GatewayCore};
pub use postgres::PostgresStore;
