pub mod dual;
pub mod market;
pub mod order;
pub mod position;
pub mod strategy;
pub mod withdrawal;

pub use dual::*;
pub use market::*;
pub use order::*;
pub use position::*;
pub use strategy::*;
pub use withdrawal::*;
