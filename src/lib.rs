pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, MemoryStore, Repository, StoreError, TradeStore};
pub use domain::{
    AssetClass, BrokerId, Decimal, NewOrder, Order, OrderId, PositionSide, Side, Symbol, TimeMs,
    Trade, TradeData, TradeId, TradeStatus, UserId,
};
pub use engine::{ReconstructedTrade, TradeFinalizer};
pub use error::ReconstructionError;
pub use orchestration::{PersistSummary, ReconstructionRun, Reconstructor};
