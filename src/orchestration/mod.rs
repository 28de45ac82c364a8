//! Per-user reconstruction runs over a [`crate::db::TradeStore`].

pub mod reconstructor;

pub use reconstructor::{
    PersistSummary, ReconstructionRun, Reconstructor, SkippedOrder,
};
