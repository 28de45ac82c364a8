use crate::db::StoreError;
use crate::domain::OrderId;
use crate::engine::SplitError;
use thiserror::Error;

/// Errors that abort a reconstruction run.
///
/// Bad orders and stale trade references are not errors; they are logged and
/// skipped by the engine.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid split: {0}")]
    InvalidSplit(SplitError),
    #[error("Split parts of order {order_id} did not close and reopen the position")]
    SplitNotApplied { order_id: OrderId },
}

impl From<SplitError> for ReconstructionError {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::Store(err) => ReconstructionError::Store(err),
            other => ReconstructionError::InvalidSplit(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decimal;

    #[test]
    fn test_split_store_errors_surface_as_store_errors() {
        let err: ReconstructionError = SplitError::Store(StoreError::OrderNotFound(OrderId(3))).into();
        assert!(matches!(err, ReconstructionError::Store(StoreError::OrderNotFound(_))));

        let err: ReconstructionError = SplitError::NonPositivePart {
            order_id: OrderId(3),
            closing: Decimal::from_i64(1),
            opening: Decimal::zero(),
        }
        .into();
        assert!(matches!(err, ReconstructionError::InvalidSplit(_)));
        assert!(err.to_string().starts_with("Invalid split: split of order 3"));
    }
}
