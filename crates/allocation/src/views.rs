//! The allocations read model.

use serde::{Deserialize, Serialize};
use unit_of_work::{RepositoryError, UnitOfWork, UnitOfWorkError};

/// Table holding one row per allocated order line.
pub const ALLOCATIONS_VIEW: &str = "allocations_view";

/// Where an order's line for one SKU was allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub orderid: String,
    pub sku: String,
    pub batchref: String,
}

impl AllocationRow {
    pub(crate) fn key(orderid: &str, sku: &str) -> String {
        format!("{orderid}/{sku}")
    }
}

/// Returns the allocations of `orderid`, ordered by SKU.
///
/// Reads through its own scope of `uow` and writes nothing.
pub async fn allocations_for(
    uow: &mut UnitOfWork,
    orderid: &str,
) -> Result<Vec<AllocationRow>, UnitOfWorkError> {
    let mut scope = uow.enter().await?;
    let rows = scope.session()?.fetch_all(ALLOCATIONS_VIEW).await?;
    scope.exit()?;

    let rows = rows
        .into_iter()
        .map(serde_json::from_value::<AllocationRow>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(RepositoryError::from)?;
    Ok(rows.into_iter().filter(|row| row.orderid == orderid).collect())
}
