//! Allocation events.

use common::Event;
use serde::{Deserialize, Serialize};

/// An order line was allocated to a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocated {
    pub orderid: String,
    pub sku: String,
    pub qty: u32,
    pub batchref: String,
}

impl Event for Allocated {
    const NAME: &'static str = "Allocated";
}

/// An order line lost its batch and needs allocating again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deallocated {
    pub orderid: String,
    pub sku: String,
    pub qty: u32,
}

impl Event for Deallocated {
    const NAME: &'static str = "Deallocated";
}

/// No batch could take an order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfStock {
    pub sku: String,
}

impl Event for OutOfStock {
    const NAME: &'static str = "OutOfStock";
}
