//! Product aggregate and its messages.

mod aggregate;
mod batch;
mod commands;
mod events;
mod repository;

pub use aggregate::Product;
pub use batch::{Batch, OrderLine};
pub use commands::{Allocate, ChangeBatchQuantity, CreateBatch};
pub use events::{Allocated, Deallocated, OutOfStock};
pub use repository::{ProductLookup, ProductRepository};
