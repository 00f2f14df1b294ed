//! Stock allocation: the sample domain served by the message bus.
//!
//! Batches of stock are grouped per SKU into a [`Product`] aggregate. Order
//! lines are allocated to the batch with the earliest ETA that can take
//! them. Shrinking a batch deallocates lines, which the bus reallocates
//! elsewhere through the [`Deallocated`] event.

pub mod error;
pub mod handlers;
pub mod notifications;
pub mod product;
pub mod views;

pub use error::AllocationError;
pub use handlers::{
    AddAllocationToReadModel, AddBatch, AllocateHandler, ChangeBatchQuantityHandler,
    PublishAllocatedEvent, Reallocate, RemoveAllocationFromReadModel, STOCK_DESK,
    SendOutOfStockNotification, register_handlers, unit_of_work_factory,
};
pub use notifications::{InMemoryNotifications, NotificationError, Notifications};
pub use product::{
    Allocate, Allocated, Batch, ChangeBatchQuantity, CreateBatch, Deallocated, OrderLine,
    OutOfStock, Product, ProductLookup, ProductRepository,
};
pub use views::{ALLOCATIONS_VIEW, AllocationRow, allocations_for};
