//! Command and event handlers for allocation.

use std::sync::Arc;

use async_trait::async_trait;
use common::Event;
use message_bus::pubsub::to_payload;
use message_bus::{
    CommandHandler, ConfigurationError, Dependency, EventHandler, HandlerContext, HandlerError,
    MessageBus,
};
use unit_of_work::{Aggregate, SessionFactory, UnitOfWorkFactory};

use crate::error::AllocationError;
use crate::notifications::Notifications;
use crate::product::{
    Allocate, Allocated, Batch, ChangeBatchQuantity, CreateBatch, Deallocated, OrderLine,
    OutOfStock, Product, ProductLookup, ProductRepository,
};
use crate::views::{ALLOCATIONS_VIEW, AllocationRow};

/// Where out-of-stock alerts go unless configured otherwise.
pub const STOCK_DESK: &str = "stock@made.com";

const UOW: &[Dependency] = &[Dependency::UnitOfWork];

/// Unit of work factory with the product repository registered.
pub fn unit_of_work_factory(sessions: Arc<dyn SessionFactory>) -> UnitOfWorkFactory {
    UnitOfWorkFactory::new(sessions).with_repository_backend::<Product, _>(ProductRepository)
}

/// Registers every allocation handler on `bus`.
pub fn register_handlers(
    bus: &mut MessageBus,
    notifications: Arc<dyn Notifications>,
) -> Result<(), ConfigurationError> {
    bus.on_command::<CreateBatch, _>(AddBatch)?
        .on_command::<Allocate, _>(AllocateHandler)?
        .on_command::<ChangeBatchQuantity, _>(ChangeBatchQuantityHandler)?;

    bus.on_event::<OutOfStock, _>(SendOutOfStockNotification::new(notifications))
        .on_event::<Allocated, _>(PublishAllocatedEvent)
        .on_event::<Allocated, _>(AddAllocationToReadModel)
        .on_event::<Deallocated, _>(Reallocate)
        .on_event::<Deallocated, _>(RemoveAllocationFromReadModel);
    Ok(())
}

/// Adds a batch, creating its product if the SKU is new.
pub struct AddBatch;

#[async_trait]
impl CommandHandler<CreateBatch> for AddBatch {
    fn name(&self) -> &'static str {
        "add_batch"
    }

    fn dependencies(&self) -> &'static [Dependency] {
        UOW
    }

    async fn handle(
        &self,
        cmd: CreateBatch,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let batch = Batch::new(cmd.reference, cmd.sku.clone(), cmd.qty, cmd.eta);
        let mut uow = ctx.uow()?.enter().await?;
        match uow.repository::<Product>()?.get(&cmd.sku).await? {
            Some(product) => product.add_batch(batch),
            None => {
                tracing::info!(sku = %cmd.sku, "new product");
                uow.repository::<Product>()?.add(Product::new(cmd.sku, vec![batch]));
            }
        }
        uow.commit().await?;
        Ok(())
    }
}

/// Allocates an order line to the product's best batch.
pub struct AllocateHandler;

#[async_trait]
impl CommandHandler<Allocate> for AllocateHandler {
    fn name(&self) -> &'static str {
        "allocate"
    }

    fn dependencies(&self) -> &'static [Dependency] {
        UOW
    }

    async fn handle(
        &self,
        cmd: Allocate,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<Option<String>, HandlerError> {
        let line = OrderLine::new(cmd.orderid, cmd.sku, cmd.qty);
        let mut uow = ctx.uow()?.enter().await?;
        let product = uow
            .repository::<Product>()?
            .get(&line.sku)
            .await?
            .ok_or_else(|| AllocationError::InvalidSku(line.sku.clone()))?;
        let batchref = product.allocate(line);
        uow.commit().await?;
        Ok(batchref)
    }
}

/// Changes a batch's quantity. An unknown batch is logged, not an error.
pub struct ChangeBatchQuantityHandler;

#[async_trait]
impl CommandHandler<ChangeBatchQuantity> for ChangeBatchQuantityHandler {
    fn name(&self) -> &'static str {
        "change_batch_quantity"
    }

    fn dependencies(&self) -> &'static [Dependency] {
        UOW
    }

    async fn handle(
        &self,
        cmd: ChangeBatchQuantity,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let lookup = ProductLookup::ByBatchRef(cmd.reference.clone());
        let mut uow = ctx.uow()?.enter().await?;
        match uow.repository::<Product>()?.find(&lookup).await? {
            Some(product) => {
                product.change_batch_quantity(&cmd.reference, cmd.qty);
                uow.commit().await?;
            }
            None => tracing::error!(batchref = %cmd.reference, "product not found for batch"),
        }
        Ok(())
    }
}

/// Alerts the stock desk when an order line could not be allocated.
pub struct SendOutOfStockNotification {
    notifications: Arc<dyn Notifications>,
    destination: String,
}

impl SendOutOfStockNotification {
    pub fn new(notifications: Arc<dyn Notifications>) -> Self {
        Self::with_destination(notifications, STOCK_DESK)
    }

    pub fn with_destination(
        notifications: Arc<dyn Notifications>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            notifications,
            destination: destination.into(),
        }
    }
}

#[async_trait]
impl EventHandler<OutOfStock> for SendOutOfStockNotification {
    fn name(&self) -> &'static str {
        "send_out_of_stock_notification"
    }

    async fn handle(
        &self,
        event: &OutOfStock,
        _: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let message = format!("Out of stock for {}", event.sku);
        self.notifications.send(&self.destination, &message).await?;
        Ok(())
    }
}

/// Publishes allocations on the `Allocated` channel.
pub struct PublishAllocatedEvent;

#[async_trait]
impl EventHandler<Allocated> for PublishAllocatedEvent {
    fn name(&self) -> &'static str {
        "publish_allocated_event"
    }

    fn dependencies(&self) -> &'static [Dependency] {
        &[Dependency::Broker]
    }

    async fn handle(
        &self,
        event: &Allocated,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        tracing::info!(orderid = %event.orderid, batchref = %event.batchref, "allocated");
        ctx.broker()?.publish(Allocated::NAME, to_payload(event)?);
        Ok(())
    }
}

pub struct AddAllocationToReadModel;

#[async_trait]
impl EventHandler<Allocated> for AddAllocationToReadModel {
    fn name(&self) -> &'static str {
        "add_allocation_to_read_model"
    }

    fn dependencies(&self) -> &'static [Dependency] {
        UOW
    }

    async fn handle(
        &self,
        event: &Allocated,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let row = AllocationRow {
            orderid: event.orderid.clone(),
            sku: event.sku.clone(),
            batchref: event.batchref.clone(),
        };
        let key = AllocationRow::key(&row.orderid, &row.sku);

        let mut uow = ctx.uow()?.enter().await?;
        uow.session()?
            .upsert(ALLOCATIONS_VIEW, &key, serde_json::to_value(&row)?)
            .await?;
        uow.commit().await?;
        Ok(())
    }
}

pub struct RemoveAllocationFromReadModel;

#[async_trait]
impl EventHandler<Deallocated> for RemoveAllocationFromReadModel {
    fn name(&self) -> &'static str {
        "remove_allocation_from_read_model"
    }

    fn dependencies(&self) -> &'static [Dependency] {
        UOW
    }

    async fn handle(
        &self,
        event: &Deallocated,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let key = AllocationRow::key(&event.orderid, &event.sku);
        let mut uow = ctx.uow()?.enter().await?;
        uow.session()?.delete(ALLOCATIONS_VIEW, &key).await?;
        uow.commit().await?;
        Ok(())
    }
}

/// Asks the product to allocate a deallocated line again.
pub struct Reallocate;

#[async_trait]
impl EventHandler<Deallocated> for Reallocate {
    fn name(&self) -> &'static str {
        "reallocate"
    }

    fn dependencies(&self) -> &'static [Dependency] {
        UOW
    }

    async fn handle(
        &self,
        event: &Deallocated,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let mut uow = ctx.uow()?.enter().await?;
        let product = uow
            .repository::<Product>()?
            .get(&event.sku)
            .await?
            .ok_or_else(|| AllocationError::InvalidSku(event.sku.clone()))?;
        product.request(Allocate::new(&event.orderid, &event.sku, event.qty));
        uow.commit().await?;
        Ok(())
    }
}
