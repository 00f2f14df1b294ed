//! The product aggregate.

use serde::{Deserialize, Serialize};
use unit_of_work::{Aggregate, Entity, PendingMessages};

use super::{Allocated, Batch, Deallocated, OrderLine, OutOfStock, ProductLookup};

/// All batches of one SKU.
///
/// Allocation decisions are made across every batch of the SKU at once, so
/// the product is the consistency boundary.
#[derive(Debug, Serialize, Deserialize)]
pub struct Product {
    sku: String,
    batches: Vec<Batch>,
    version_number: u64,
    #[serde(skip)]
    messages: PendingMessages,
}

impl Product {
    pub fn new(sku: impl Into<String>, batches: Vec<Batch>) -> Self {
        Self {
            sku: sku.into(),
            batches,
            version_number: 0,
            messages: PendingMessages::new(),
        }
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch(&self, reference: &str) -> Option<&Batch> {
        self.batches.iter().find(|b| b.reference == reference)
    }

    /// Incremented by every successful allocation.
    pub fn version_number(&self) -> u64 {
        self.version_number
    }

    pub fn add_batch(&mut self, batch: Batch) {
        self.batches.push(batch);
    }

    /// Allocates `line` to the earliest batch that can take it.
    ///
    /// Batches without an ETA come first. Records [`Allocated`] and returns
    /// the batch reference, or records [`OutOfStock`] and returns `None`.
    /// A line that is already allocated keeps its batch.
    pub fn allocate(&mut self, line: OrderLine) -> Option<String> {
        if let Some(batch) = self.batches.iter().find(|b| b.is_allocated(&line)) {
            return Some(batch.reference.clone());
        }

        let candidate = self
            .batches
            .iter_mut()
            .filter(|b| b.can_allocate(&line))
            .min_by_key(|b| b.eta);
        let Some(batch) = candidate else {
            tracing::info!(sku = %line.sku, orderid = %line.orderid, "out of stock");
            self.raise(OutOfStock { sku: line.sku });
            return None;
        };

        let batchref = batch.reference.clone();
        batch.allocate(line.clone());
        self.version_number += 1;
        self.raise(Allocated {
            orderid: line.orderid,
            sku: line.sku,
            qty: line.qty,
            batchref: batchref.clone(),
        });
        Some(batchref)
    }

    /// Sets a batch's purchased quantity, deallocating its oldest lines
    /// until it is no longer oversold. Records [`Deallocated`] for each.
    ///
    /// Returns `false` if the product has no such batch.
    pub fn change_batch_quantity(&mut self, reference: &str, qty: u32) -> bool {
        let Some(batch) = self.batches.iter_mut().find(|b| b.reference == reference) else {
            return false;
        };

        batch.change_purchased_quantity(qty);
        let mut released = Vec::new();
        while batch.available_quantity() < 0 {
            let Some(line) = batch.deallocate_one() else {
                break;
            };
            released.push(line);
        }

        for line in released {
            self.raise(Deallocated {
                orderid: line.orderid,
                sku: line.sku,
                qty: line.qty,
            });
        }
        true
    }
}

impl Entity for Product {
    type Id = String;

    fn id(&self) -> &String {
        &self.sku
    }
}

impl Aggregate for Product {
    type Item = Batch;
    type Lookup = ProductLookup;

    fn aggregate_type() -> &'static str {
        "products"
    }

    fn items(&self) -> &[Batch] {
        &self.batches
    }

    fn messages(&self) -> &PendingMessages {
        &self.messages
    }

    fn messages_mut(&mut self) -> &mut PendingMessages {
        &mut self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 4, 26).unwrap()
    }

    fn in_days(days: u64) -> Option<NaiveDate> {
        today().checked_add_days(Days::new(days))
    }

    fn product_with(batches: Vec<Batch>) -> Product {
        Product::new("RETRO-CLOCK", batches)
    }

    #[test]
    fn prefers_warehouse_stock_to_shipments() {
        let in_stock = Batch::new("in-stock", "RETRO-CLOCK", 100, None);
        let shipment = Batch::new("shipment", "RETRO-CLOCK", 100, in_days(1));
        let mut product = product_with(vec![shipment, in_stock]);

        let batchref = product.allocate(OrderLine::new("oref", "RETRO-CLOCK", 10));

        assert_eq!(batchref.as_deref(), Some("in-stock"));
        assert_eq!(product.batch("in-stock").unwrap().available_quantity(), 90);
        assert_eq!(product.batch("shipment").unwrap().available_quantity(), 100);
    }

    #[test]
    fn prefers_earlier_shipments() {
        let earliest = Batch::new("speedy", "RETRO-CLOCK", 100, Some(today()));
        let medium = Batch::new("normal", "RETRO-CLOCK", 100, in_days(1));
        let latest = Batch::new("slow", "RETRO-CLOCK", 100, in_days(7));
        let mut product = product_with(vec![medium, latest, earliest]);

        assert_eq!(
            product.allocate(OrderLine::new("order1", "RETRO-CLOCK", 10)).as_deref(),
            Some("speedy")
        );
    }

    #[test]
    fn allocation_records_event_and_bumps_version() {
        let mut product = product_with(vec![Batch::new("b1", "RETRO-CLOCK", 10, None)]);
        product.allocate(OrderLine::new("o1", "RETRO-CLOCK", 3));

        assert_eq!(product.version_number(), 1);
        assert_eq!(product.messages().names(), vec!["Allocated"]);
        let event = product.messages_mut().pop().unwrap().into_inner::<Allocated>().unwrap();
        assert_eq!(event.batchref, "b1");
        assert_eq!(event.qty, 3);
    }

    #[test]
    fn records_out_of_stock_when_nothing_fits() {
        let mut product = product_with(vec![Batch::new("b1", "RETRO-CLOCK", 10, None)]);
        assert!(product.allocate(OrderLine::new("o1", "RETRO-CLOCK", 10)).is_some());
        assert!(product.allocate(OrderLine::new("o2", "RETRO-CLOCK", 1)).is_none());

        assert_eq!(product.version_number(), 1);
        assert_eq!(product.messages().names(), vec!["Allocated", "OutOfStock"]);
    }

    #[test]
    fn reallocating_the_same_line_keeps_its_batch() {
        let mut product = product_with(vec![Batch::new("b1", "RETRO-CLOCK", 10, None)]);
        let line = OrderLine::new("o1", "RETRO-CLOCK", 4);
        product.allocate(line.clone());
        assert_eq!(product.allocate(line).as_deref(), Some("b1"));
        assert_eq!(product.batch("b1").unwrap().available_quantity(), 6);
        assert_eq!(product.messages().len(), 1);
    }

    #[test]
    fn shrinking_a_batch_deallocates_oldest_lines() {
        let mut product = product_with(vec![Batch::new("b1", "RETRO-CLOCK", 20, None)]);
        product.allocate(OrderLine::new("o1", "RETRO-CLOCK", 10));
        product.allocate(OrderLine::new("o2", "RETRO-CLOCK", 10));
        product.messages_mut().clear();

        assert!(product.change_batch_quantity("b1", 15));

        assert_eq!(product.batch("b1").unwrap().available_quantity(), 5);
        let event = product.messages_mut().pop().unwrap().into_inner::<Deallocated>().unwrap();
        assert_eq!(event.orderid, "o1");
        assert!(product.messages().is_empty());
    }

    #[test]
    fn unknown_batch_is_reported() {
        let mut product = product_with(Vec::new());
        assert!(!product.change_batch_quantity("missing", 1));
    }

    #[test]
    fn messages_are_not_persisted() {
        let mut product = product_with(vec![Batch::new("b1", "RETRO-CLOCK", 10, None)]);
        product.allocate(OrderLine::new("o1", "RETRO-CLOCK", 1));

        let row = serde_json::to_value(&product).unwrap();
        assert!(row.get("messages").is_none());
        let restored: Product = serde_json::from_value(row).unwrap();
        assert!(restored.messages().is_empty());
        assert_eq!(restored.version_number(), 1);
    }
}
