//! Batches of stock and the order lines allocated to them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use unit_of_work::Entity;

/// A customer's request for `qty` units of `sku`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderLine {
    pub orderid: String,
    pub sku: String,
    pub qty: u32,
}

impl OrderLine {
    pub fn new(orderid: impl Into<String>, sku: impl Into<String>, qty: u32) -> Self {
        Self {
            orderid: orderid.into(),
            sku: sku.into(),
            qty,
        }
    }
}

/// Stock of one SKU purchased together, arriving at `eta`.
///
/// A batch without an ETA is already in the warehouse and is preferred over
/// any shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub reference: String,
    pub sku: String,
    pub eta: Option<NaiveDate>,
    purchased_quantity: u32,
    // In allocation order; `deallocate_one` takes from the front.
    allocations: Vec<OrderLine>,
}

impl Batch {
    pub fn new(
        reference: impl Into<String>,
        sku: impl Into<String>,
        qty: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            eta,
            purchased_quantity: qty,
            allocations: Vec::new(),
        }
    }

    pub fn purchased_quantity(&self) -> u32 {
        self.purchased_quantity
    }

    pub fn allocations(&self) -> &[OrderLine] {
        &self.allocations
    }

    pub fn allocated_quantity(&self) -> u32 {
        self.allocations.iter().map(|line| line.qty).sum()
    }

    /// Units not yet allocated. Negative after the purchased quantity is cut
    /// below what is already allocated.
    pub fn available_quantity(&self) -> i64 {
        i64::from(self.purchased_quantity) - i64::from(self.allocated_quantity())
    }

    pub fn can_allocate(&self, line: &OrderLine) -> bool {
        self.sku == line.sku && self.available_quantity() >= i64::from(line.qty)
    }

    pub fn is_allocated(&self, line: &OrderLine) -> bool {
        self.allocations.contains(line)
    }

    /// Allocates `line` if it fits and is not already allocated here.
    pub fn allocate(&mut self, line: OrderLine) -> bool {
        if !self.can_allocate(&line) || self.is_allocated(&line) {
            return false;
        }
        self.allocations.push(line);
        true
    }

    pub fn deallocate(&mut self, line: &OrderLine) -> bool {
        match self.allocations.iter().position(|l| l == line) {
            Some(idx) => {
                self.allocations.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Releases the oldest allocation.
    pub fn deallocate_one(&mut self) -> Option<OrderLine> {
        if self.allocations.is_empty() {
            None
        } else {
            Some(self.allocations.remove(0))
        }
    }

    pub fn change_purchased_quantity(&mut self, qty: u32) {
        self.purchased_quantity = qty;
    }
}

impl Entity for Batch {
    type Id = String;

    fn id(&self) -> &String {
        &self.reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_and_line(sku: &str, batch_qty: u32, line_qty: u32) -> (Batch, OrderLine) {
        (
            Batch::new("batch-001", sku, batch_qty, None),
            OrderLine::new("order-123", sku, line_qty),
        )
    }

    #[test]
    fn allocating_reduces_available_quantity() {
        let (mut batch, line) = batch_and_line("SMALL-TABLE", 20, 2);
        assert!(batch.allocate(line));
        assert_eq!(batch.available_quantity(), 18);
    }

    #[test]
    fn cannot_allocate_more_than_available() {
        let (batch, line) = batch_and_line("ELEGANT-LAMP", 2, 20);
        assert!(!batch.can_allocate(&line));
    }

    #[test]
    fn can_allocate_exactly_what_is_available() {
        let (batch, line) = batch_and_line("ELEGANT-LAMP", 2, 2);
        assert!(batch.can_allocate(&line));
    }

    #[test]
    fn cannot_allocate_a_different_sku() {
        let batch = Batch::new("batch-001", "UNCOMFORTABLE-CHAIR", 100, None);
        let line = OrderLine::new("order-123", "EXPENSIVE-TOASTER", 10);
        assert!(!batch.can_allocate(&line));
    }

    #[test]
    fn allocation_is_idempotent() {
        let (mut batch, line) = batch_and_line("ANGULAR-DESK", 20, 2);
        assert!(batch.allocate(line.clone()));
        assert!(!batch.allocate(line));
        assert_eq!(batch.available_quantity(), 18);
    }

    #[test]
    fn only_allocated_lines_can_be_deallocated() {
        let (mut batch, line) = batch_and_line("DECORATIVE-TRINKET", 20, 2);
        assert!(!batch.deallocate(&line));
        assert_eq!(batch.available_quantity(), 20);

        batch.allocate(line.clone());
        assert!(batch.deallocate(&line));
        assert_eq!(batch.available_quantity(), 20);
    }

    #[test]
    fn deallocate_one_releases_the_oldest_line() {
        let mut batch = Batch::new("batch-001", "RUG", 10, None);
        batch.allocate(OrderLine::new("o1", "RUG", 3));
        batch.allocate(OrderLine::new("o2", "RUG", 3));

        assert_eq!(batch.deallocate_one().map(|l| l.orderid), Some("o1".to_string()));
        assert_eq!(batch.deallocate_one().map(|l| l.orderid), Some("o2".to_string()));
        assert_eq!(batch.deallocate_one(), None);
    }

    #[test]
    fn shrinking_below_allocations_goes_negative() {
        let (mut batch, line) = batch_and_line("RUG", 10, 8);
        batch.allocate(line);
        batch.change_purchased_quantity(5);
        assert_eq!(batch.available_quantity(), -3);
    }
}
