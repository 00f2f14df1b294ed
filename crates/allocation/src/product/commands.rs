//! Allocation commands.

use chrono::NaiveDate;
use common::Command;
use serde::{Deserialize, Serialize};

/// Adds a batch of stock, creating the product on first sight of its SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBatch {
    #[serde(alias = "ref")]
    pub reference: String,
    pub sku: String,
    pub qty: u32,
    #[serde(default)]
    pub eta: Option<NaiveDate>,
}

impl CreateBatch {
    pub fn new(
        reference: impl Into<String>,
        sku: impl Into<String>,
        qty: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            qty,
            eta,
        }
    }
}

impl Command for CreateBatch {
    const NAME: &'static str = "CreateBatch";
    type Output = ();
}

/// Allocates an order line. Returns the chosen batch reference, or `None`
/// when no batch has enough stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocate {
    pub orderid: String,
    pub sku: String,
    pub qty: u32,
}

impl Allocate {
    pub fn new(orderid: impl Into<String>, sku: impl Into<String>, qty: u32) -> Self {
        Self {
            orderid: orderid.into(),
            sku: sku.into(),
            qty,
        }
    }
}

impl Command for Allocate {
    const NAME: &'static str = "Allocate";
    type Output = Option<String>;
}

/// Changes a batch's purchased quantity.
///
/// External producers send the reference as `batchref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatchQuantity {
    #[serde(alias = "batchref", alias = "ref")]
    pub reference: String,
    pub qty: u32,
}

impl ChangeBatchQuantity {
    pub fn new(reference: impl Into<String>, qty: u32) -> Self {
        Self {
            reference: reference.into(),
            qty,
        }
    }
}

impl Command for ChangeBatchQuantity {
    const NAME: &'static str = "ChangeBatchQuantity";
    type Output = ();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_batch_quantity_accepts_external_field_names() {
        let cmd: ChangeBatchQuantity =
            serde_json::from_value(json!({ "batchref": "b1", "qty": 5 })).unwrap();
        assert_eq!(cmd, ChangeBatchQuantity::new("b1", 5));
    }

    #[test]
    fn create_batch_eta_is_optional() {
        let cmd: CreateBatch =
            serde_json::from_value(json!({ "ref": "b1", "sku": "LAMP", "qty": 100 })).unwrap();
        assert_eq!(cmd.eta, None);

        let cmd: CreateBatch = serde_json::from_value(
            json!({ "ref": "b2", "sku": "LAMP", "qty": 100, "eta": "2021-04-26" }),
        )
        .unwrap();
        assert_eq!(cmd.eta, NaiveDate::from_ymd_opt(2021, 4, 26));
    }
}
