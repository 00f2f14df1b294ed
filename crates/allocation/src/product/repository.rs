//! Product repository finders.

use async_trait::async_trait;
use unit_of_work::{Lookup, RepositoryBackend, RepositoryError, Session};

use super::Product;

/// Ways to find a product other than by SKU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductLookup {
    /// The product owning the batch with this reference.
    ByBatchRef(String),
}

impl Lookup for ProductLookup {
    fn name(&self) -> &'static str {
        match self {
            Self::ByBatchRef(_) => "by_batchref",
        }
    }
}

/// Repository backend serving [`ProductLookup`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductRepository;

#[async_trait]
impl RepositoryBackend<Product> for ProductRepository {
    async fn load_by(
        &self,
        session: &mut dyn Session,
        lookup: &ProductLookup,
    ) -> Result<Option<Product>, RepositoryError> {
        match lookup {
            ProductLookup::ByBatchRef(reference) => {
                let products = self.load_all(session).await?;
                Ok(products
                    .into_iter()
                    .find(|product| product.batch(reference).is_some()))
            }
        }
    }
}
