//! Read model for the storefront.
//!
//! The catalog tree is cached for a configurable TTL. Every write that goes
//! through this store invalidates the cache before returning. Stock and
//! availability decisions never read the cache.
//!
//! Code-mode stock is read from the inventory pool on every uncached read, so
//! it always equals the number of available codes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::clients::{CategoryClient, InventoryClient, LedgerClient};
use crate::domain::{CatalogTree, Category, CategoryCreate, CategoryPatch, Product};
use crate::error::EngineError;

struct CachedTree {
    tree: Arc<CatalogTree>,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct CatalogStore {
    ledger: LedgerClient,
    inventory: InventoryClient,
    categories: CategoryClient,
    cache: Arc<RwLock<Option<CachedTree>>>,
    ttl: Duration,
}

impl CatalogStore {
    pub fn new(ledger: LedgerClient, inventory: InventoryClient, categories: CategoryClient, ttl: Duration) -> Self {
        Self {
            ledger,
            inventory,
            categories,
            cache: Arc::new(RwLock::new(None)),
            ttl,
        }
    }

    /// Active categories with their active, in-stock products.
    #[instrument(skip(self))]
    pub async fn get_catalog_tree(&self) -> Result<Arc<CatalogTree>, EngineError> {
        let fresh = self
            .cache
            .read()
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.tree));
        if let Some(tree) = fresh {
            debug!("Catalog cache hit");
            return Ok(tree);
        }

        debug!("Catalog cache miss");
        let categories = self.categories.list_categories().await?;
        let mut products = Vec::new();
        for product in self.ledger.list_products().await? {
            products.push(self.with_live_stock(product).await?);
        }
        let tree = Arc::new(CatalogTree::build(categories, &products));

        *self.cache.write() = Some(CachedTree {
            tree: Arc::clone(&tree),
            fetched_at: Instant::now(),
        });
        Ok(tree)
    }

    /// Product detail by id or slug, in stock or not. Inactive products are hidden.
    #[instrument(skip(self))]
    pub async fn get_product(&self, id_or_slug: &str) -> Result<Option<Product>, EngineError> {
        match self.ledger.get_product(id_or_slug.to_string()).await? {
            Some(product) if product.is_active => Ok(Some(self.with_live_stock(product).await?)),
            _ => Ok(None),
        }
    }

    async fn with_live_stock(&self, mut product: Product) -> Result<Product, EngineError> {
        if product.delivery_mode.uses_inventory() {
            product.stock = self.inventory.available_count(product.id.clone()).await?;
        }
        Ok(product)
    }

    pub fn invalidate(&self) {
        if self.cache.write().take().is_some() {
            debug!("Catalog cache invalidated");
        }
    }

    /// Callback for writers outside this store (restocks, admin tooling).
    pub fn invalidation_hook(&self) -> impl Fn() + Send + Sync + 'static {
        let cache = Arc::clone(&self.cache);
        move || {
            cache.write().take();
        }
    }

    /// Saves a product. The stored stock of a code-mode product is ignored; the
    /// returned product carries the pool's count.
    #[instrument(fields(product_id = %product.id), skip(self, product))]
    pub async fn upsert_product(&self, product: Product) -> Result<Product, EngineError> {
        let saved = self.ledger.upsert_product(product).await?;
        self.invalidate();
        info!("Product upserted");
        self.with_live_stock(saved).await
    }

    #[instrument(skip(self))]
    pub async fn create_category(&self, params: CategoryCreate) -> Result<Category, EngineError> {
        let id = self.categories.create_category(params).await?;
        self.invalidate();
        self.categories
            .get_category(id.clone())
            .await?
            .ok_or_else(|| EngineError::Internal(format!("category {id} vanished after create")))
    }

    #[instrument(skip(self))]
    pub async fn update_category(&self, id: String, patch: CategoryPatch) -> Result<Category, EngineError> {
        let category = self.categories.update_category(id, patch).await?;
        self.invalidate();
        Ok(category)
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, EngineError> {
        Ok(self.categories.list_categories().await?)
    }
}
