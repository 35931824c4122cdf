use tracing::{debug, instrument};

use crate::actor_framework::ResourceClient;
use crate::category_actor::CategoryError;
use crate::domain::{Category, CategoryCreate, CategoryPatch};

#[derive(Clone)]
pub struct CategoryClient {
    inner: ResourceClient<Category>,
}

impl_basic_client!(CategoryClient, Category, CategoryError, category, categories);

impl CategoryClient {
    #[instrument(skip(self))]
    pub async fn create_category(&self, params: CategoryCreate) -> Result<String, CategoryError> {
        debug!("Sending request");
        self.inner.create(params).await.map_err(CategoryError::from)
    }

    #[instrument(skip(self))]
    pub async fn update_category(&self, id: String, patch: CategoryPatch) -> Result<Category, CategoryError> {
        debug!("Sending request");
        self.inner.update(id, patch).await.map_err(CategoryError::from)
    }

    pub async fn shutdown(&self) -> Result<(), CategoryError> {
        self.inner.shutdown().await.map_err(CategoryError::from)
    }
}
