use crate::actor_framework::Entity;
use crate::domain::{Category, CategoryCreate, CategoryPatch};

impl Entity for Category {
    type Id = String;
    type CreateParams = CategoryCreate;
    type Patch = CategoryPatch;

    fn id(&self) -> &String {
        &self.id
    }

    /// New categories start active.
    fn from_create_params(id: String, params: CategoryCreate) -> Result<Self, String> {
        Ok(Self {
            id,
            name: params.name.trim().to_string(),
            slug: params.slug.trim().to_ascii_lowercase(),
            sort: params.sort,
            is_active: true,
        })
    }

    fn on_create(&mut self) -> Result<(), String> {
        if self.name.is_empty() || self.slug.is_empty() {
            return Err("category name and slug are required".into());
        }
        Ok(())
    }

    fn on_update(&mut self, patch: CategoryPatch) -> Result<(), String> {
        if let Some(name) = patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err("category name cannot be blank".into());
            }
            self.name = name.to_string();
        }
        if let Some(sort) = patch.sort {
            self.sort = sort;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        Ok(())
    }
}
