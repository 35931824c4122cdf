use serde::{Deserialize, Serialize};

use super::product::Product;

/// A storefront grouping of products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub sort: i32,
    pub is_active: bool,
}

/// Payload for creating a new category.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCreate {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub sort: i32,
}

/// Partial update for a category.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub sort: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogNode {
    #[serde(flatten)]
    pub category: Category,
    pub products: Vec<Product>,
}

/// Browsable catalog: active categories holding at least one purchasable product.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogTree {
    pub categories: Vec<CatalogNode>,
}

impl CatalogTree {
    pub fn build(mut categories: Vec<Category>, products: &[Product]) -> Self {
        categories.retain(|category| category.is_active);
        categories.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.name.cmp(&b.name)));

        let categories = categories
            .into_iter()
            .filter_map(|category| {
                let mut listed: Vec<Product> = products
                    .iter()
                    .filter(|p| p.category_id.as_deref() == Some(category.id.as_str()))
                    .filter(|p| p.is_purchasable())
                    .cloned()
                    .collect();
                if listed.is_empty() {
                    return None;
                }
                listed.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.title.cmp(&b.title)));
                Some(CatalogNode { category, products: listed })
            })
            .collect();

        Self { categories }
    }

    pub fn product_count(&self) -> usize {
        self.categories.iter().map(|node| node.products.len()).sum()
    }
}
