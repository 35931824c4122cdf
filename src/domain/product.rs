use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a paid order for a product gets fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// One single-use inventory code per unit.
    Code,
    /// Static instructions stored on the product.
    Text,
    /// Fulfilled by an operator outside the engine.
    Manual,
}

impl DeliveryMode {
    pub fn uses_inventory(self) -> bool {
        matches!(self, DeliveryMode::Code)
    }
}

/// A sellable digital good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Currency code to unit price. Keys are upper-case.
    pub price_map: BTreeMap<String, Decimal>,
    pub default_currency: String,
    /// Units on hand. For code-mode products this is the pool's available count,
    /// filled in when the product is read through the catalog.
    #[serde(default)]
    pub stock: u32,
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub delivery_instructions: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub sort: i32,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// Normalizes a currency code the way price maps store it.
pub fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl Product {
    /// A code-mode product priced in a single currency, active, with no stock.
    pub fn new(
        id: impl Into<String>,
        slug: impl Into<String>,
        title: impl Into<String>,
        currency: &str,
        price: Decimal,
    ) -> Self {
        let currency = normalize_currency(currency);
        let mut price_map = BTreeMap::new();
        price_map.insert(currency.clone(), price);
        Self {
            id: id.into(),
            slug: slug.into(),
            category_id: None,
            title: title.into(),
            description: None,
            price_map,
            default_currency: currency,
            stock: 0,
            delivery_mode: DeliveryMode::Code,
            delivery_instructions: None,
            is_active: true,
            sort: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_price(mut self, currency: &str, amount: Decimal) -> Self {
        self.price_map.insert(normalize_currency(currency), amount);
        self
    }

    pub fn with_stock(mut self, stock: u32) -> Self {
        self.stock = stock;
        self
    }

    pub fn with_delivery(mut self, mode: DeliveryMode, instructions: Option<&str>) -> Self {
        self.delivery_mode = mode;
        self.delivery_instructions = instructions.map(str::to_string);
        self
    }

    pub fn in_category(mut self, category_id: impl Into<String>, sort: i32) -> Self {
        self.category_id = Some(category_id.into());
        self.sort = sort;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Canonical form for storage: lower-case slug, upper-case currency codes.
    pub fn normalize(&mut self) {
        self.slug = self.slug.trim().to_ascii_lowercase();
        self.default_currency = normalize_currency(&self.default_currency);
        self.price_map = std::mem::take(&mut self.price_map)
            .into_iter()
            .map(|(currency, amount)| (normalize_currency(&currency), amount))
            .collect();
    }

    /// Checks the invariants a product must hold before it is persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() || self.slug.trim().is_empty() {
            return Err("product id and slug are required".into());
        }
        if self.title.trim().is_empty() {
            return Err("product title is required".into());
        }
        if self.price_map.is_empty() {
            return Err("price map needs at least one entry".into());
        }
        if let Some((currency, _)) = self.price_map.iter().find(|(_, amount)| **amount <= Decimal::ZERO) {
            return Err(format!("price for {currency} must be positive"));
        }
        if !self.price_map.contains_key(&self.default_currency) {
            return Err(format!(
                "default currency {} has no price",
                self.default_currency
            ));
        }
        if self.delivery_mode == DeliveryMode::Text
            && self
                .delivery_instructions
                .as_deref()
                .map_or(true, |text| text.trim().is_empty())
        {
            return Err("text delivery requires instructions".into());
        }
        Ok(())
    }

    /// Picks the purchase currency: the requested one when priced, else the default.
    pub fn resolve_currency(&self, requested: Option<&str>) -> Option<(String, Decimal)> {
        requested
            .map(normalize_currency)
            .and_then(|code| self.price_map.get(&code).map(|amount| (code, *amount)))
            .or_else(|| {
                self.price_map
                    .get(&self.default_currency)
                    .map(|amount| (self.default_currency.clone(), *amount))
            })
    }

    /// Renders a price such as `USD 10.00`.
    pub fn price_label(&self, currency: &str) -> Option<String> {
        let currency = normalize_currency(currency);
        self.price_map
            .get(&currency)
            .map(|amount| format!("{} {:.2}", currency, amount))
    }

    pub fn is_purchasable(&self) -> bool {
        self.is_active && self.stock > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Product {
        Product::new("p1", "steam-10", "Steam $10", "usd", Decimal::new(10, 0)).with_price("EUR", Decimal::new(95, 1))
    }

    #[test]
    fn test_resolve_currency_prefers_requested() {
        let product = sample();
        assert_eq!(product.resolve_currency(Some("eur")), Some(("EUR".into(), Decimal::new(95, 1))));
        assert_eq!(product.resolve_currency(Some("GBP")), Some(("USD".into(), Decimal::new(10, 0))));
        assert_eq!(product.resolve_currency(None), Some(("USD".into(), Decimal::new(10, 0))));
    }

    #[test]
    fn test_validate_rejects_broken_products() {
        assert!(sample().validate().is_ok());

        let mut no_default = sample();
        no_default.default_currency = "JPY".into();
        assert!(no_default.validate().is_err());

        let negative = sample().with_price("EUR", Decimal::new(-1, 0));
        assert!(negative.validate().is_err());

        let text_without_body = sample().with_delivery(DeliveryMode::Text, Some("  "));
        assert!(text_without_body.validate().is_err());
    }

    #[test]
    fn test_normalize_upper_cases_currencies() {
        let json = r#"{"id":"p1","slug":" Steam-10 ","title":"Steam","priceMap":{"usd":10,"eur":9},"defaultCurrency":"usd","deliveryMode":"code"}"#;
        let mut product: Product = serde_json::from_str(json).unwrap();
        product.normalize();

        assert_eq!(product.slug, "steam-10");
        assert_eq!(product.default_currency, "USD");
        assert_eq!(product.price_map.keys().collect::<Vec<_>>(), vec!["EUR", "USD"]);
        assert!(product.validate().is_ok());
        assert_eq!(product.resolve_currency(Some("eur")), Some(("EUR".into(), Decimal::new(9, 0))));
    }

    #[test]
    fn test_price_label() {
        assert_eq!(sample().price_label("usd").as_deref(), Some("USD 10.00"));
        assert_eq!(sample().price_label("EUR").as_deref(), Some("EUR 9.50"));
        assert_eq!(sample().price_label("GBP"), None);
    }
}
