use std::env;

/// Which `CartFactory` builds new carts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FactoryKind {
    #[default]
    Web,
    OrderEntry,
}

impl FactoryKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "web" => Some(FactoryKind::Web),
            "order-entry" | "orderentry" => Some(FactoryKind::OrderEntry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartConfig {
    pub factory_kind: FactoryKind,
    pub default_currency: String,
    pub product_store_id: String,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            factory_kind: FactoryKind::Web,
            default_currency: "USD".to_string(),
            product_store_id: "9000".to_string(),
        }
    }
}

impl CartConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            factory_kind: lookup("CART_FACTORY")
                .and_then(|v| FactoryKind::parse(&v))
                .unwrap_or(defaults.factory_kind),
            default_currency: non_empty("CART_DEFAULT_CURRENCY")
                .map(|v| v.to_ascii_uppercase())
                .unwrap_or(defaults.default_currency),
            product_store_id: non_empty("CART_PRODUCT_STORE_ID")
                .unwrap_or(defaults.product_store_id),
        }
    }

    pub fn with_factory_kind(mut self, kind: FactoryKind) -> Self {
        self.factory_kind = kind;
        self
    }

    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    pub fn with_product_store_id(mut self, product_store_id: impl Into<String>) -> Self {
        self.product_store_id = product_store_id.into();
        self
    }
}
