//! Cart construction strategies and the pricing seam.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cart_sync_common::{rwlock_read_or_recover, rwlock_write_or_recover};
use cart_sync_core::{RequestContext, downcast_attribute};
use rust_decimal::Decimal;
use tracing::debug;

use crate::cart::{Cart, OrderType};
use crate::config::{CartConfig, FactoryKind};
use crate::error::CartError;

pub const PRODUCT_STORE_ID_ATTR: &str = "productStoreId";
pub const ORDER_MODE_ATTR: &str = "orderMode";
pub const CURRENCY_ATTR: &str = "currencyUom";

const WEB_SITE_ID: &str = "WebStore";

/// Prices products and resolves promotional gifts.
pub trait PricingService: Send + Sync {
    fn unit_price(&self, product_id: &str, currency: &str) -> Option<Decimal>;
    /// Product given away with `code`, if the code grants one.
    fn promo_gift(&self, code: &str) -> Option<String>;
}

/// In-memory price list keyed by product and currency.
#[derive(Debug, Default)]
pub struct CatalogPricing {
    prices: RwLock<HashMap<(String, String), Decimal>>,
    gifts: RwLock<HashMap<String, String>>,
}

impl CatalogPricing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, product_id: &str, currency: &str, price: Decimal) {
        rwlock_write_or_recover(&self.prices, "catalog_prices")
            .insert((product_id.to_string(), currency.to_string()), price);
    }

    pub fn set_promo_gift(&self, code: &str, product_id: &str) {
        rwlock_write_or_recover(&self.gifts, "catalog_gifts")
            .insert(code.to_string(), product_id.to_string());
    }
}

impl PricingService for CatalogPricing {
    fn unit_price(&self, product_id: &str, currency: &str) -> Option<Decimal> {
        rwlock_read_or_recover(&self.prices, "catalog_prices")
            .get(&(product_id.to_string(), currency.to_string()))
            .copied()
    }

    fn promo_gift(&self, code: &str) -> Option<String> {
        rwlock_read_or_recover(&self.gifts, "catalog_gifts")
            .get(code)
            .cloned()
    }
}

/// Prices and adds items on behalf of the request handlers.
#[derive(Clone)]
pub struct CartHelper {
    pricing: Arc<dyn PricingService>,
}

impl CartHelper {
    pub fn new(pricing: Arc<dyn PricingService>) -> Self {
        Self { pricing }
    }

    /// Returns the line's new quantity.
    pub fn add_to_cart(
        &self,
        cart: &mut Cart,
        product_id: &str,
        quantity: Decimal,
    ) -> Result<Decimal, CartError> {
        let price = self
            .pricing
            .unit_price(product_id, &cart.currency)
            .ok_or_else(|| CartError::ProductNotFound {
                product_id: product_id.to_string(),
            })?;
        cart.add_or_increase_item(product_id, quantity, price)
    }

    /// Enter a promo code and add its gift line. Returns `false` for a repeated code.
    pub fn apply_promo_code(&self, cart: &mut Cart, code: &str) -> Result<bool, CartError> {
        if !cart.add_promo_code(code)? {
            return Ok(false);
        }
        let code = code.trim();
        if let Some(gift) = self.pricing.promo_gift(code) {
            debug!(code, product_id = %gift, "promo code adds gift line");
            cart.add_promo_line(&gift, code);
        }
        Ok(true)
    }
}

/// Builds new carts for a request.
pub trait CartFactory: Send + Sync {
    fn create_cart(&self, ctx: &RequestContext) -> Cart;
    fn create_helper(&self, pricing: Arc<dyn PricingService>) -> CartHelper;
}

/// Storefront carts: sales orders in the store's default currency.
#[derive(Debug, Clone)]
pub struct WebCartFactory {
    config: CartConfig,
}

impl WebCartFactory {
    pub fn new(config: CartConfig) -> Self {
        Self { config }
    }
}

impl CartFactory for WebCartFactory {
    fn create_cart(&self, ctx: &RequestContext) -> Cart {
        let product_store_id = string_attr(ctx, PRODUCT_STORE_ID_ATTR)
            .unwrap_or_else(|| self.config.product_store_id.clone());
        let mut cart = Cart::new(
            product_store_id,
            self.config.default_currency.clone(),
            OrderType::SalesOrder,
        );
        cart.web_site_id = Some(WEB_SITE_ID.to_string());
        debug!(session_id = %ctx.session_id(), store = %cart.product_store_id, "created web cart");
        cart
    }

    fn create_helper(&self, pricing: Arc<dyn PricingService>) -> CartHelper {
        CartHelper::new(pricing)
    }
}

/// Back-office carts: order type and currency come from the order entry request.
#[derive(Debug, Clone)]
pub struct OrderEntryCartFactory {
    config: CartConfig,
}

impl OrderEntryCartFactory {
    pub fn new(config: CartConfig) -> Self {
        Self { config }
    }
}

impl CartFactory for OrderEntryCartFactory {
    fn create_cart(&self, ctx: &RequestContext) -> Cart {
        let order_type = string_attr(ctx, ORDER_MODE_ATTR)
            .and_then(|mode| OrderType::parse(&mode))
            .unwrap_or(OrderType::SalesOrder);
        let currency = string_attr(ctx, CURRENCY_ATTR)
            .unwrap_or_else(|| self.config.default_currency.clone());
        let product_store_id = string_attr(ctx, PRODUCT_STORE_ID_ATTR)
            .unwrap_or_else(|| self.config.product_store_id.clone());
        debug!(session_id = %ctx.session_id(), order_type = order_type.as_str(), "created order entry cart");
        Cart::new(product_store_id, currency, order_type)
    }

    fn create_helper(&self, pricing: Arc<dyn PricingService>) -> CartHelper {
        CartHelper::new(pricing)
    }
}

/// Factory selected by `config.factory_kind`.
pub fn factory_for(config: &CartConfig) -> Arc<dyn CartFactory> {
    match config.factory_kind {
        FactoryKind::Web => Arc::new(WebCartFactory::new(config.clone())),
        FactoryKind::OrderEntry => Arc::new(OrderEntryCartFactory::new(config.clone())),
    }
}

fn string_attr(ctx: &RequestContext, name: &str) -> Option<String> {
    ctx.attribute(name)
        .and_then(|value| downcast_attribute::<String>(value).ok())
        .map(|value| value.as_ref().clone())
        .filter(|value| !value.is_empty())
}
