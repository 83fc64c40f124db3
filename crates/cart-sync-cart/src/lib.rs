#![deny(clippy::all)]

//! Shopping cart held in the web session, with request handlers that keep it
//! consistent across concurrent requests of the same session.

mod cart;
mod config;
mod error;
mod events;
mod factory;

pub use cart::Cart;
pub use cart::CartLine;
pub use cart::OrderType;
pub use cart::UserLogin;
pub use config::CartConfig;
pub use config::FactoryKind;
pub use error::CartError;
pub use events::AUTO_USER_LOGIN_ATTR;
pub use events::CART_ATTR;
pub use events::CART_LIST_ATTR;
pub use events::CartEvents;
pub use events::CartList;
pub use events::CartStatus;
pub use events::CartSummary;
pub use events::TEMPORARY_ANONYMOUS_LOGIN_ATTR;
pub use events::USER_LOGIN_ATTR;
pub use factory::CURRENCY_ATTR;
pub use factory::CartFactory;
pub use factory::CartHelper;
pub use factory::CatalogPricing;
pub use factory::ORDER_MODE_ATTR;
pub use factory::OrderEntryCartFactory;
pub use factory::PRODUCT_STORE_ID_ATTR;
pub use factory::PricingService;
pub use factory::WebCartFactory;
pub use factory::factory_for;
