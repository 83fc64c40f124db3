//! Errors raised by cart operations and request handlers.

use cart_sync_core::{ErrorCategory, StoreError, SyncError};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CartError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },
    #[error("Product {product_id} is not in the cart")]
    ItemNotInCart { product_id: String },
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: String, quantity: Decimal },
    #[error("Quantity of promotional item {product_id} cannot be changed")]
    PromoItemQuantity { product_id: String },
    #[error("Promo code must not be empty")]
    EmptyPromoCode,
    #[error("Cart user '{cart_user}' does not match session user {session_user:?}")]
    UserMismatch {
        cart_user: String,
        session_user: Option<String>,
    },
}

impl From<StoreError> for CartError {
    fn from(err: StoreError) -> Self {
        CartError::Sync(SyncError::Store(err))
    }
}

impl CartError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CartError::Sync(err) => err.category(),
            _ => ErrorCategory::Usage,
        }
    }

    /// Returns structured context about the error for debugging.
    pub fn context(&self) -> Value {
        match self {
            CartError::Sync(err) => err.context(),
            CartError::ProductNotFound { product_id }
            | CartError::ItemNotInCart { product_id }
            | CartError::PromoItemQuantity { product_id } => json!({ "product_id": product_id }),
            CartError::InvalidQuantity {
                product_id,
                quantity,
            } => json!({ "product_id": product_id, "quantity": quantity.to_string() }),
            CartError::EmptyPromoCode => json!({}),
            CartError::UserMismatch {
                cart_user,
                session_user,
            } => json!({ "cart_user": cart_user, "session_user": session_user }),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            CartError::Sync(err) => err.suggestion(),
            CartError::ProductNotFound { .. } => {
                "Check the product id against the catalog.".to_string()
            }
            CartError::ItemNotInCart { .. } => {
                "Reload the cart; the item may have been removed by another request.".to_string()
            }
            CartError::InvalidQuantity { .. } => {
                "Use a positive quantity to add, or zero to remove the line.".to_string()
            }
            CartError::PromoItemQuantity { .. } => {
                "Remove the promo code instead of editing its items.".to_string()
            }
            CartError::EmptyPromoCode => "Enter a promo code.".to_string(),
            CartError::UserMismatch { .. } => {
                "Log in again; the cart will be replaced with a fresh one.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            CartError::Sync(err) => err.is_retryable(),
            _ => false,
        }
    }
}
