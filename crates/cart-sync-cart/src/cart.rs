//! The shopping cart value stored per session.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CartError;

/// Login held by the session and mirrored into the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLogin {
    pub user_login_id: String,
    pub party_id: Option<String>,
}

impl UserLogin {
    pub const ANONYMOUS_ID: &'static str = "anonymous";

    pub fn new(user_login_id: impl Into<String>, party_id: Option<String>) -> Self {
        Self {
            user_login_id: user_login_id.into(),
            party_id,
        }
    }

    pub fn anonymous(party_id: impl Into<String>) -> Self {
        Self::new(Self::ANONYMOUS_ID, Some(party_id.into()))
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_login_id == Self::ANONYMOUS_ID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    SalesOrder,
    PurchaseOrder,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::SalesOrder => "SALES_ORDER",
            OrderType::PurchaseOrder => "PURCHASE_ORDER",
        }
    }

    /// Parses the `orderMode` attribute value. Unknown modes yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "SALES_ORDER" => Some(OrderType::SalesOrder),
            "PURCHASE_ORDER" => Some(OrderType::PurchaseOrder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unit_price: Decimal,
    /// Promo code that added this line, if it is a promotional gift.
    pub promo_code: Option<String>,
}

impl CartLine {
    pub fn is_promo(&self) -> bool {
        self.promo_code.is_some()
    }

    pub fn subtotal(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
    pub currency: String,
    pub locale: Option<String>,
    pub product_store_id: String,
    pub order_type: OrderType,
    pub web_site_id: Option<String>,
    pub user_login: Option<UserLogin>,
    pub auto_user_login: Option<UserLogin>,
    promo_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(
        product_store_id: impl Into<String>,
        currency: impl Into<String>,
        order_type: OrderType,
    ) -> Self {
        Self {
            lines: Vec::new(),
            currency: currency.into(),
            locale: None,
            product_store_id: product_store_id.into(),
            order_type,
            web_site_id: None,
            user_login: None,
            auto_user_login: None,
            promo_codes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, product_id: &str) -> Option<&CartLine> {
        self.lines
            .iter()
            .find(|line| !line.is_promo() && line.product_id == product_id)
    }

    pub fn promo_codes(&self) -> &[String] {
        &self.promo_codes
    }

    /// Add `quantity` of a product, merging into its existing regular line.
    /// Returns the line's new quantity.
    pub fn add_or_increase_item(
        &mut self,
        product_id: &str,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<Decimal, CartError> {
        if quantity <= Decimal::ZERO {
            return Err(CartError::InvalidQuantity {
                product_id: product_id.to_string(),
                quantity,
            });
        }
        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|line| !line.is_promo() && line.product_id == product_id)
        {
            line.quantity += quantity;
            return Ok(line.quantity);
        }
        self.lines.push(CartLine {
            product_id: product_id.to_string(),
            quantity,
            unit_price,
            promo_code: None,
        });
        Ok(quantity)
    }

    pub(crate) fn add_promo_line(&mut self, product_id: &str, promo_code: &str) {
        let exists = self.lines.iter().any(|line| {
            line.product_id == product_id && line.promo_code.as_deref() == Some(promo_code)
        });
        if !exists {
            self.lines.push(CartLine {
                product_id: product_id.to_string(),
                quantity: Decimal::ONE,
                unit_price: Decimal::ZERO,
                promo_code: Some(promo_code.to_string()),
            });
        }
    }

    /// Set the quantity of a line. Zero removes it.
    pub fn set_item_quantity(&mut self, product_id: &str, quantity: Decimal) -> Result<(), CartError> {
        if quantity < Decimal::ZERO {
            return Err(CartError::InvalidQuantity {
                product_id: product_id.to_string(),
                quantity,
            });
        }
        let regular = self
            .lines
            .iter()
            .position(|line| !line.is_promo() && line.product_id == product_id);
        let Some(index) = regular else {
            if self.lines.iter().any(|line| line.product_id == product_id) {
                return Err(CartError::PromoItemQuantity {
                    product_id: product_id.to_string(),
                });
            }
            return Err(CartError::ItemNotInCart {
                product_id: product_id.to_string(),
            });
        };
        if quantity.is_zero() {
            self.lines.remove(index);
        } else {
            self.lines[index].quantity = quantity;
        }
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: &str) -> Result<CartLine, CartError> {
        let index = self
            .lines
            .iter()
            .position(|line| !line.is_promo() && line.product_id == product_id)
            .ok_or_else(|| CartError::ItemNotInCart {
                product_id: product_id.to_string(),
            })?;
        Ok(self.lines.remove(index))
    }

    /// Drop all lines and promo codes. Identity fields are kept.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.promo_codes.clear();
    }

    /// Number of lines.
    pub fn size(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn item_count(&self) -> Decimal {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    pub fn total(&self) -> Decimal {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    /// Returns `false` if the code was already entered.
    pub fn add_promo_code(&mut self, code: &str) -> Result<bool, CartError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CartError::EmptyPromoCode);
        }
        if self.promo_codes.iter().any(|entered| entered == code) {
            return Ok(false);
        }
        self.promo_codes.push(code.to_string());
        Ok(true)
    }

    /// Remove a promo code and the gift lines it added.
    pub fn remove_promo_code(&mut self, code: &str) -> bool {
        let code = code.trim();
        let before = self.promo_codes.len();
        self.promo_codes.retain(|entered| entered != code);
        self.lines.retain(|line| line.promo_code.as_deref() != Some(code));
        self.promo_codes.len() != before
    }
}
