//! Request handlers that read and modify the session cart.
//!
//! Every handler that changes the cart runs inside an update section, so two
//! concurrent requests of one session never lose each other's changes. The
//! multi-step handlers that write several session attributes hold a sync
//! section for their whole sequence.

use std::sync::Arc;

use cart_sync_core::{
    RequestContext, Scopes, SessionLockRegistry, SessionStore, SessionValueManager, SyncConfig,
    SyncError, downcast_attribute,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cart::{Cart, UserLogin};
use crate::config::CartConfig;
use crate::error::CartError;
use crate::factory::{CartFactory, CartHelper, PRODUCT_STORE_ID_ATTR, PricingService, factory_for};

pub const CART_ATTR: &str = "shoppingCart";
pub const CART_LIST_ATTR: &str = "shoppingCartList";
pub const USER_LOGIN_ATTR: &str = "userLogin";
pub const AUTO_USER_LOGIN_ATTR: &str = "autoUserLogin";
pub const TEMPORARY_ANONYMOUS_LOGIN_ATTR: &str = "temporaryAnonymousUserLogin";

/// Session attributes that only make sense alongside the cart.
const CART_SESSION_ATTRS: [&str; 4] = ["orderPartyId", "orderMode", PRODUCT_STORE_ID_ATTR, "CURRENT_CATALOG_ID"];

/// Carts parked by `switch_current_cart`.
pub type CartList = Vec<Arc<Cart>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartStatus {
    Empty,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartSummary {
    pub size: usize,
    pub item_count: Decimal,
    pub total: Decimal,
    pub currency: String,
}

impl From<&Cart> for CartSummary {
    fn from(cart: &Cart) -> Self {
        Self {
            size: cart.size(),
            item_count: cart.item_count(),
            total: cart.total(),
            currency: cart.currency.clone(),
        }
    }
}

/// Outcome of comparing a cart login with the session login.
#[derive(Debug, PartialEq)]
enum LoginChange {
    Keep,
    Replace(Option<UserLogin>),
}

pub struct CartEvents {
    manager: Arc<SessionValueManager<Cart>>,
    factory: Arc<dyn CartFactory>,
    helper: CartHelper,
}

impl CartEvents {
    pub fn new(
        store: Arc<dyn SessionStore>,
        locks: Arc<SessionLockRegistry>,
        factory: Arc<dyn CartFactory>,
        pricing: Arc<dyn PricingService>,
        sync_config: SyncConfig,
    ) -> Self {
        let creator = Arc::clone(&factory);
        let manager = SessionValueManager::new(
            CART_ATTR,
            store,
            locks,
            Arc::new(move |ctx: &RequestContext| creator.create_cart(ctx)),
            sync_config,
        );
        let helper = factory.create_helper(pricing);
        Self {
            manager: Arc::new(manager),
            factory,
            helper,
        }
    }

    /// Wire handlers with the factory selected by `config`.
    pub fn from_config(
        store: Arc<dyn SessionStore>,
        pricing: Arc<dyn PricingService>,
        config: &CartConfig,
        sync_config: SyncConfig,
    ) -> Self {
        let locks = Arc::new(SessionLockRegistry::new(&sync_config));
        Self::new(store, locks, factory_for(config), pricing, sync_config)
    }

    pub fn manager(&self) -> &Arc<SessionValueManager<Cart>> {
        &self.manager
    }

    /// The request's cart, created on first access.
    pub fn cart(&self, ctx: &RequestContext) -> Result<Arc<Cart>, CartError> {
        let cart = self.manager.get_current_value(ctx, true)?;
        Ok(cart.unwrap_or_else(|| Arc::new(self.manager.create_value(ctx))))
    }

    pub fn cart_if_exists(&self, ctx: &RequestContext) -> Result<Option<Arc<Cart>>, CartError> {
        Ok(self.manager.get_current_value_if_exists(ctx)?)
    }

    /// Replace the cart in request and session. Inside an update section this
    /// commits through it.
    pub fn set_cart(&self, ctx: &RequestContext, cart: Cart) -> Result<Arc<Cart>, CartError> {
        Ok(self.manager.set_current_value(ctx, cart, Scopes::ALL)?)
    }

    pub fn is_cart_changed(&self, ctx: &RequestContext) -> bool {
        self.manager.is_changed(ctx)
    }

    pub fn mark_cart_changed(&self, ctx: &RequestContext) {
        ctx.mark_changed(CART_ATTR);
    }

    pub fn cart_list(&self, ctx: &RequestContext) -> Result<CartList, CartError> {
        let list = self
            .manager
            .store()
            .get_attribute(ctx.session_id(), CART_LIST_ATTR)?;
        match list {
            None => Ok(Vec::new()),
            Some(value) => downcast_attribute::<CartList>(value)
                .map(|list| list.as_ref().clone())
                .map_err(|_| type_mismatch(ctx, CART_LIST_ATTR)),
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn add_to_cart(
        &self,
        ctx: &RequestContext,
        product_id: &str,
        quantity: Decimal,
    ) -> Result<CartSummary, CartError> {
        let (_, cart) = self.update(ctx, |cart| self.helper.add_to_cart(cart, product_id, quantity))?;
        Ok(CartSummary::from(cart.as_ref()))
    }

    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn modify_item_quantity(
        &self,
        ctx: &RequestContext,
        product_id: &str,
        quantity: Decimal,
    ) -> Result<CartSummary, CartError> {
        let (_, cart) = self.update(ctx, |cart| cart.set_item_quantity(product_id, quantity))?;
        Ok(CartSummary::from(cart.as_ref()))
    }

    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn remove_item(
        &self,
        ctx: &RequestContext,
        product_id: &str,
    ) -> Result<CartSummary, CartError> {
        let (_, cart) = self.update(ctx, |cart| cart.remove_item(product_id))?;
        Ok(CartSummary::from(cart.as_ref()))
    }

    /// Returns `false` when the code was already entered.
    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn add_promo_code(&self, ctx: &RequestContext, code: &str) -> Result<bool, CartError> {
        let (added, _) = self.update(ctx, |cart| self.helper.apply_promo_code(cart, code))?;
        Ok(added)
    }

    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn remove_promo_code(&self, ctx: &RequestContext, code: &str) -> Result<bool, CartError> {
        let (removed, _) = self.update(ctx, |cart| Ok(cart.remove_promo_code(code)))?;
        Ok(removed)
    }

    /// Empty the cart. An anonymous checkout also drops the rest of the
    /// session, keeping only the anonymous login.
    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn clear_cart(&self, ctx: &RequestContext) -> Result<(), CartError> {
        // The anonymous reset rewrites several session attributes; hold the lock across it.
        let mut sync = self.manager.open_sync_section(ctx)?;
        self.update(ctx, |cart| {
            cart.clear();
            Ok(())
        })?;

        if let Some(login) = self.session_login(ctx, USER_LOGIN_ATTR)? {
            if login.is_anonymous() {
                let store = self.manager.store();
                store.invalidate(ctx.session_id())?;
                self.manager.remove(ctx, Scopes::REQUEST)?;
                let login = Arc::new(login);
                store.set_attribute(ctx.session_id(), USER_LOGIN_ATTR, login.clone())?;
                ctx.set_attribute(TEMPORARY_ANONYMOUS_LOGIN_ATTR, login.clone());
                info!(party_id = ?login.party_id, "cleared anonymous session, kept anonymous login");
            }
        }
        sync.close();
        Ok(())
    }

    /// Remove the cart and the session attributes tied to it.
    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn destroy_cart(&self, ctx: &RequestContext) -> Result<(), CartError> {
        let mut sync = self.manager.open_sync_section(ctx)?;
        self.clear_cart(ctx)?;
        self.manager.remove(ctx, Scopes::ALL)?;
        let store = self.manager.store();
        for attr in CART_SESSION_ATTRS {
            store.remove_attribute(ctx.session_id(), attr)?;
        }
        sync.close();
        Ok(())
    }

    pub fn check_cart(&self, ctx: &RequestContext) -> Result<CartStatus, CartError> {
        match self.cart_if_exists(ctx)? {
            Some(cart) if !cart.is_empty() => Ok(CartStatus::Ready),
            _ => Ok(CartStatus::Empty),
        }
    }

    /// Bring the cart's logins and locale in line with the session.
    ///
    /// Checks without the lock first and only opens an update section when
    /// something differs. A cart that belongs to another user is replaced by a
    /// fresh one. Returns whether the cart was rewritten.
    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn keep_cart_updated(&self, ctx: &RequestContext, locale: &str) -> Result<bool, CartError> {
        let cart = self.cart(ctx)?;
        let user = self.session_login(ctx, USER_LOGIN_ATTR)?;
        let auto_user = self.session_login(ctx, AUTO_USER_LOGIN_ATTR)?;

        let stale = login_change(cart.user_login.as_ref(), user.as_ref(), false)? != LoginChange::Keep
            || login_change(cart.auto_user_login.as_ref(), auto_user.as_ref(), false)?
                != LoginChange::Keep
            || cart.locale.as_deref() != Some(locale);
        if !stale {
            return Ok(false);
        }

        let mut section = self.manager.open_update_section(ctx)?;
        let mut cart = section.get_for_update();
        // Logins may have changed while waiting for the lock.
        let user = self.session_login(ctx, USER_LOGIN_ATTR)?;
        let auto_user = self.session_login(ctx, AUTO_USER_LOGIN_ATTR)?;

        let modified = match refresh_cart(&mut cart, user.as_ref(), auto_user.as_ref(), locale) {
            Ok(modified) => modified,
            Err(CartError::UserMismatch {
                cart_user,
                session_user,
            }) => {
                warn!(%cart_user, ?session_user, "invalid cart state; replacing cart");
                cart = self.factory.create_cart(ctx);
                true
            }
            Err(err) => {
                section.discard();
                return Err(err);
            }
        };

        if modified {
            section.commit(cart)?;
        } else {
            section.discard();
        }
        section.close()?;
        Ok(modified)
    }

    /// Park the current cart in the session cart list and make another one
    /// current: the parked cart at `cart_index`, or a new cart.
    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn switch_current_cart(
        &self,
        ctx: &RequestContext,
        cart_index: Option<&str>,
        product_store_id: Option<&str>,
    ) -> Result<(), CartError> {
        let mut sync = self.manager.open_sync_section(ctx)?;
        let index = parse_cart_index(cart_index);
        let store = self.manager.store();
        let mut list = self.cart_list(ctx)?;

        let current = store
            .get_attribute(ctx.session_id(), CART_ATTR)?
            .map(|value| {
                downcast_attribute::<Cart>(value).map_err(|_| type_mismatch(ctx, CART_ATTR))
            })
            .transpose()?;
        if let Some(current) = current {
            list.push(current);
            self.manager.remove(ctx, Scopes::ALL)?;
        }

        let next = match index.filter(|index| *index < list.len()) {
            Some(index) => list.remove(index),
            None => {
                if let Some(product_store_id) = product_store_id.filter(|id| !id.is_empty()) {
                    let value = Arc::new(product_store_id.to_string());
                    store.set_attribute(ctx.session_id(), PRODUCT_STORE_ID_ATTR, value.clone())?;
                    ctx.set_attribute(PRODUCT_STORE_ID_ATTR, value);
                }
                self.cart(ctx)?
            }
        };
        debug!(parked = list.len(), "switching current cart");
        store.set_attribute(ctx.session_id(), CART_LIST_ATTR, Arc::new(list))?;
        self.manager.set(ctx, Some(next), Scopes::ALL)?;
        sync.close();
        Ok(())
    }

    /// Drop a parked cart. Returns whether `cart_index` named one.
    #[tracing::instrument(skip(self, ctx), fields(session_id = %ctx.session_id()))]
    pub fn clear_cart_from_list(
        &self,
        ctx: &RequestContext,
        cart_index: Option<&str>,
    ) -> Result<bool, CartError> {
        let mut sync = self.manager.open_sync_section(ctx)?;
        let mut list = self.cart_list(ctx)?;
        let removed = match parse_cart_index(cart_index).filter(|index| *index < list.len()) {
            Some(index) => {
                list.remove(index);
                self.manager
                    .store()
                    .set_attribute(ctx.session_id(), CART_LIST_ATTR, Arc::new(list))?;
                true
            }
            None => false,
        };
        sync.close();
        Ok(removed)
    }

    /// Forget the request's cached cart after logout. Session storage is untouched.
    pub fn clean_cart_after_logout(&self, ctx: &RequestContext) -> Result<(), CartError> {
        self.manager.remove(ctx, Scopes::REQUEST)?;
        Ok(())
    }

    /// Run `apply` on a working copy inside an update section and commit it.
    /// An error from `apply` leaves the stored cart unchanged.
    fn update<T>(
        &self,
        ctx: &RequestContext,
        apply: impl FnOnce(&mut Cart) -> Result<T, CartError>,
    ) -> Result<(T, Arc<Cart>), CartError> {
        let mut section = self.manager.open_update_section(ctx)?;
        let mut cart = section.get_for_update();
        let value = match apply(&mut cart) {
            Ok(value) => value,
            Err(err) => {
                section.discard();
                return Err(err);
            }
        };
        let committed = section.commit(cart)?;
        section.close()?;
        Ok((value, committed))
    }

    fn session_login(&self, ctx: &RequestContext, attr: &str) -> Result<Option<UserLogin>, CartError> {
        self.manager
            .store()
            .get_attribute(ctx.session_id(), attr)?
            .map(|value| {
                downcast_attribute::<UserLogin>(value)
                    .map(|login| login.as_ref().clone())
                    .map_err(|_| type_mismatch(ctx, attr))
            })
            .transpose()
    }
}

fn type_mismatch(ctx: &RequestContext, attribute: &str) -> CartError {
    CartError::Sync(SyncError::TypeMismatch {
        session_id: ctx.session_id().to_string(),
        attribute: attribute.to_string(),
    })
}

fn parse_cart_index(raw: Option<&str>) -> Option<usize> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<usize>() {
        Ok(index) => Some(index),
        Err(_) => {
            warn!(cart_index = raw, "invalid cart index");
            None
        }
    }
}

/// Decide whether a cart login must follow the session login.
///
/// An anonymous cart login is replaced unless the session holds the same
/// anonymous party. With `strict`, a cart that belongs to a different (or no
/// longer logged-in) user is an error instead of a replacement.
fn login_change(
    cart_login: Option<&UserLogin>,
    session_login: Option<&UserLogin>,
    strict: bool,
) -> Result<LoginChange, CartError> {
    let Some(cart_login) = cart_login else {
        return Ok(match session_login {
            Some(login) => LoginChange::Replace(Some(login.clone())),
            None => LoginChange::Keep,
        });
    };

    if cart_login.is_anonymous() {
        let same_party = session_login
            .is_some_and(|login| login.is_anonymous() && login.party_id == cart_login.party_id);
        if same_party {
            return Ok(LoginChange::Keep);
        }
        return Ok(LoginChange::Replace(session_login.cloned()));
    }

    match session_login {
        Some(login) if login.user_login_id == cart_login.user_login_id => Ok(LoginChange::Keep),
        _ if strict => Err(CartError::UserMismatch {
            cart_user: cart_login.user_login_id.clone(),
            session_user: session_login.map(|login| login.user_login_id.clone()),
        }),
        _ => Ok(LoginChange::Replace(session_login.cloned())),
    }
}

fn refresh_cart(
    cart: &mut Cart,
    user: Option<&UserLogin>,
    auto_user: Option<&UserLogin>,
    locale: &str,
) -> Result<bool, CartError> {
    let mut modified = false;

    if let LoginChange::Replace(login) = login_change(cart.user_login.as_ref(), user, true)? {
        if let Some(previous) = &cart.user_login {
            info!(previous = %previous.user_login_id, "replacing cart user login");
        }
        cart.user_login = login;
        modified = true;
    }

    // The auto login only matters while no user is logged in.
    let strict_auto = cart.user_login.is_none();
    if let LoginChange::Replace(login) =
        login_change(cart.auto_user_login.as_ref(), auto_user, strict_auto)?
    {
        cart.auto_user_login = login;
        modified = true;
    }

    if cart.locale.as_deref() != Some(locale) {
        cart.locale = Some(locale.to_string());
        modified = true;
    }
    Ok(modified)
}
