//! Shared fixtures for the cart handler tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use cart_sync_cart::{CartConfig, CartEvents, CatalogPricing, USER_LOGIN_ATTR, UserLogin, factory_for};
use cart_sync_core::{
    AttributeValue, InMemorySessionStore, RequestContext, SessionId, SessionLockRegistry,
    SessionStore, StoreError, SyncConfig,
};
use rust_decimal::Decimal;

pub const WIDGET: &str = "WG-1111";
pub const GIZMO: &str = "GZ-1000";
pub const GIFT: &str = "GZ-FREE";
pub const GIFT_CODE: &str = "FREEGIZMO";

pub struct Shop {
    pub store: Arc<InMemorySessionStore>,
    pub events: Arc<CartEvents>,
}

impl Shop {
    pub fn new() -> Self {
        Self::with_config(CartConfig::default(), SyncConfig::default())
    }

    pub fn with_config(config: CartConfig, sync_config: SyncConfig) -> Self {
        let _ = cart_sync_common::init_tracing("warn");
        let store = Arc::new(InMemorySessionStore::new());
        let events = CartEvents::from_config(store.clone(), Arc::new(catalog()), &config, sync_config);
        Self {
            store,
            events: Arc::new(events),
        }
    }

    /// A request presenting `session_id` as its session cookie.
    pub fn request(&self, session_id: &str) -> RequestContext {
        RequestContext::resume(Some(session_id))
    }

    pub fn login(&self, session_id: &str, login: UserLogin) {
        self.store
            .set_attribute(&SessionId::new(session_id), USER_LOGIN_ATTR, Arc::new(login))
            .unwrap();
    }

    pub fn logout(&self, session_id: &str) {
        self.store
            .remove_attribute(&SessionId::new(session_id), USER_LOGIN_ATTR)
            .unwrap();
    }
}

pub fn catalog() -> CatalogPricing {
    let pricing = CatalogPricing::new();
    pricing.set_price(WIDGET, "USD", Decimal::new(1000, 2));
    pricing.set_price(GIZMO, "USD", Decimal::new(2550, 2));
    pricing.set_price(WIDGET, "EUR", Decimal::new(900, 2));
    pricing.set_promo_gift(GIFT_CODE, GIFT);
    pricing
}

/// Store that records, for every write, whether the session lock was held.
pub struct LockAwareStore {
    inner: InMemorySessionStore,
    locks: Arc<SessionLockRegistry>,
    writes: Mutex<Vec<(String, bool)>>,
}

impl LockAwareStore {
    pub fn new(locks: Arc<SessionLockRegistry>) -> Self {
        Self {
            inner: InMemorySessionStore::new(),
            locks,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// `(operation, lock held)` for every write so far.
    pub fn writes(&self) -> Vec<(String, bool)> {
        self.writes.lock().unwrap().clone()
    }

    fn record(&self, session_id: &SessionId, op: String) {
        let held = self.locks.is_locked(session_id);
        self.writes.lock().unwrap().push((op, held));
    }
}

impl SessionStore for LockAwareStore {
    fn get_attribute(&self, session_id: &SessionId, name: &str) -> Result<Option<AttributeValue>, StoreError> {
        self.inner.get_attribute(session_id, name)
    }

    fn set_attribute(&self, session_id: &SessionId, name: &str, value: AttributeValue) -> Result<(), StoreError> {
        self.record(session_id, format!("set {name}"));
        self.inner.set_attribute(session_id, name, value)
    }

    fn remove_attribute(&self, session_id: &SessionId, name: &str) -> Result<Option<AttributeValue>, StoreError> {
        self.record(session_id, format!("remove {name}"));
        self.inner.remove_attribute(session_id, name)
    }

    fn invalidate(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.record(session_id, "invalidate".to_string());
        self.inner.invalidate(session_id)
    }
}

/// Handlers over a `LockAwareStore` sharing the handlers' lock registry.
pub fn lock_aware_shop() -> (Arc<LockAwareStore>, CartEvents) {
    let sync_config = SyncConfig::default();
    let locks = Arc::new(SessionLockRegistry::new(&sync_config));
    let store = Arc::new(LockAwareStore::new(Arc::clone(&locks)));
    let events = CartEvents::new(
        store.clone(),
        locks,
        factory_for(&CartConfig::default()),
        Arc::new(catalog()),
        sync_config,
    );
    (store, events)
}

pub fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}
