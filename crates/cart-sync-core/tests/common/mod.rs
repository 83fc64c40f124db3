//! Shared harness for the session synchronization tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cart_sync_core::{
    AttributeValue, InMemorySessionStore, RequestContext, SessionId, SessionLockRegistry,
    SessionStore, SessionValueManager, StoreError, SyncConfig, downcast_attribute,
};

pub const CART_ATTR: &str = "shoppingCart";

/// Minimal stand-in for a shopping cart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestCart {
    pub lines: Vec<(String, u32)>,
    pub total: u32,
}

impl TestCart {
    pub fn with_total(total: u32) -> Self {
        Self {
            lines: Vec::new(),
            total,
        }
    }
}

/// Which store operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Remove,
}

/// In-memory store that counts calls and can be told to fail.
#[derive(Default)]
pub struct MockSessionStore {
    inner: InMemorySessionStore,
    failing: Mutex<Option<StoreOp>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl MockSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, op: StoreOp) {
        *self.failing.lock().unwrap() = Some(op);
    }

    pub fn heal(&self) {
        *self.failing.lock().unwrap() = None;
    }

    pub fn call_count(&self, op: StoreOp) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    pub fn cart(&self, session_id: &str) -> Option<Arc<TestCart>> {
        self.inner
            .get_attribute(&SessionId::new(session_id), CART_ATTR)
            .unwrap()
            .map(|attr| downcast_attribute::<TestCart>(attr).unwrap())
    }

    fn record(&self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        if *self.failing.lock().unwrap() == Some(op) {
            return Err(StoreError::unavailable(format!("{op:?}"), "injected failure"));
        }
        Ok(())
    }
}

impl SessionStore for MockSessionStore {
    fn get_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
    ) -> Result<Option<AttributeValue>, StoreError> {
        self.record(StoreOp::Get)?;
        self.inner.get_attribute(session_id, name)
    }

    fn set_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), StoreError> {
        self.record(StoreOp::Set)?;
        self.inner.set_attribute(session_id, name, value)
    }

    fn remove_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
    ) -> Result<Option<AttributeValue>, StoreError> {
        self.record(StoreOp::Remove)?;
        self.inner.remove_attribute(session_id, name)
    }

    fn invalidate(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.inner.invalidate(session_id)
    }
}

pub struct Harness {
    pub store: Arc<MockSessionStore>,
    pub manager: Arc<SessionValueManager<TestCart>>,
    pub created: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let _ = cart_sync_common::init_tracing("warn");
        let store = Arc::new(MockSessionStore::new());
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let manager = SessionValueManager::new(
            CART_ATTR,
            store.clone(),
            Arc::new(SessionLockRegistry::new(&config)),
            Arc::new(move |_: &RequestContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                TestCart::default()
            }),
            config,
        );
        Self {
            store,
            manager: Arc::new(manager),
            created,
        }
    }

    pub fn request(&self, session_id: &str) -> RequestContext {
        RequestContext::new(SessionId::new(session_id))
    }

    pub fn seed(&self, session_id: &str, cart: TestCart) {
        let ctx = self.request(session_id);
        let section = self.manager.open_update_section(&ctx).unwrap();
        section.commit(cart).unwrap();
    }

    pub fn creations(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}
