#![deny(clippy::all)]

//! Concurrency-safe access to session-scoped mutable values.
//!
//! Several requests from one browser session may run at once (double-submitted
//! forms, polling scripts). This crate keeps one authoritative value per
//! session attribute and lets request handlers
//!
//! - read it consistently for the rest of a request (request-first reads),
//! - replace it without lost updates (`UpdateSection`: lock, read session
//!   storage, modify a copy, commit),
//! - serialize multi-step sequences that write directly (`SyncSection`),
//! - find out whether the value changed during the request.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cart_sync_core::{
//!     InMemorySessionStore, RequestContext, SessionId, SessionLockRegistry, SessionValueManager,
//!     SyncConfig,
//! };
//!
//! let manager = SessionValueManager::new(
//!     "counter",
//!     Arc::new(InMemorySessionStore::new()),
//!     Arc::new(SessionLockRegistry::default()),
//!     Arc::new(|_: &RequestContext| 0u64),
//!     SyncConfig::default(),
//! );
//! let ctx = RequestContext::new(SessionId::new("s1"));
//! let section = manager.open_update_section(&ctx)?;
//! let next = section.get_for_update() + 1;
//! section.commit(next)?;
//! # Ok::<(), cart_sync_core::SyncError>(())
//! ```

mod config;
mod error;
mod lock_registry;
mod manager;
mod request;
mod scope;
mod section;
mod session_id;
mod store;

pub use config::SyncConfig;
pub use error::ErrorCategory;
pub use error::StoreError;
pub use error::SyncError;
pub use lock_registry::INITIAL_BACKOFF;
pub use lock_registry::LockHandle;
pub use lock_registry::MAX_BACKOFF;
pub use lock_registry::SessionLockRegistry;
pub use manager::SessionValueManager;
pub use manager::ValueFactory;
pub use request::RequestContext;
pub use scope::ReadPolicy;
pub use scope::Scopes;
pub use section::SyncSection;
pub use section::UpdateSection;
pub use section::has_active_update;
pub use session_id::SessionId;
pub use session_id::SessionIdError;
pub use session_id::MAX_SESSION_ID_LEN;
pub use store::AttributeValue;
pub use store::InMemorySessionStore;
pub use store::SessionStore;
pub use store::downcast_attribute;

pub type Result<T> = std::result::Result<T, SyncError>;
