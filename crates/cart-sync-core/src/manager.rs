//! Access to one session-scoped value, mirrored into the request cache.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::lock_registry::SessionLockRegistry;
use crate::request::RequestContext;
use crate::scope::{ReadPolicy, Scopes};
use crate::section::{self, SyncSection, UpdateSection};
use crate::store::{AttributeValue, SessionStore, downcast_attribute};

/// Builds the initial value for a session that has none yet.
pub trait ValueFactory<V>: Send + Sync {
    fn create(&self, ctx: &RequestContext) -> V;
}

impl<V, F> ValueFactory<V> for F
where
    F: Fn(&RequestContext) -> V + Send + Sync,
{
    fn create(&self, ctx: &RequestContext) -> V {
        self(ctx)
    }
}

/// Reads, writes and synchronizes the value stored under one session attribute.
///
/// Values are shared as `Arc<V>` snapshots; nobody mutates a stored value in
/// place. Changing it means producing a new `V` inside an `UpdateSection` and
/// committing it.
pub struct SessionValueManager<V> {
    attribute: String,
    store: Arc<dyn SessionStore>,
    locks: Arc<SessionLockRegistry>,
    factory: Arc<dyn ValueFactory<V>>,
    config: SyncConfig,
}

impl<V: Clone + Send + Sync + 'static> SessionValueManager<V> {
    pub fn new(
        attribute: impl Into<String>,
        store: Arc<dyn SessionStore>,
        locks: Arc<SessionLockRegistry>,
        factory: Arc<dyn ValueFactory<V>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            store,
            locks,
            factory,
            config,
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<SessionLockRegistry> {
        &self.locks
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Build a fresh value with the configured factory, without storing it.
    pub fn create_value(&self, ctx: &RequestContext) -> V {
        self.factory.create(ctx)
    }

    /// Resolve the current value.
    ///
    /// `RequestFirst` prefers the request cache and `SessionFirst` prefers session
    /// storage; each falls back to the other. With `create_if_missing`, a missing
    /// value is created under the session lock after checking storage again, so
    /// racing requests install at most one initial value. If the request cache
    /// was empty and `scopes` includes REQUEST, the resolved value is cached in
    /// the request. Session storage is never written by a plain read.
    pub fn get(
        &self,
        ctx: &RequestContext,
        policy: ReadPolicy,
        create_if_missing: bool,
        scopes: Scopes,
    ) -> Result<Option<Arc<V>>, SyncError> {
        let request_value = self.request_value(ctx)?;
        let had_request_value = request_value.is_some();

        let mut value = match policy {
            ReadPolicy::RequestFirst => match request_value {
                Some(value) => Some(value),
                None => self.session_value(ctx)?,
            },
            ReadPolicy::SessionFirst => match self.session_value(ctx)? {
                Some(value) => Some(value),
                None => request_value,
            },
        };

        let mut request_written = false;
        if create_if_missing && value.is_none() {
            let _sync = self.open_sync_section(ctx)?;
            value = match self.session_value(ctx)? {
                Some(raced) => {
                    trace!(session_id = %ctx.session_id(), attribute = %self.attribute, "value created by a concurrent request");
                    Some(raced)
                }
                None => {
                    let created = Arc::new(self.factory.create(ctx));
                    debug!(session_id = %ctx.session_id(), attribute = %self.attribute, "created session value");
                    self.set(ctx, Some(Arc::clone(&created)), scopes)?;
                    request_written = true;
                    Some(created)
                }
            };
        }

        if !had_request_value && !request_written && scopes.request() {
            if let Some(value) = &value {
                let attr: AttributeValue = value.clone();
                ctx.set_attribute(&self.attribute, attr);
            }
        }
        Ok(value)
    }

    /// Request-first read, the default for handlers that only display the value.
    pub fn get_current_value(
        &self,
        ctx: &RequestContext,
        create_if_missing: bool,
    ) -> Result<Option<Arc<V>>, SyncError> {
        self.get(ctx, ReadPolicy::RequestFirst, create_if_missing, Scopes::ALL)
    }

    pub fn get_current_value_if_exists(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<Arc<V>>, SyncError> {
        self.get_current_value(ctx, false)
    }

    /// Write (or with `None`, remove) the value in the selected scopes.
    ///
    /// Writing session scope while this thread has an update section open for
    /// the same session and attribute commits through that section instead, so
    /// session storage is never written behind the section's back. Any session
    /// scope write marks the request as changed.
    ///
    /// Outside an update section, callers that read before writing must hold a
    /// `SyncSection`.
    pub fn set(
        &self,
        ctx: &RequestContext,
        value: Option<Arc<V>>,
        scopes: Scopes,
    ) -> Result<Option<Arc<V>>, SyncError> {
        if scopes.session() {
            if let Some(result) = section::commit_through_active(self, ctx, value.clone()) {
                result?;
                return Ok(value);
            }
        }
        self.write_scopes(ctx, value.clone(), scopes)?;
        Ok(value)
    }

    pub fn set_current_value(
        &self,
        ctx: &RequestContext,
        value: V,
        scopes: Scopes,
    ) -> Result<Arc<V>, SyncError> {
        let value = Arc::new(value);
        self.set(ctx, Some(Arc::clone(&value)), scopes)?;
        Ok(value)
    }

    pub fn remove(&self, ctx: &RequestContext, scopes: Scopes) -> Result<(), SyncError> {
        self.set(ctx, None, scopes).map(|_| ())
    }

    /// Whether a session-scope write of this value happened during the request.
    pub fn is_changed(&self, ctx: &RequestContext) -> bool {
        ctx.is_changed(&self.attribute)
    }

    /// Lock the session and start a read-modify-commit block.
    pub fn open_update_section<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> Result<UpdateSection<'a, V>, SyncError> {
        UpdateSection::open(self, ctx)
    }

    /// Lock the session without the working-copy indirection.
    pub fn open_sync_section(&self, ctx: &RequestContext) -> Result<SyncSection, SyncError> {
        SyncSection::open(&self.locks, ctx.session_id())
    }

    pub(crate) fn write_scopes(
        &self,
        ctx: &RequestContext,
        value: Option<Arc<V>>,
        scopes: Scopes,
    ) -> Result<(), SyncError> {
        let session_id = ctx.session_id();
        if scopes.session() {
            match &value {
                Some(value) => {
                    let attr: AttributeValue = value.clone();
                    self.store.set_attribute(session_id, &self.attribute, attr)?;
                }
                None => {
                    self.store.remove_attribute(session_id, &self.attribute)?;
                }
            }
        }
        if scopes.request() {
            match value {
                Some(value) => ctx.set_attribute(&self.attribute, value),
                None => {
                    ctx.remove_attribute(&self.attribute);
                }
            }
        }
        if scopes.session() {
            ctx.mark_changed(&self.attribute);
        }
        trace!(session_id = %session_id, attribute = %self.attribute, scopes = %scopes, "session value written");
        Ok(())
    }

    fn request_value(&self, ctx: &RequestContext) -> Result<Option<Arc<V>>, SyncError> {
        ctx.attribute(&self.attribute)
            .map(|attr| self.typed(ctx, attr))
            .transpose()
    }

    fn session_value(&self, ctx: &RequestContext) -> Result<Option<Arc<V>>, SyncError> {
        self.store
            .get_attribute(ctx.session_id(), &self.attribute)?
            .map(|attr| self.typed(ctx, attr))
            .transpose()
    }

    fn typed(&self, ctx: &RequestContext, attr: AttributeValue) -> Result<Arc<V>, SyncError> {
        downcast_attribute::<V>(attr).map_err(|_| SyncError::TypeMismatch {
            session_id: ctx.session_id().to_string(),
            attribute: self.attribute.clone(),
        })
    }
}
