use crate::connection::PooledConnection;
use crate::{Manager, Pool};
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;

/// A borrowed connection.
///
/// Dropping the guard returns the connection to the pool. A connection that
/// failed during use should be handed to [`ConnectionGuard::evict`] instead.
/// Either way the admission permit is released.
pub struct ConnectionGuard<M: Manager> {
    inner: Option<PooledConnection<M>>,
    pool: Pool<M>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<M: Manager> ConnectionGuard<M> {
    /// `conn` must already be counted as borrowed in the registry.
    pub(crate) fn new(conn: PooledConnection<M>, pool: Pool<M>) -> ConnectionGuard<M> {
        Self {
            inner: Some(conn),
            pool,
            permit: None,
        }
    }

    pub(crate) fn set_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.permit = Some(permit);
    }

    pub(crate) fn pooled(&self) -> &PooledConnection<M> {
        self.inner.as_ref().expect("connection taken")
    }

    fn pooled_mut(&mut self) -> &mut PooledConnection<M> {
        self.inner.as_mut().expect("connection taken")
    }

    pub fn id(&self) -> u64 {
        self.pooled().id()
    }

    pub fn age(&self) -> Duration {
        self.pooled().age()
    }

    pub fn context(&self) -> &M::Context {
        &self.pooled().context
    }

    pub fn context_mut(&mut self) -> &mut M::Context {
        &mut self.pooled_mut().context
    }

    /// Connection and context borrowed together, e.g. to run a statement on a cursor.
    pub fn split_mut(&mut self) -> (&mut M::Connection, &mut M::Context) {
        let conn = self.pooled_mut();
        (&mut conn.connection, &mut conn.context)
    }

    /// Hands the connection back for reuse. Same as dropping the guard.
    pub fn release(self) {
        drop(self)
    }

    /// Closes a connection that failed during use. It never returns to idle.
    pub fn evict(self) {
        warn!(id = self.id(), "evicting connection reported as failing");
        self.discard()
    }

    pub(crate) fn discard(mut self) {
        if let Some(conn) = self.inner.take() {
            self.pool.discard(conn);
        }
    }
}

impl<M: Manager> Debug for ConnectionGuard<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("conn", &self.inner)
            .field("pool", &self.pool)
            .finish()
    }
}

impl<M: Manager> Deref for ConnectionGuard<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.pooled().connection
    }
}

impl<M: Manager> DerefMut for ConnectionGuard<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.pooled_mut().connection
    }
}

impl<M: Manager> Drop for ConnectionGuard<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.inner.take() {
            self.pool.recycle(conn);
        }
        // registry is updated before the permit goes back
        drop(self.permit.take());
    }
}
