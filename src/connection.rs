use crate::Manager;
use std::fmt::{Debug, Formatter};
use std::time::{Duration, Instant};

/// A backend connection paired with its execution context, as tracked by the pool.
///
/// Lives either in the idle registry or inside exactly one
/// [`ConnectionGuard`](crate::ConnectionGuard).
pub struct PooledConnection<M: Manager> {
    id: u64,
    pub connection: M::Connection,
    pub context: M::Context,
    created_at: Instant,
}

impl<M: Manager> PooledConnection<M> {
    pub(crate) fn new(id: u64, connection: M::Connection, context: M::Context) -> Self {
        Self {
            id,
            connection,
            context,
            created_at: Instant::now(),
        }
    }

    /// Pool-unique identity, never reused for another connection
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    #[inline]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.age() > max_lifetime
    }

    #[inline]
    pub fn into_parts(self) -> (M::Connection, M::Context) {
        (self.connection, self.context)
    }
}

impl<M: Manager> Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("age", &self.age())
            .finish()
    }
}
