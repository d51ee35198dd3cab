use crate::cleanup::CleanupTask;
use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::duration::AtomicDuration;
use crate::error::PoolError;
use crate::guard::ConnectionGuard;
use crate::registry::Registry;
use crate::state::State;
use crate::Manager;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// A bounded pool of connections to a single backend.
///
/// Cloning is cheap and every clone shares the same connections, so one pool
/// is built at startup and handed to whoever needs storage access.
pub struct Pool<M: Manager> {
    pub manager: Arc<M>,
    config: Arc<PoolConfig>,
    registry: Arc<Mutex<Registry<PooledConnection<M>>>>,
    /// one permit per borrower, `max_connections` in total
    permits: Arc<Semaphore>,
    /// fired whenever idle gains connections or capacity is freed
    changed: Arc<Notify>,
    waits: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
    timeout_check: Arc<AtomicDuration>,
    cleanup: Arc<Mutex<Option<CleanupTask>>>,
}

impl<M: Manager> Debug for Pool<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        Debug::fmt(&state, f)
    }
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            config: self.config.clone(),
            registry: self.registry.clone(),
            permits: self.permits.clone(),
            changed: self.changed.clone(),
            waits: self.waits.clone(),
            next_id: self.next_id.clone(),
            timeout_check: self.timeout_check.clone(),
            cleanup: self.cleanup.clone(),
        }
    }
}

enum Next<T> {
    Reuse(T),
    Open(u64),
    Wait,
}

impl<M: Manager> Pool<M> {
    /// Opens `min_connections` connections and returns the ready pool.
    ///
    /// Fails if the configuration is invalid or any initial connection
    /// cannot be opened; connections opened so far are closed again.
    #[instrument(skip_all, fields(min = config.min_connections(), max = config.max_connections()))]
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError<M::Error>> {
        config.validate()?;
        let permits = (config.max_connections() as usize).min(Semaphore::MAX_PERMITS);
        let pool = Self {
            manager: Arc::new(manager),
            timeout_check: Arc::new(AtomicDuration::new(config.check_timeout())),
            config: Arc::new(config),
            registry: Arc::new(Mutex::new(Registry::new(Vec::new()))),
            permits: Arc::new(Semaphore::new(permits)),
            changed: Arc::new(Notify::new()),
            waits: Arc::new(AtomicU64::new(0)),
            next_id: Arc::new(AtomicU64::new(0)),
            cleanup: Arc::new(Mutex::new(None)),
        };
        let mut opened = Vec::with_capacity(pool.config.min_connections() as usize);
        for _ in 0..pool.config.min_connections() {
            match pool.create_new_connection().await {
                Ok(conn) => opened.push(conn),
                Err(e) => {
                    warn!(error = %e, opened = opened.len(), "failed to open initial connection");
                    pool.close_each(opened);
                    return Err(PoolError::Connect(e));
                }
            }
        }
        *pool.registry.lock() = Registry::new(opened);
        info!("connection pool ready");
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Borrows a connection, waiting at most the configured acquire timeout.
    pub async fn get(&self) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        self.get_timeout(self.config.acquire_timeout()).await
    }

    /// Borrows a connection; `None` waits for as long as it takes.
    pub async fn get_timeout(
        &self,
        d: Option<Duration>,
    ) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        let _waiting = Waiting(&self.waits);
        match d {
            None => self.acquire().await,
            Some(d) => tokio::time::timeout(d, self.acquire())
                .await
                .map_err(|_| PoolError::Timeout(d))?,
        }
    }

    /// Like [`Pool::get_timeout`], but gives up as soon as `token` is cancelled.
    pub async fn get_cancellable(
        &self,
        token: &CancellationToken,
        d: Option<Duration>,
    ) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(PoolError::Cancelled),
            r = self.get_timeout(d) => r,
        }
    }

    async fn acquire(&self) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        loop {
            // registered before looking at the registry so no wakeup is missed
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let next = {
                let mut registry = self.registry.lock();
                if registry.is_closed() {
                    return Err(PoolError::Closed);
                }
                if let Some(conn) = registry.checkout() {
                    Next::Reuse(conn)
                } else {
                    let n = registry.reserve(
                        self.config.max_connections(),
                        self.config.batch_size(),
                    );
                    if n > 0 {
                        Next::Open(n)
                    } else if registry.connecting() > 0 {
                        Next::Wait
                    } else {
                        error!(
                            borrowed = registry.borrowed(),
                            max = self.config.max_connections(),
                            "no idle connection and no spare capacity while holding a permit"
                        );
                        return Err(PoolError::Exhausted);
                    }
                }
            };

            match next {
                Next::Reuse(conn) => {
                    let guard = ConnectionGuard::new(conn, self.clone());
                    if let Some(mut guard) = self.vet(guard).await {
                        guard.set_permit(permit);
                        return Ok(guard);
                    }
                }
                Next::Open(n) => {
                    let mut reservation = Reservation::new(self, n);
                    let mut failure = None;
                    for _ in 0..n {
                        match self.create_new_connection().await {
                            Ok(conn) => reservation.opened.push(conn),
                            Err(e) => {
                                warn!(error = %e, "failed to open backend connection");
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                    debug!(requested = n, opened = reservation.opened.len(), "allocated connections");
                    match reservation.settle()? {
                        Some(conn) => {
                            let mut guard = ConnectionGuard::new(conn, self.clone());
                            guard.set_permit(permit);
                            return Ok(guard);
                        }
                        None => {
                            if let Some(e) = failure {
                                return Err(PoolError::Connect(e));
                            }
                        }
                    }
                }
                Next::Wait => {
                    debug!("capacity is reserved by other callers, waiting for their connections");
                    changed.await;
                }
            }
        }
    }

    /// Screens a reused connection; a rejected one is closed and `None` returned.
    async fn vet(&self, mut guard: ConnectionGuard<M>) -> Option<ConnectionGuard<M>> {
        if let Some(max_lifetime) = self.config.max_lifetime() {
            if guard.pooled().is_expired(max_lifetime) {
                debug!(id = guard.id(), age = ?guard.age(), "retiring connection past max lifetime");
                guard.discard();
                return None;
            }
        }
        let (conn, ctx) = guard.split_mut();
        let checked = match self.timeout_check.get() {
            None => self.manager.check(conn, ctx).await.map_err(|e| e.to_string()),
            Some(d) => match tokio::time::timeout(d, self.manager.check(conn, ctx)).await {
                Ok(r) => r.map_err(|e| e.to_string()),
                Err(_) => Err(format!("check timed out after {:?}", d)),
            },
        };
        match checked {
            Ok(()) => Some(guard),
            Err(reason) => {
                warn!(id = guard.id(), %reason, "connection failed validation, evicting");
                guard.discard();
                None
            }
        }
    }

    /// Opens one backend connection and its execution context. Touches no pool state.
    async fn create_new_connection(&self) -> Result<PooledConnection<M>, M::Error> {
        let mut conn = self.manager.connect().await?;
        let context = self.manager.prepare(&mut conn).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection::new(id, conn, context))
    }

    /// Puts a borrowed connection back into circulation.
    ///
    /// Equivalent to dropping the guard.
    pub fn return_connection(&self, guard: ConnectionGuard<M>) {
        guard.release()
    }

    /// Closes a connection that failed while borrowed without returning it to idle.
    ///
    /// The pool shrinks by one until a later `get` opens a replacement.
    pub fn close_failing_connection(&self, guard: ConnectionGuard<M>) {
        guard.evict()
    }

    pub(crate) fn recycle(&self, conn: PooledConnection<M>) {
        let leftover = {
            let mut registry = self.registry.lock();
            if registry.is_closed() {
                registry.release_borrowed();
                Some(conn)
            } else {
                registry.checkin(conn);
                None
            }
        };
        if let Some(conn) = leftover {
            debug!(id = conn.id(), "pool is closed, closing returned connection");
            self.close_quietly(conn);
        }
        self.changed.notify_waiters();
    }

    pub(crate) fn discard(&self, conn: PooledConnection<M>) {
        self.close_quietly(conn);
        self.registry.lock().release_borrowed();
        self.changed.notify_waiters();
    }

    /// Closes idle connections above `min_connections`. Returns how many were closed.
    ///
    /// Restarts the `check_for_cleanup` interval.
    pub fn close_extra_connections(&self) -> usize {
        let surplus = {
            let mut registry = self.registry.lock();
            registry.reset_cleanup_clock();
            registry.surplus(self.config.min_connections())
        };
        self.trim(surplus)
    }

    /// Trims to `min_connections` if `cleanup_interval` has passed since the last cleanup.
    pub fn check_for_cleanup(&self) -> usize {
        let surplus = {
            let mut registry = self.registry.lock();
            if !registry.cleanup_due(self.config.cleanup_interval()) {
                return 0;
            }
            registry.surplus(self.config.min_connections())
        };
        self.trim(surplus)
    }

    fn trim(&self, surplus: Vec<PooledConnection<M>>) -> usize {
        let n = surplus.len();
        if n > 0 {
            self.close_each(surplus);
            self.changed.notify_waiters();
            debug!(closed = n, "trimmed idle connections");
        }
        n
    }

    /// Closes every idle connection. Borrowed connections are left alone and
    /// the pool stays usable.
    pub fn close_all_connections(&self) -> usize {
        let idle = self.registry.lock().drain();
        let n = idle.len();
        self.close_each(idle);
        self.changed.notify_waiters();
        debug!(closed = n, "closed all idle connections");
        n
    }

    /// Tears the pool down: stops the cleanup task, fails pending and future
    /// `get` calls with [`PoolError::Closed`] and closes idle connections.
    /// Connections still borrowed are closed when their guards drop.
    #[instrument(skip(self))]
    pub fn close(&self) {
        if let Some(task) = self.cleanup.lock().take() {
            task.stop();
        }
        let idle = self.registry.lock().close();
        self.permits.close();
        let n = idle.len();
        self.close_each(idle);
        self.changed.notify_waiters();
        info!(closed = n, "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.registry.lock().is_closed()
    }

    fn close_each(&self, conns: Vec<PooledConnection<M>>) {
        for conn in conns {
            self.close_quietly(conn);
        }
    }

    fn close_quietly(&self, conn: PooledConnection<M>) {
        let id = conn.id();
        let (conn, ctx) = conn.into_parts();
        if let Err(e) = self.manager.close(conn, ctx) {
            debug!(id, error = %e, "ignoring error while closing connection");
        }
    }

    pub fn state(&self) -> State {
        let registry = self.registry.lock();
        State {
            min_connections: self.config.min_connections(),
            max_connections: self.config.max_connections(),
            connections: registry.live(),
            borrowed: registry.borrowed(),
            idle: registry.idle(),
            connecting: registry.connecting(),
            waits: self.waits.load(Ordering::SeqCst),
        }
    }

    /// Set the timeout for checking reused connections; `None` disables it.
    pub fn set_timeout_check(&self, duration: Option<Duration>) {
        self.timeout_check.store(duration);
    }

    pub fn get_timeout_check(&self) -> Option<Duration> {
        self.timeout_check.get()
    }
}

impl<M> Pool<M>
where
    M: Manager + Send + Sync + 'static,
    M::Connection: Send,
    M::Context: Send,
{
    /// Spawns the background task that trims idle connections every
    /// `cleanup_interval`. Must be called inside a tokio runtime.
    ///
    /// Returns `false` if the task is already running or the pool is closed.
    /// The task keeps the pool alive until [`Pool::close`].
    pub fn start_cleanup(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut slot = self.cleanup.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(CleanupTask::spawn(self.clone()));
        true
    }
}

struct Waiting<'a>(&'a AtomicU64);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Slots claimed for a batch being opened outside the lock.
///
/// Dropped unsettled (error or cancelled `get`), it gives back the unused
/// slots and keeps whatever was opened as idle.
struct Reservation<'a, M: Manager> {
    pool: &'a Pool<M>,
    slots: u64,
    opened: Vec<PooledConnection<M>>,
}

impl<'a, M: Manager> Reservation<'a, M> {
    fn new(pool: &'a Pool<M>, slots: u64) -> Self {
        Self {
            pool,
            slots,
            opened: Vec::with_capacity(slots as usize),
        }
    }

    /// Admits the batch and borrows one of the fresh connections, if any opened.
    ///
    /// If the pool was closed meanwhile the batch is closed instead.
    fn settle(mut self) -> Result<Option<PooledConnection<M>>, PoolError<M::Error>> {
        let opened = std::mem::take(&mut self.opened);
        let slots = std::mem::replace(&mut self.slots, 0);
        let fresh = !opened.is_empty();
        let settled = {
            let mut registry = self.pool.registry.lock();
            if registry.is_closed() {
                registry.admit(Vec::new(), slots);
                Err(opened)
            } else {
                registry.admit(opened, slots);
                Ok(if fresh { registry.checkout() } else { None })
            }
        };
        self.pool.changed.notify_waiters();
        settled.or_else(|opened| {
            debug!(closed = opened.len(), "pool closed while opening connections");
            self.pool.close_each(opened);
            Err(PoolError::Closed)
        })
    }
}

impl<M: Manager> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.slots == 0 {
            return;
        }
        let opened = std::mem::take(&mut self.opened);
        let leftover = {
            let mut registry = self.pool.registry.lock();
            if registry.is_closed() {
                registry.admit(Vec::new(), self.slots);
                opened
            } else {
                registry.admit(opened, self.slots);
                Vec::new()
            }
        };
        self.pool.close_each(leftover);
        self.pool.changed.notify_waiters();
    }
}
