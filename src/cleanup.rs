use crate::{Manager, Pool};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Background trimming of idle connections, owned by the pool.
///
/// Every `cleanup_interval` idle connections above `min_connections` are
/// closed. Stops when cancelled or dropped.
#[derive(Debug)]
pub struct CleanupTask {
    token: CancellationToken,
}

impl CleanupTask {
    pub fn spawn<M>(pool: Pool<M>) -> Self
    where
        M: Manager + Send + Sync + 'static,
        M::Connection: Send,
        M::Context: Send,
    {
        let token = CancellationToken::new();
        let stop = token.clone();
        let period = pool.config().cleanup_interval().max(Duration::from_millis(1));
        // detached, the token is the only handle kept
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let closed = pool.close_extra_connections();
                        trace!(closed, "scheduled cleanup");
                    }
                }
            }
            debug!("cleanup task stopped");
        });
        Self { token }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
