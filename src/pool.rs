//! Striped connection pool.
//!
//! The pool holds a fixed number of independent stripes, each with its own
//! capacity and wait queue. Acquisition picks a stripe round-robin and waits
//! on that stripe alone when it is saturated: an idle connection in another
//! stripe does not satisfy the request. That non-balancing policy is
//! deliberate, trading occasional extra waiting for lower contention on the
//! stripe state.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::driver::{Driver, DriverConnection};
use crate::error::{Error, Result};
use crate::statement::StatementCache;

/// Floor for `PoolConfig::idle_timeout`.
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Pool Configuration
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of independent stripes (minimum 1)
    pub stripes: usize,
    /// Connections per stripe (minimum 1)
    pub per_stripe: usize,
    /// Idle age after which the reaper closes a connection (minimum 500ms)
    pub idle_timeout: Duration,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            stripes: 1,
            per_stripe: 10,
            idle_timeout: Duration::from_secs(30),
        }
    }

    /// Set the number of stripes.
    pub fn stripes(mut self, stripes: usize) -> Self {
        self.stripes = stripes;
        self
    }

    /// Set the per-stripe connection capacity.
    pub fn per_stripe(mut self, per_stripe: usize) -> Self {
        self.per_stripe = per_stripe;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.stripes < 1 {
            return Err(Error::Config("stripe count must be at least 1".into()));
        }
        if self.per_stripe < 1 {
            return Err(Error::Config(
                "per-stripe capacity must be at least 1".into(),
            ));
        }
        if self.idle_timeout < MIN_IDLE_TIMEOUT {
            return Err(Error::Config(format!(
                "idle timeout must be at least {:?}",
                MIN_IDLE_TIMEOUT
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A physical connection together with its prepared-statement cache.
///
/// Exclusively owned by one in-flight transaction attempt at a time. The
/// cache (and every handle it holds) dies with the connection.
pub struct Connection {
    pub(crate) driver: Box<dyn DriverConnection>,
    pub(crate) cache: StatementCache,
    /// Set while a driver-level transaction is open. A connection released
    /// with this still set is rolled back before it rejoins the idle set.
    pub(crate) open_transaction: bool,
}

impl Connection {
    fn new(driver: Box<dyn DriverConnection>) -> Self {
        Self {
            driver,
            cache: StatementCache::new(),
            open_transaction: false,
        }
    }

    /// The prepared-statement cache owned by this connection.
    pub fn statement_cache(&self) -> &StatementCache {
        &self.cache
    }
}

struct IdleConn {
    conn: Connection,
    since: Instant,
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// Dropping it returns the connection to its stripe. If a transaction is
/// still open at that point (a cancelled or abandoned attempt), a rollback
/// runs before the connection rejoins the idle set; if the rollback fails,
/// the connection is discarded instead.
pub struct PooledConnection {
    /// The actual connection (None once returned)
    conn: Option<Connection>,
    stripe: usize,
    pool: Arc<PoolInner>,
    /// Semaphore permit; held until the connection is actually back in the
    /// stripe so capacity is never exceeded, even across a spawned rollback.
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    pub(crate) fn connection(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Connection("connection already returned to the pool".into()))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);
        let stripe = self.stripe;

        if pool.closed.load(Ordering::SeqCst) {
            spawn_if_runtime(async move {
                let _ = conn.driver.close().await;
                drop(permit);
            });
            return;
        }

        if conn.open_transaction {
            spawn_if_runtime(async move {
                match conn.driver.finish(false).await {
                    Ok(()) => {
                        conn.open_transaction = false;
                        if let Some(mut rejected) = pool.park(stripe, conn) {
                            let _ = rejected.driver.close().await;
                        }
                    }
                    Err(error) => {
                        debug!(%error, "rollback before release failed; discarding connection");
                        let _ = conn.driver.close().await;
                    }
                }
                drop(permit);
            });
        } else if let Some(mut rejected) = pool.park(stripe, conn) {
            spawn_if_runtime(async move {
                let _ = rejected.driver.close().await;
                drop(permit);
            });
        } else {
            drop(permit);
        }
    }
}

/// Drop-path work needs a runtime; without one the connection is simply
/// dropped, which a well-behaved driver treats as a disconnect.
fn spawn_if_runtime(fut: impl Future<Output = ()> + Send + 'static) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(fut);
    }
}

// ============================================================================
// Pool Inner
// ============================================================================

struct Stripe {
    idle: Mutex<Vec<IdleConn>>,
    semaphore: Arc<Semaphore>,
}

struct PoolInner {
    driver: Arc<dyn Driver>,
    config: PoolConfig,
    stripes: Vec<Stripe>,
    next_stripe: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    /// Return a connection to its stripe's idle set.
    ///
    /// Re-checks `closed` under the stripe lock: a release racing with
    /// `shutdown` must not park after the drain. In that case the
    /// connection is handed back and the caller closes it.
    fn park(&self, stripe: usize, conn: Connection) -> Option<Connection> {
        let mut idle = self.stripes[stripe].idle.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Some(conn);
        }
        idle.push(IdleConn {
            conn,
            since: Instant::now(),
        });
        None
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

/// A striped pool of physical connections.
///
/// Total connections to the server never exceed `stripes × per_stripe`.
/// Acquire ordering within a saturated stripe is whatever the underlying
/// semaphore provides; it is not part of the contract.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a new pool. Rejects configuration values below their
    /// documented minimums. No connections are opened until first use.
    pub fn new(driver: Arc<dyn Driver>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let stripes = (0..config.stripes)
            .map(|_| Stripe {
                idle: Mutex::new(Vec::new()),
                semaphore: Arc::new(Semaphore::new(config.per_stripe)),
            })
            .collect();

        let inner = Arc::new(PoolInner {
            driver,
            config,
            stripes,
            next_stripe: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        spawn_reaper(&inner);

        Ok(Self { inner })
    }

    /// Get a connection, waiting if the selected stripe is saturated.
    ///
    /// There is no acquisition timeout; callers that need bounded waiting
    /// wrap this in `tokio::time::timeout`.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let stripe_count = self.inner.stripes.len();
        let index = self.inner.next_stripe.fetch_add(1, Ordering::Relaxed) % stripe_count;
        let stripe = &self.inner.stripes[index];

        // Waits on this stripe only; closed on shutdown, which fails both
        // pending and future acquisitions.
        let permit = Arc::clone(&stripe.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        let idle = { stripe.idle.lock().pop() };

        let conn = match idle {
            Some(entry) => entry.conn,
            // Connect failures propagate to this caller; the permit drops
            // with the error, so the stripe is not poisoned.
            None => Connection::new(self.inner.driver.connect().await?),
        };

        Ok(PooledConnection {
            conn: Some(conn),
            stripe: index,
            pool: Arc::clone(&self.inner),
            permit: Some(permit),
        })
    }

    /// Close all idle connections and fail pending and future acquisitions
    /// with `Error::PoolClosed`. Connections currently checked out are
    /// closed when they are released.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for stripe in &self.inner.stripes {
            stripe.semaphore.close();
        }

        let drained: Vec<IdleConn> = self
            .inner
            .stripes
            .iter()
            .flat_map(|stripe| std::mem::take(&mut *stripe.idle.lock()))
            .collect();

        for mut entry in drained {
            let _ = entry.conn.driver.close().await;
        }
    }

    /// Current number of idle connections across all stripes.
    pub fn idle_count(&self) -> usize {
        self.inner
            .stripes
            .iter()
            .map(|stripe| stripe.idle.lock().len())
            .sum()
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

// ============================================================================
// Idle Reaper
// ============================================================================

/// Background task closing idle connections older than the idle timeout.
/// Holds only a weak reference so the pool can be dropped freely.
fn spawn_reaper(inner: &Arc<PoolInner>) {
    let period = (inner.config.idle_timeout / 2).max(Duration::from_millis(250));
    let weak = Arc::downgrade(inner);

    spawn_if_runtime(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }

            let timeout = inner.config.idle_timeout;
            let mut expired = Vec::new();
            for stripe in &inner.stripes {
                let mut idle = stripe.idle.lock();
                let now = Instant::now();
                let mut keep = Vec::with_capacity(idle.len());
                for entry in idle.drain(..) {
                    if now.duration_since(entry.since) >= timeout {
                        expired.push(entry);
                    } else {
                        keep.push(entry);
                    }
                }
                *idle = keep;
            }

            for mut entry in expired {
                debug!("closing connection idle past the idle timeout");
                let _ = entry.conn.driver.close().await;
            }
        }
    });
}
