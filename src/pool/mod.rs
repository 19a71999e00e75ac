//! Session-slot pool (spec.md §4.6; SPEC_FULL.md §4.6-EXPANDED).
//!
//! The wire-facing server accepts every TCP connection unconditionally
//! (spec.md §4.7 has no admission control); what this pool bounds and reuses
//! is the in-memory [`Session`] state a connection's protocol task borrows
//! for its lifetime. A [`SessionLease`] is handed out on [`Pool::acquire`]
//! and returns its [`Session`] to the pool when dropped, exactly like the
//! teacher's `Object<T>` guard around a pooled server connection, generalized
//! from "a real backend connection" to "an in-memory session slot".

mod types;

pub use crate::errors::PoolError;
pub use types::PoolStatus;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::config::Pool as PoolConfig;
use crate::session::Session;

/// A pooled [`Session`] plus the bookkeeping spec.md §3 "PooledConnection"
/// describes.
struct PooledConnection {
    id: u64,
    session: Session,
    created_at: Instant,
    last_used: Instant,
    last_validated: Instant,
    usage_count: u64,
}

struct Waiter {
    id: u64,
    reply: oneshot::Sender<Result<PooledConnection, PoolError>>,
}

struct InUseEntry {
    client_id: u64,
}

struct Inner {
    config: ArcSwap<PoolConfig>,
    idle: Mutex<VecDeque<PooledConnection>>,
    in_use: Mutex<HashMap<u64, InUseEntry>>,
    waiters: Mutex<VecDeque<Waiter>>,
    next_id: AtomicU64,
    next_waiter_id: AtomicU64,
    total_count: AtomicUsize,
    peak_connections: AtomicUsize,
    shutting_down: AtomicBool,
    initialized: AtomicBool,
    acquire_latencies_us: Mutex<VecDeque<u64>>,
}

/// The session-slot pool (spec.md §4.6).
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

/// Borrowed access to a pooled [`Session`], returned to the pool on drop
/// (spec.md §4.6 `release`).
pub struct SessionLease {
    pool: Arc<Inner>,
    client_id: u64,
    conn: Option<PooledConnection>,
    notify_receiver: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl std::ops::Deref for SessionLease {
    type Target = Session;
    fn deref(&self) -> &Session {
        &self.conn.as_ref().expect("session taken").session
    }
}

impl std::ops::DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.conn.as_mut().expect("session taken").session
    }
}

impl SessionLease {
    pub fn id(&self) -> u64 {
        self.conn.as_ref().expect("session taken").id
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Take ownership of this lease's notification receiver (spec.md §5):
    /// the protocol task selects on this alongside socket reads so
    /// `NotificationResponse` frames can be pushed without a cross-session
    /// lock. Panics if called more than once for the same lease.
    pub fn take_notify_receiver(&mut self) -> mpsc::UnboundedReceiver<Bytes> {
        self.notify_receiver
            .take()
            .expect("notify receiver already taken")
    }

    /// Explicit release with ownership validation (spec.md §4.6 `release`);
    /// dropping the lease without calling this does the same thing assuming
    /// the original acquiring client still owns it.
    pub fn release(mut self, client_id: u64) -> Result<(), PoolError> {
        let conn = self.conn.take().expect("session taken");
        self.pool.clone().finish_release(conn, self.client_id, client_id)
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let client_id = self.client_id;
            let _ = self.pool.clone().finish_release(conn, client_id, client_id);
        }
    }
}

fn new_backend_key() -> (i32, i32) {
    let mut rng = rand::rng();
    (rng.random_range(1..i32::MAX), rng.random_range(1..i32::MAX))
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Pool {
            inner: Arc::new(Inner {
                config: ArcSwap::from_pointee(config),
                idle: Mutex::new(VecDeque::new()),
                in_use: Mutex::new(HashMap::new()),
                waiters: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                next_waiter_id: AtomicU64::new(1),
                total_count: AtomicUsize::new(0),
                peak_connections: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                acquire_latencies_us: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Pre-create `min_connections` idle sessions (spec.md §4.6
    /// `initialize`). A second call is an error.
    pub fn initialize(&self) -> Result<(), PoolError> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyInitialized);
        }
        for _ in 0..self.inner.config.load().min_connections {
            let conn = self.new_connection();
            self.inner.idle.lock().push_back(conn);
        }
        Ok(())
    }

    fn new_connection(&self) -> PooledConnection {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (pid, secret) = new_backend_key();
        let (session, _rx) = Session::new_with_push_channel(id, pid, secret);
        let now = Instant::now();
        self.inner.total_count.fetch_add(1, Ordering::Relaxed);
        self.bump_peak();
        PooledConnection {
            id,
            session,
            created_at: now,
            last_used: now,
            last_validated: now,
            usage_count: 0,
        }
    }

    fn bump_peak(&self) {
        let total = self.inner.total_count.load(Ordering::Relaxed);
        self.inner
            .peak_connections
            .fetch_max(total, Ordering::Relaxed);
    }

    /// Current peak connection count across the pool's lifetime (spec.md §8
    /// invariant 8: monotone non-decreasing).
    pub fn peak_connections(&self) -> usize {
        self.inner.peak_connections.load(Ordering::Relaxed)
    }

    pub fn total_count(&self) -> usize {
        self.inner.total_count.load(Ordering::Relaxed)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    pub fn in_use_count(&self) -> usize {
        self.inner.in_use.lock().len()
    }

    fn is_valid(&self, conn: &PooledConnection) -> bool {
        if !conn.session.connected {
            return false;
        }
        let max_age = Duration::from_millis(self.inner.config.load().idle_timeout_ms * 2);
        conn.last_validated.elapsed() < max_age
    }

    /// Acquire a session slot for `client_id`, waiting up to `timeout_ms`
    /// (spec.md §4.6 `acquire`).
    pub async fn acquire(&self, client_id: u64, timeout_ms: u64) -> Result<SessionLease, PoolError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        let start = Instant::now();
        let deadline = Duration::from_millis(timeout_ms);

        loop {
            // (1) try an idle connection, discarding ones that fail validation.
            let candidate = self.inner.idle.lock().pop_front();
            if let Some(conn) = candidate {
                if self.is_valid(&conn) {
                    self.record_latency(start.elapsed());
                    return Ok(self.check_out(conn, client_id));
                }
                self.inner.total_count.fetch_sub(1, Ordering::Relaxed);
                continue;
            }

            // (2) create a new one if under the cap.
            if self.inner.total_count.load(Ordering::Relaxed) < self.inner.config.load().max_connections {
                let conn = self.new_connection();
                self.record_latency(start.elapsed());
                return Ok(self.check_out(conn, client_id));
            }

            // (3) enqueue a waiter with its own deadline.
            let (tx, rx) = oneshot::channel();
            let waiter_id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
            self.inner.waiters.lock().push_back(Waiter {
                id: waiter_id,
                reply: tx,
            });

            let remaining = deadline.saturating_sub(start.elapsed());
            match timeout(remaining, rx).await {
                Ok(Ok(Ok(conn))) => {
                    self.record_latency(start.elapsed());
                    return Ok(self.check_out(conn, client_id));
                }
                Ok(Ok(Err(e))) => return Err(e),
                Ok(Err(_canceled)) => return Err(PoolError::Timeout),
                Err(_elapsed) => {
                    self.inner.waiters.lock().retain(|w| w.id != waiter_id);
                    return Err(PoolError::Timeout);
                }
            }
        }
    }

    fn check_out(&self, mut conn: PooledConnection, client_id: u64) -> SessionLease {
        let notify_receiver = conn.session.rewire_notify_channel();
        self.inner
            .in_use
            .lock()
            .insert(conn.id, InUseEntry { client_id });
        SessionLease {
            pool: self.inner.clone(),
            client_id,
            conn: Some(conn),
            notify_receiver: Some(notify_receiver),
        }
    }

    fn record_latency(&self, elapsed: Duration) {
        let mut window = self.inner.acquire_latencies_us.lock();
        window.push_back(elapsed.as_micros() as u64);
        while window.len() > 100 {
            window.pop_front();
        }
    }

    /// Average of the last 100 acquisition latencies, in microseconds.
    pub fn average_acquire_latency_us(&self) -> u64 {
        let window = self.inner.acquire_latencies_us.lock();
        if window.is_empty() {
            return 0;
        }
        (window.iter().sum::<u64>()) / window.len() as u64
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            total: self.total_count(),
            idle: self.idle_count(),
            in_use: self.in_use_count(),
            peak: self.peak_connections(),
            waiters: self.inner.waiters.lock().len(),
        }
    }

    /// Destroy idle connections whose idle time exceeds `idle_timeout_ms`,
    /// never dropping below `min_connections` (spec.md §4.6 `cleanup`).
    pub fn cleanup(&self) {
        let min = self.inner.config.load().min_connections;
        let idle_timeout = Duration::from_millis(self.inner.config.load().idle_timeout_ms);
        let mut idle = self.inner.idle.lock();
        let mut keep = VecDeque::with_capacity(idle.len());
        while let Some(conn) = idle.pop_front() {
            let total = self.inner.total_count.load(Ordering::Relaxed);
            let would_go_below_min = total.saturating_sub(1) < min;
            if conn.last_used.elapsed() > idle_timeout && !would_go_below_min {
                self.inner.total_count.fetch_sub(1, Ordering::Relaxed);
            } else {
                keep.push_back(conn);
            }
        }
        *idle = keep;
    }

    /// Revalidate idle connections whose `last_validated` is stale, per
    /// spec.md §4.6 `validateIdleConnections`.
    pub fn validate_idle_connections(&self) {
        if !self.inner.config.load().validate_connections {
            return;
        }
        let validation_interval = Duration::from_millis(self.inner.config.load().validation_interval_ms);
        let mut idle = self.inner.idle.lock();
        let mut keep = VecDeque::with_capacity(idle.len());
        while let Some(mut conn) = idle.pop_front() {
            if conn.last_validated.elapsed() > validation_interval {
                if self.is_valid(&conn) {
                    conn.last_validated = Instant::now();
                    keep.push_back(conn);
                } else {
                    self.inner.total_count.fetch_sub(1, Ordering::Relaxed);
                }
            } else {
                keep.push_back(conn);
            }
        }
        *idle = keep;
    }

    /// Hot-swap the pool sizing config, e.g. on a SIGHUP reload (SPEC_FULL.md
    /// §4.7-EXPANDED). Every sizing read goes through [`ArcSwap::load`], so
    /// in-flight `acquire`/`cleanup`/`validate_idle_connections` calls pick
    /// up the new limits on their next read without any lock. The listener
    /// address and already-created connections are unaffected.
    pub fn reload_config(&self, new: PoolConfig) {
        self.inner.config.store(Arc::new(new));
    }

    /// Stop admitting new acquisitions, reject queued waiters, wait up to
    /// `timeout_ms` for in-use sessions to return, then force-destroy
    /// whatever remains (spec.md §4.6 `shutdown`).
    pub async fn shutdown(&self, timeout_ms: u64) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        for waiter in self.inner.waiters.lock().drain(..) {
            let _ = waiter.reply.send(Err(PoolError::ShuttingDown));
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline && self.in_use_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.inner.idle.lock().clear();
        self.inner.in_use.lock().clear();
        self.inner.total_count.store(0, Ordering::SeqCst);
    }
}

impl Inner {
    /// Return a checked-out connection to the pool, validating ownership
    /// (spec.md §4.6 `release`): the releasing `client_id` must match the
    /// client that currently holds `conn.id`.
    fn finish_release(
        self: Arc<Self>,
        mut conn: PooledConnection,
        held_by: u64,
        claimed_by: u64,
    ) -> Result<(), PoolError> {
        let held = self.in_use.lock().remove(&conn.id);
        match held {
            Some(entry) if entry.client_id != claimed_by => {
                // Ownership mismatch: put the entry back, refuse the release.
                self.in_use.lock().insert(conn.id, entry);
                log::warn!(
                    "refusing to release connection {} held by {} on behalf of {}",
                    conn.id,
                    held_by,
                    claimed_by
                );
                return Err(PoolError::OwnershipMismatch(conn.id, claimed_by));
            }
            None => {
                // Already gone (e.g. destroyed during shutdown); nothing to do.
                return Ok(());
            }
            Some(_) => {}
        }

        conn.last_used = Instant::now();
        conn.usage_count += 1;

        if self.shutting_down.load(Ordering::SeqCst) {
            self.total_count.fetch_sub(1, Ordering::Relaxed);
            return Ok(());
        }

        // Hand straight to a waiter if one is queued, otherwise requeue idle
        // (bounded by max_idle_connections) or destroy it.
        loop {
            let next_waiter = self.waiters.lock().pop_front();
            match next_waiter {
                Some(waiter) => match waiter.reply.send(Ok(conn)) {
                    Ok(()) => return Ok(()),
                    Err(Ok(returned)) => {
                        conn = returned;
                        continue;
                    }
                    Err(Err(_)) => unreachable!("we only ever send Ok here"),
                },
                None => break,
            }
        }

        if self.idle.lock().len() < self.config.load().max_idle_connections {
            self.idle.lock().push_back(conn);
        } else {
            self.total_count.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(max: usize) -> PoolConfig {
        PoolConfig {
            min_connections: 0,
            max_connections: max,
            max_idle_connections: 10,
            idle_timeout_ms: 300_000,
            acquisition_timeout_ms: 5_000,
            validate_connections: true,
            validation_interval_ms: 60_000,
            cleanup_interval_ms: 30_000,
        }
    }

    #[tokio::test]
    async fn acquire_and_release_round_trips() {
        let pool = Pool::new(small_config(2));
        let lease = pool.acquire(1, 1000).await.unwrap();
        assert_eq!(pool.in_use_count(), 1);
        drop(lease);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn saturation_queues_then_resolves_on_release() {
        let pool = Pool::new(small_config(2));
        let a = pool.acquire(1, 1000).await.unwrap();
        let b = pool.acquire(2, 1000).await.unwrap();
        assert_eq!(pool.total_count(), 2);
        assert_eq!(pool.peak_connections(), 2);

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.acquire(3, 2000).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(a);

        let c = waiter.await.unwrap().unwrap();
        assert_eq!(c.client_id(), 3);
        assert_eq!(pool.peak_connections(), 2);
        drop(b);
        drop(c);
    }

    #[tokio::test]
    async fn acquire_times_out_when_saturated() {
        let pool = Pool::new(small_config(1));
        let _a = pool.acquire(1, 1000).await.unwrap();
        let err = pool.acquire(2, 50).await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout));
    }

    #[tokio::test]
    async fn release_by_wrong_client_is_rejected() {
        let pool = Pool::new(small_config(2));
        let lease = pool.acquire(1, 1000).await.unwrap();
        let err = lease.release(999).unwrap_err();
        assert!(matches!(err, PoolError::OwnershipMismatch(_, _)));
        assert_eq!(pool.in_use_count(), 1);
    }

    #[tokio::test]
    async fn initialize_twice_is_an_error() {
        let pool = Pool::new(small_config(5));
        pool.initialize().unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert!(pool.initialize().is_err());
    }

    #[tokio::test]
    async fn cleanup_never_drops_below_min_connections() {
        let config = PoolConfig {
            min_connections: 2,
            idle_timeout_ms: 0,
            ..small_config(5)
        };
        let pool = Pool::new(config);
        for _ in 0..3 {
            drop(pool.acquire(1, 1000).await.unwrap());
        }
        assert_eq!(pool.idle_count(), 1);
        pool.cleanup();
        assert!(pool.total_count() >= 2 || pool.idle_count() <= 1);
    }

    #[tokio::test]
    async fn reload_config_changes_max_connections_without_disturbing_existing_sessions() {
        let pool = Pool::new(small_config(1));
        let a = pool.acquire(1, 1000).await.unwrap();
        let err = pool.acquire(2, 50).await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout));

        pool.reload_config(small_config(2));
        let b = pool.acquire(2, 1000).await.unwrap();
        assert_eq!(pool.total_count(), 2);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn shutdown_rejects_waiters_and_clears_state() {
        let pool = Pool::new(small_config(1));
        let a = pool.acquire(1, 1000).await.unwrap();
        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.acquire(2, 2000).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown(100).await;
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, PoolError::ShuttingDown));
        drop(a);
        assert_eq!(pool.total_count(), 0);
    }
}
