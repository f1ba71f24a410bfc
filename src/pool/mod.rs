//! Connection Pool
//!
//! A bounded set of reusable database sessions shared by concurrent queries.
//!
//! ## Design
//!
//! ```text
//! Pool (cheap to clone, one per process or per test)
//! ├── Semaphore      → at most max_size sessions checked out or being opened
//! ├── Idle queue     → parking_lot::Mutex<VecDeque<IdleSession>>, LIFO reuse
//! └── SessionManager → opens new sessions on demand
//! ```
//!
//! `acquire` waits for a permit up to the acquisition timeout and then fails
//! with [`PoolError::Exhausted`]. The returned [`PooledSession`] gives the
//! session back when dropped, so every exit path releases it. Sessions are
//! checked lazily: a session marked for discard, or one that reports itself
//! broken, is closed instead of being reused.

pub mod postgres;

use crate::config::PoolConfig;
use crate::error::DbError;
use crate::outcome::{Column, Row};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

pub use postgres::{PgManager, PgSession};

/// Rows and column descriptions produced by one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// A live database session
#[async_trait]
pub trait Session: Send + 'static {
    /// Drop whatever session state an earlier checkout left behind, then
    /// bound every later statement on this session by `statement_timeout`.
    async fn reset(&mut self, statement_timeout: Duration) -> Result<(), DbError>;

    /// Run one statement and read all of its rows.
    async fn query(&mut self, sql: &str) -> Result<ResultSet, DbError>;

    /// True once the session can no longer be used.
    fn is_broken(&self) -> bool;
}

/// Opens new sessions for a [`Pool`]
#[async_trait]
pub trait SessionManager: Send + Sync + 'static {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, DbError>;
}

/// Failure to obtain a session
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("Pool exhausted: all {max_size} sessions busy after waiting {waited_ms}ms")]
    Exhausted { max_size: usize, waited_ms: u64 },

    #[error("Pool is closed")]
    Closed,

    #[error("Failed to open session: {0}")]
    Connect(DbError),
}

/// Sizing and wait bounds
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    /// Idle sessions older than this are closed on the next acquire
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolOptions {
    fn from(config: &PoolConfig) -> Self {
        PoolOptions {
            max_size: config.max_size,
            acquire_timeout: config.acquire_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Point-in-time view of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub opened: u64,
    pub discarded: u64,
    pub exhausted: u64,
}

struct IdleSession<S> {
    session: S,
    since: Instant,
}

struct PoolInner<M: SessionManager> {
    manager: M,
    idle: Mutex<VecDeque<IdleSession<M::Session>>>,
    permits: Arc<Semaphore>,
    options: PoolOptions,
    closed: AtomicBool,
    opened: AtomicU64,
    discarded: AtomicU64,
    exhausted: AtomicU64,
}

impl<M: SessionManager> PoolInner<M> {
    fn take_idle(&self) -> Option<M::Session> {
        let mut idle = self.idle.lock();
        while let Some(entry) = idle.pop_back() {
            let expired = self
                .options
                .idle_timeout
                .is_some_and(|limit| entry.since.elapsed() > limit);
            if expired || entry.session.is_broken() {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            return Some(entry.session);
        }
        None
    }

    fn give_back(&self, session: M::Session, discard: bool) {
        if discard || session.is_broken() || self.closed.load(Ordering::Acquire) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(discard, "pool_session_discarded");
            return;
        }
        self.idle.lock().push_back(IdleSession {
            session,
            since: Instant::now(),
        });
    }
}

/// Bounded session pool. Clones share the same sessions.
pub struct Pool<M: SessionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: SessionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: SessionManager> Pool<M> {
    pub fn new(manager: M, options: PoolOptions) -> Self {
        let options = PoolOptions {
            max_size: options.max_size.max(1),
            ..options
        };
        Pool {
            inner: Arc::new(PoolInner {
                manager,
                idle: Mutex::new(VecDeque::with_capacity(options.max_size)),
                permits: Arc::new(Semaphore::new(options.max_size)),
                options,
                closed: AtomicBool::new(false),
                opened: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
            }),
        }
    }

    pub fn options(&self) -> PoolOptions {
        self.inner.options
    }

    /// Check out a session, waiting up to the acquisition timeout for one to
    /// become free.
    pub async fn acquire(&self) -> Result<PooledSession<M>, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let started = Instant::now();
        let wait = self.inner.options.acquire_timeout;
        let permit = match tokio::time::timeout(
            wait,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(
                    max_size = self.inner.options.max_size,
                    waited_ms, "pool_exhausted"
                );
                return Err(PoolError::Exhausted {
                    max_size: self.inner.options.max_size,
                    waited_ms,
                });
            }
        };

        let session = match self.inner.take_idle() {
            Some(session) => session,
            None => {
                let session = self
                    .inner
                    .manager
                    .connect()
                    .await
                    .map_err(PoolError::Connect)?;
                self.inner.opened.fetch_add(1, Ordering::Relaxed);
                debug!("pool_session_opened");
                session
            }
        };

        Ok(PooledSession {
            session: Some(session),
            pool: Arc::clone(&self.inner),
            discard: false,
            _permit: permit,
        })
    }

    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        PoolStatus {
            max_size: inner.options.max_size,
            idle: inner.idle.lock().len(),
            in_use: inner
                .options
                .max_size
                .saturating_sub(inner.permits.available_permits()),
            opened: inner.opened.load(Ordering::Relaxed),
            discarded: inner.discarded.load(Ordering::Relaxed),
            exhausted: inner.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out sessions and close the idle ones. Sessions still
    /// checked out are closed when released.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        self.inner.idle.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// A checked-out session. Returned to the pool (or closed, if discarded or
/// broken) when dropped.
pub struct PooledSession<M: SessionManager> {
    session: Option<M::Session>,
    pool: Arc<PoolInner<M>>,
    discard: bool,
    // Released after `Drop::drop` has put the session back
    _permit: OwnedSemaphorePermit,
}

impl<M: SessionManager> PooledSession<M> {
    /// Close this session on release instead of reusing it.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    pub fn release(self) {}
}

impl<M: SessionManager> Deref for PooledSession<M> {
    type Target = M::Session;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &M::Session {
        // Only `Drop` takes the session out
        self.session.as_ref().expect("session present until drop")
    }
}

impl<M: SessionManager> DerefMut for PooledSession<M> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut M::Session {
        self.session.as_mut().expect("session present until drop")
    }
}

impl<M: SessionManager> Drop for PooledSession<M> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.give_back(session, self.discard);
        }
    }
}
