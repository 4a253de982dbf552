// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded session pool.
//!
//! Owns every session opened against the store. A caller checks a session
//! out with [`SessionPool::acquire`] and gets a [`PooledSession`] guard that
//! puts it back on drop, so each successful acquire is paired with exactly
//! one release.
//!
//! # Lifecycle
//! - `open`: connect one probe session (endpoints tried in order), kept idle
//! - `acquire`: reuse an idle session, open a new one while under
//!   `max_size`, otherwise wait up to `wait_timeout`
//! - `close`: wake waiters with `PoolClosed`, close idle sessions, wait for
//!   checked-out sessions to come back and close them as they do
//!
//! Sessions are returned as-is after a failed insert; the pool never judges
//! session health.

use crate::client::{ClientError, Credentials, SessionConnector, StoreSession};
use crate::error::SinkError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default number of sessions.
pub const DEFAULT_POOL_SIZE: usize = 3;

/// Default time an idle session is kept before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default bound on waiting for a free session.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Pool settings. Immutable once the pool is open.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Store endpoints as `host:port`.
    pub node_urls: Vec<String>,
    pub credentials: Credentials,
    /// Upper bound on sessions, idle and checked out together.
    pub max_size: usize,
    pub idle_timeout: Duration,
    pub wait_timeout: Duration,
}

impl PoolConfig {
    pub fn new(node_urls: Vec<String>, credentials: Credentials) -> Self {
        Self {
            node_urls,
            credentials,
            max_size: DEFAULT_POOL_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Validate pool settings.
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.node_urls.is_empty() {
            return Err(SinkError::Configuration(
                "at least one node URL is required".to_string(),
            ));
        }
        for url in &self.node_urls {
            validate_endpoint(url)?;
        }
        if self.max_size == 0 {
            return Err(SinkError::Configuration(
                "pool size must be at least 1".to_string(),
            ));
        }
        if self.credentials.user.is_empty() {
            return Err(SinkError::Configuration("user must not be empty".to_string()));
        }
        Ok(())
    }
}

fn validate_endpoint(url: &str) -> Result<(), SinkError> {
    let invalid = |reason: &str| {
        SinkError::Configuration(format!("invalid node URL '{}': {}", url, reason))
    };
    let (host, port) = url.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    port.parse::<u16>().map_err(|_| invalid("bad port"))?;
    Ok(())
}

struct IdleSession<S> {
    session: S,
    since: Instant,
}

struct PoolState<S> {
    /// Oldest first; reuse takes from the back.
    idle: VecDeque<IdleSession<S>>,
    /// Checked out, or being connected.
    outstanding: usize,
    closed: bool,
}

/// Bounded pool of store sessions.
pub struct SessionPool<C: SessionConnector> {
    config: PoolConfig,
    connector: C,
    state: Mutex<PoolState<C::Session>>,
    available: Condvar,
    next_endpoint: AtomicUsize,
}

impl<C: SessionConnector> SessionPool<C> {
    /// Validate `config` and connect the first session.
    ///
    /// Fails with [`SinkError::Connection`] if no endpoint accepts a session.
    pub fn open(config: PoolConfig, connector: C) -> Result<Self, SinkError> {
        config.validate()?;

        let mut failures = Vec::new();
        let mut probe = None;
        for (index, endpoint) in config.node_urls.iter().enumerate() {
            match connector.connect(endpoint, &config.credentials) {
                Ok(session) => {
                    probe = Some((index, session));
                    break;
                }
                Err(e) => {
                    warn!("Endpoint {} unavailable: {}", endpoint, e);
                    failures.push(e.to_string());
                }
            }
        }

        let (index, session) = probe.ok_or_else(|| {
            SinkError::Connection(format!(
                "no reachable endpoint among [{}]: {}",
                config.node_urls.join(", "),
                failures.join("; ")
            ))
        })?;

        info!(
            "Session pool open: endpoint={} max_size={}",
            session.endpoint(),
            config.max_size
        );

        let mut idle = VecDeque::with_capacity(config.max_size);
        idle.push_back(IdleSession {
            session,
            since: Instant::now(),
        });

        Ok(Self {
            next_endpoint: AtomicUsize::new(index + 1),
            config,
            connector,
            state: Mutex::new(PoolState {
                idle,
                outstanding: 0,
                closed: false,
            }),
            available: Condvar::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check a session out.
    ///
    /// Blocks at most `wait_timeout` when the pool is at capacity.
    pub fn acquire(&self) -> Result<PooledSession<'_, C>, SinkError> {
        let deadline = Instant::now() + self.config.wait_timeout;
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(SinkError::PoolClosed);
            }

            let expired = take_expired(&mut state, self.config.idle_timeout);
            if !expired.is_empty() {
                MutexGuard::unlocked(&mut state, || {
                    for session in expired {
                        self.close_session(session);
                    }
                });
                continue;
            }

            if let Some(idle) = state.idle.pop_back() {
                state.outstanding += 1;
                return Ok(PooledSession::new(self, idle.session));
            }

            if state.outstanding + state.idle.len() < self.config.max_size {
                state.outstanding += 1;
                drop(state);
                return match self.connect_next() {
                    Ok(session) => Ok(PooledSession::new(self, session)),
                    Err(e) => {
                        self.state.lock().outstanding -= 1;
                        self.available.notify_all();
                        Err(SinkError::Connection(e.to_string()))
                    }
                };
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                if state.closed {
                    return Err(SinkError::PoolClosed);
                }
                let at_capacity =
                    state.outstanding + state.idle.len() >= self.config.max_size;
                if state.idle.is_empty() && at_capacity {
                    return Err(SinkError::PoolExhausted(self.config.wait_timeout));
                }
            }
        }
    }

    /// Return a session. After close the session is closed instead.
    fn release(&self, session: C::Session) {
        let mut state = self.state.lock();
        state.outstanding -= 1;

        if state.closed {
            drop(state);
            self.close_session(session);
            self.available.notify_all();
            return;
        }

        state.idle.push_back(IdleSession {
            session,
            since: Instant::now(),
        });
        drop(state);
        self.available.notify_one();
    }

    /// Close the pool. Idempotent; never fails.
    pub fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.available.notify_all();

        for entry in idle {
            self.close_session(entry.session);
        }

        let deadline = Instant::now() + self.config.wait_timeout;
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            if self.available.wait_until(&mut state, deadline).timed_out() {
                warn!(
                    "Session pool closed with {} session(s) still checked out",
                    state.outstanding
                );
                break;
            }
        }
        info!("Session pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Sessions waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Sessions currently checked out.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Open a session, starting from the next endpoint in rotation.
    fn connect_next(&self) -> Result<C::Session, ClientError> {
        let urls = &self.config.node_urls;
        let start = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        let mut last_err = None;

        for offset in 0..urls.len() {
            let endpoint = &urls[(start + offset) % urls.len()];
            match self.connector.connect(endpoint, &self.config.credentials) {
                Ok(session) => {
                    debug!("Opened session to {}", endpoint);
                    return Ok(session);
                }
                Err(e) => {
                    warn!("Endpoint {} unavailable: {}", endpoint, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ClientError::Unreachable {
            endpoint: String::new(),
            reason: "no endpoints configured".to_string(),
        }))
    }

    fn close_session(&self, mut session: C::Session) {
        let endpoint = session.endpoint().to_string();
        match session.close() {
            Ok(()) => debug!("Closed session to {}", endpoint),
            Err(e) => warn!("Failed to close session to {}: {}", endpoint, e),
        }
    }
}

impl<C: SessionConnector> Drop for SessionPool<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn take_expired<S>(state: &mut PoolState<S>, idle_timeout: Duration) -> Vec<S> {
    let mut expired = Vec::new();
    while state
        .idle
        .front()
        .is_some_and(|entry| entry.since.elapsed() >= idle_timeout)
    {
        if let Some(entry) = state.idle.pop_front() {
            expired.push(entry.session);
        }
    }
    expired
}

/// A checked-out session. Returned to the pool on drop.
pub struct PooledSession<'a, C: SessionConnector> {
    pool: &'a SessionPool<C>,
    session: Option<C::Session>,
}

impl<'a, C: SessionConnector> PooledSession<'a, C> {
    fn new(pool: &'a SessionPool<C>, session: C::Session) -> Self {
        Self {
            pool,
            session: Some(session),
        }
    }
}

impl<C: SessionConnector> Deref for PooledSession<'_, C> {
    type Target = C::Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref().expect("session present until drop")
    }
}

impl<C: SessionConnector> DerefMut for PooledSession<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut().expect("session present until drop")
    }
}

impl<C: SessionConnector> Drop for PooledSession<'_, C> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use std::sync::Arc;
    use std::thread;

    fn config(max_size: usize) -> PoolConfig {
        let mut cfg = PoolConfig::new(
            vec!["127.0.0.1:6667".to_string()],
            Credentials::new("root", "root"),
        );
        cfg.max_size = max_size;
        cfg.wait_timeout = Duration::from_millis(200);
        cfg
    }

    #[test]
    fn test_open_keeps_probe_session_idle() {
        let connector = MemoryConnector::new();
        let pool = SessionPool::open(config(3), connector.clone()).expect("open");
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(connector.sessions_opened(), 1);

        {
            let _s = pool.acquire().expect("acquire");
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(connector.sessions_opened(), 1);
    }

    #[test]
    fn test_open_falls_through_to_reachable_endpoint() {
        let connector = MemoryConnector::new();
        connector.set_unreachable("10.0.0.1:6667", true);
        let mut cfg = config(2);
        cfg.node_urls = vec!["10.0.0.1:6667".into(), "10.0.0.2:6667".into()];

        let pool = SessionPool::open(cfg, connector).expect("open");
        let session = pool.acquire().expect("acquire");
        assert_eq!(session.endpoint(), "10.0.0.2:6667");
    }

    #[test]
    fn test_open_fails_when_nothing_reachable() {
        let connector = MemoryConnector::new();
        connector.set_unreachable("127.0.0.1:6667", true);
        match SessionPool::open(config(1), connector) {
            Err(SinkError::Connection(msg)) => assert!(msg.contains("127.0.0.1:6667")),
            Err(e) => panic!("expected Connection error, got {:?}", e),
            Ok(_) => panic!("expected Connection error, pool opened"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let mut cfg = config(1);
        cfg.node_urls = vec!["localhost".into()];
        assert!(matches!(cfg.validate(), Err(SinkError::Configuration(_))));

        let mut cfg = config(1);
        cfg.node_urls = vec!["localhost:http".into()];
        assert!(matches!(cfg.validate(), Err(SinkError::Configuration(_))));

        let mut cfg = config(1);
        cfg.max_size = 0;
        assert!(matches!(cfg.validate(), Err(SinkError::Configuration(_))));

        let empty = PoolConfig::new(vec![], Credentials::new("u", "p"));
        assert!(matches!(empty.validate(), Err(SinkError::Configuration(_))));
        assert!(config(1).validate().is_ok());
    }

    #[test]
    fn test_exhausted_after_wait_timeout() {
        let pool = SessionPool::open(config(1), MemoryConnector::new()).expect("open");
        let _held = pool.acquire().expect("acquire");

        let start = Instant::now();
        match pool.acquire() {
            Err(SinkError::PoolExhausted(waited)) => assert_eq!(waited, Duration::from_millis(200)),
            Err(e) => panic!("expected PoolExhausted, got {:?}", e),
            Ok(_) => panic!("expected PoolExhausted, got a session"),
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_waiter_gets_released_session() {
        let pool = Arc::new(SessionPool::open(config(1), MemoryConnector::new()).expect("open"));
        let held = pool.acquire().expect("acquire");

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire().map(|_| ()).is_ok())
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().expect("join"));
    }

    #[test]
    fn test_grows_to_max_size_then_reuses() {
        let connector = MemoryConnector::new();
        let pool = SessionPool::open(config(2), connector.clone()).expect("open");

        let a = pool.acquire().expect("a");
        let b = pool.acquire().expect("b");
        assert_eq!(connector.sessions_opened(), 2);
        drop(a);
        drop(b);

        for _ in 0..5 {
            let _s = pool.acquire().expect("reuse");
        }
        assert_eq!(connector.sessions_opened(), 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_expired_idle_sessions_are_closed() {
        let connector = MemoryConnector::new();
        let mut cfg = config(2);
        cfg.idle_timeout = Duration::from_millis(20);
        let pool = SessionPool::open(cfg, connector.clone()).expect("open");

        thread::sleep(Duration::from_millis(40));
        let _s = pool.acquire().expect("acquire");

        assert_eq!(connector.sessions_closed(), 1);
        assert_eq!(connector.sessions_opened(), 2);
    }

    #[test]
    fn test_close_wakes_waiters_with_pool_closed() {
        let mut cfg = config(1);
        cfg.wait_timeout = Duration::from_secs(5);
        let pool = Arc::new(SessionPool::open(cfg, MemoryConnector::new()).expect("open"));
        let held = pool.acquire().expect("acquire");

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || matches!(pool.acquire(), Err(SinkError::PoolClosed)))
        };
        thread::sleep(Duration::from_millis(50));

        let closer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.close())
        };
        assert!(waiter.join().expect("join waiter"));

        drop(held);
        closer.join().expect("join closer");
        assert!(pool.is_closed());
    }

    #[test]
    fn test_close_is_idempotent_and_closes_everything() {
        let connector = MemoryConnector::new();
        let pool = SessionPool::open(config(2), connector.clone()).expect("open");
        {
            let _a = pool.acquire().expect("a");
            let _b = pool.acquire().expect("b");
        }

        pool.close();
        pool.close();

        assert_eq!(connector.open_sessions(), 0);
        assert!(matches!(pool.acquire(), Err(SinkError::PoolClosed)));
    }
}
