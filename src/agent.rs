//! Keep-alive connection pooling shared between requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::connect::{Connection, Target};
use crate::util::lock_unpoisoned;

const DEFAULT_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_FREE_SOCKET_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_idle_per_host: usize,
    /// Pooled sockets idle for longer than this are discarded instead of reused.
    pub free_socket_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            free_socket_timeout: DEFAULT_FREE_SOCKET_TIMEOUT,
        }
    }
}

impl AgentConfig {
    pub fn with_max_idle_per_host(mut self, max_idle_per_host: usize) -> Self {
        self.max_idle_per_host = max_idle_per_host;
        self
    }

    pub fn with_free_socket_timeout(mut self, free_socket_timeout: Duration) -> Self {
        self.free_socket_timeout = free_socket_timeout;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub created: u64,
    pub reused: u64,
    pub idle: usize,
}

struct IdleConnection {
    connection: Connection,
    idle_since: Instant,
}

struct AgentInner {
    config: AgentConfig,
    idle: Mutex<HashMap<Target, Vec<IdleConnection>>>,
    created: AtomicU64,
    reused: AtomicU64,
}

/// Pool of idle HTTP/1 connections keyed by protocol, host and port.
///
/// Cloning is cheap and every clone shares the same pool. The agent only
/// holds connections that are idle; a connection checked out for a request
/// belongs to that request until it is released back or dropped.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent {
    pub fn new() -> Self {
        Self::with_config(AgentConfig::default())
    }

    pub fn with_config(config: AgentConfig) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                config,
                idle: Mutex::new(HashMap::new()),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    pub fn idle_count(&self) -> usize {
        lock_unpoisoned(&self.inner.idle)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Closes every idle connection.
    pub fn close_idle(&self) {
        let drained = std::mem::take(&mut *lock_unpoisoned(&self.inner.idle));
        let closed = drained.values().map(Vec::len).sum::<usize>();
        drop(drained);
        debug!(closed, "closed idle pooled connections");
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            idle: self.idle_count(),
        }
    }

    pub(crate) fn record_created(&self) {
        self.inner.created.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes the most recently released usable connection for `target`.
    pub(crate) fn checkout(&self, target: &Target) -> Option<Connection> {
        let mut discarded = Vec::new();
        let checked_out = {
            let mut idle = lock_unpoisoned(&self.inner.idle);
            let connections = idle.get_mut(target)?;
            let mut checked_out = None;
            while let Some(candidate) = connections.pop() {
                let stale = candidate.idle_since.elapsed() > self.inner.config.free_socket_timeout;
                if stale || !candidate.connection.is_open() {
                    discarded.push(candidate.connection);
                    continue;
                }
                checked_out = Some(candidate.connection);
                break;
            }
            if connections.is_empty() {
                idle.remove(target);
            }
            checked_out
        };

        if !discarded.is_empty() {
            debug!(%target, discarded = discarded.len(), "discarded stale pooled connections");
        }
        if let Some(connection) = &checked_out {
            self.inner.reused.fetch_add(1, Ordering::Relaxed);
            debug!(connection_id = connection.id(), %target, "reusing pooled connection");
        }
        checked_out
    }

    /// Returns a connection to the pool if it can carry another request.
    pub(crate) fn release(&self, connection: Connection) {
        if !connection.is_open() {
            debug!(connection_id = connection.id(), "not pooling closed connection");
            return;
        }
        let target = connection.target().clone();
        let mut idle = lock_unpoisoned(&self.inner.idle);
        let connections = idle.entry(target).or_default();
        if connections.len() >= self.inner.config.max_idle_per_host {
            drop(idle);
            debug!(connection_id = connection.id(), "idle pool full; closing connection");
            return;
        }
        debug!(connection_id = connection.id(), "connection released to pool");
        connections.push(IdleConnection {
            connection,
            idle_since: Instant::now(),
        });
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Agent")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
