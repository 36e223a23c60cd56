//! Bounded per-provider connection pool. Representation follows spec §4.2
//! directly: a queue of idle clients plus a counting semaphore of permits,
//! with `idle + active + permits == max` as an always-true invariant.
//!
//! Superseded `deadpool`-shaped version: see DESIGN.md for why this is
//! hand-rolled instead of `deadpool::managed`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::nntp::client::{NntpClient, RekNntpClient};
use crate::nntp::error::PoolError;

const REAP_INTERVAL: Duration = Duration::from_secs(15);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(15);

struct IdleClient {
    client: Box<dyn NntpClient>,
    idle_since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleClient>,
    active: usize,
    closed: bool,
}

/// A client checked out of the pool. Dropping it without calling
/// [`PooledClient::release`] or [`PooledClient::discard`] discards it — this
/// is the "caller cannot forget to release" RAII guard from spec §9.
pub struct PooledClient {
    client: Option<Box<dyn NntpClient>>,
    pool: ConnectionPool,
    settled: bool,
}

impl PooledClient {
    pub fn client_mut(&mut self) -> &mut dyn NntpClient {
        self.client.as_deref_mut().expect("client taken")
    }

    pub async fn release(mut self) {
        let client = self.client.take().expect("client taken");
        self.settled = true;
        self.pool.release(client).await;
    }

    pub async fn discard(mut self) {
        self.client.take();
        self.settled = true;
        self.pool.discard_slot().await;
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if !self.settled {
            if let Some(client) = self.client.take() {
                let pool = self.pool.clone();
                tokio::spawn(async move {
                    pool.release(client).await;
                });
            }
        }
    }
}

#[derive(Clone)]
pub struct ConnectionPool {
    provider: ProviderConfig,
    state: Arc<Mutex<PoolState>>,
    permits: Arc<Semaphore>,
    max: usize,
    reaper_cancel: Arc<CancellationToken>,
}

impl ConnectionPool {
    pub fn new(provider: ProviderConfig) -> Self {
        let max = provider.max_connections.max(1);
        let pool = Self {
            provider,
            state: Arc::new(Mutex::new(PoolState { idle: VecDeque::new(), active: 0, closed: false })),
            permits: Arc::new(Semaphore::new(max)),
            max,
            reaper_cancel: Arc::new(CancellationToken::new()),
        };
        pool.spawn_reaper();
        pool
    }

    pub fn provider_name(&self) -> &str {
        &self.provider.name
    }

    pub fn priority(&self) -> u32 {
        self.provider.priority
    }

    pub fn max_connections(&self) -> usize {
        self.max
    }

    /// `active + idle + permits == max` at all times; exposed for property
    /// tests (spec §8 property 7).
    pub fn capacity_snapshot(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (state.active, state.idle.len(), self.permits.available_permits())
    }

    fn spawn_reaper(&self) {
        let state = self.state.clone();
        let permits = self.permits.clone();
        let cancel = self.reaper_cancel.clone();
        let provider = self.provider.name.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(REAP_INTERVAL) => {}
                }
                let mut reaped = 0;
                {
                    let mut s = state.lock();
                    let now = Instant::now();
                    let before = s.idle.len();
                    s.idle.retain(|c| now.duration_since(c.idle_since) <= IDLE_TIMEOUT);
                    reaped = before - s.idle.len();
                }
                if reaped > 0 {
                    permits.add_permits(reaped);
                    debug!(provider = %provider, reaped, "reaped idle connections");
                }
            }
        });
    }

    /// Pop idle, else dial a fresh client consuming a permit, else block
    /// until either becomes available or `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<PooledClient, PoolError> {
        if self.state.lock().closed {
            return Err(PoolError::ShuttingDown { provider: self.provider.name.clone() });
        }

        if let Some(idle) = self.pop_idle() {
            self.state.lock().active += 1;
            return Ok(self.wrap(idle.client));
        }

        let permit = tokio::select! {
            biased;
            acquired = self.permits.clone().acquire_owned() => acquired.map_err(|_| PoolError::ShuttingDown { provider: self.provider.name.clone() })?,
            _ = cancel.cancelled() => return Err(PoolError::AcquireTimeout { provider: self.provider.name.clone() }),
        };
        permit.forget();

        let mut client: Box<dyn NntpClient> = Box::new(RekNntpClient::new(self.provider.clone()));
        match client.authenticate().await {
            Ok(()) => {
                self.state.lock().active += 1;
                Ok(self.wrap(client))
            }
            Err(e) => {
                self.permits.add_permits(1);
                warn!(provider = %self.provider.name, error = %e, "failed to dial/authenticate");
                Err(PoolError::Nntp(e))
            }
        }
    }

    pub fn try_acquire(&self) -> Option<PooledClient> {
        if self.state.lock().closed {
            return None;
        }
        if let Some(idle) = self.pop_idle() {
            self.state.lock().active += 1;
            return Some(self.wrap(idle.client));
        }
        None
    }

    fn pop_idle(&self) -> Option<IdleClient> {
        self.state.lock().idle.pop_front()
    }

    fn wrap(&self, client: Box<dyn NntpClient>) -> PooledClient {
        PooledClient { client: Some(client), pool: self.clone(), settled: false }
    }

    async fn release(&self, client: Box<dyn NntpClient>) {
        let mut s = self.state.lock();
        s.active = s.active.saturating_sub(1);
        if s.closed {
            self.permits.add_permits(1);
            return;
        }
        s.idle.push_back(IdleClient { client, idle_since: Instant::now() });
    }

    async fn discard_slot(&self) {
        let mut s = self.state.lock();
        s.active = s.active.saturating_sub(1);
        drop(s);
        self.permits.add_permits(1);
    }

    pub async fn validate(&self) -> Result<(), PoolError> {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(VALIDATE_TIMEOUT).await;
            cancel_clone.cancel();
        });
        let client = self.acquire(&cancel).await?;
        client.release().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.reaper_cancel.cancel();
        let mut s = self.state.lock();
        s.closed = true;
        let drained = s.idle.len();
        s.idle.clear();
        drop(s);
        info!(provider = %self.provider.name, drained, "pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, max: usize) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            host: "localhost".to_string(),
            port: 119,
            tls: false,
            username: "u".to_string(),
            password: "p".to_string(),
            max_connections: max,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn capacity_invariant_holds_after_construction() {
        let pool = ConnectionPool::new(provider("p1", 4));
        let (active, idle, permits) = pool.capacity_snapshot();
        assert_eq!(active + idle + permits, 4);
        assert_eq!(permits, 4);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn try_acquire_without_idle_clients_returns_none() {
        let pool = ConnectionPool::new(provider("p2", 2));
        assert!(pool.try_acquire().is_none());
        pool.shutdown().await;
    }
}
