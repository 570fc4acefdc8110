//! Per-key event log storage.
//!
//! Two stores are provided. [`MemoryStore`] shards logs across a concurrent map
//! and decides under the per-key entry lock. [`ActorStore`] hands every log to
//! a single task that owns the map and answers over a channel.
//!
//! Both keep state in process memory. Several processes each holding their own
//! store will each admit a full window; share one `ratekeeper` service between
//! them when that matters.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::key::RateKey;
use super::window::{Admit, Decision, EventLog, Usage};
use crate::error::{RateKeeperError, Result};

/// Default mailbox size for [`ActorStore`].
const DEFAULT_ACTOR_BUFFER: usize = 1024;

/// Storage for sliding-window event logs.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Prune, check and (on success) record one event, atomically for the key.
    async fn admit(&self, key: &RateKey, req: Admit) -> Result<Decision>;

    /// Report usage inside the window without recording anything.
    async fn peek(&self, key: &RateKey, window_start: i64) -> Result<Usage>;

    /// Forget every event recorded for the key.
    async fn clear(&self, key: &RateKey) -> Result<()>;

    /// Drop events at or before `horizon_start` from every key.
    ///
    /// Returns the number of keys removed because they became empty.
    async fn sweep(&self, horizon_start: i64) -> Result<usize>;

    /// Number of keys currently holding a log.
    async fn len(&self) -> Result<usize>;
}

/// Event logs in a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: DashMap<RateKey, EventLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn admit(&self, key: &RateKey, req: Admit) -> Result<Decision> {
        let (decision, empty) = {
            let mut log = self.logs.entry(key.clone()).or_default();
            let decision = log.try_admit(&req);
            (decision, log.is_empty())
        };

        // A denial against an empty log (zero capacity) should not leave a key behind
        if empty {
            self.logs.remove_if(key, |_, log| log.is_empty());
        }

        Ok(decision)
    }

    async fn peek(&self, key: &RateKey, window_start: i64) -> Result<Usage> {
        Ok(self
            .logs
            .get(key)
            .map(|log| log.usage(window_start))
            .unwrap_or_default())
    }

    async fn clear(&self, key: &RateKey) -> Result<()> {
        self.logs.remove(key);
        Ok(())
    }

    async fn sweep(&self, horizon_start: i64) -> Result<usize> {
        let before = self.logs.len();
        self.logs.retain(|_, log| {
            log.prune(horizon_start);
            !log.is_empty()
        });
        Ok(before.saturating_sub(self.logs.len()))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.logs.len())
    }
}

enum Command {
    Admit {
        key: RateKey,
        req: Admit,
        reply: oneshot::Sender<Decision>,
    },
    Peek {
        key: RateKey,
        window_start: i64,
        reply: oneshot::Sender<Usage>,
    },
    Clear {
        key: RateKey,
        reply: oneshot::Sender<()>,
    },
    Sweep {
        horizon_start: i64,
        reply: oneshot::Sender<usize>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}

/// Event logs owned by a single task.
///
/// Handles are cheap to clone. The owning task exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct ActorStore {
    tx: mpsc::Sender<Command>,
}

impl ActorStore {
    /// Spawn the owning task on the current tokio runtime.
    pub fn spawn() -> Self {
        Self::spawn_with_buffer(DEFAULT_ACTOR_BUFFER)
    }

    pub fn spawn_with_buffer(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(run_actor(rx));
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| RateKeeperError::StoreUnavailable)?;
        rx.await.map_err(|_| RateKeeperError::StoreUnavailable)
    }
}

async fn run_actor(mut rx: mpsc::Receiver<Command>) {
    let mut logs: HashMap<RateKey, EventLog> = HashMap::new();
    debug!("Actor store started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::Admit { key, req, reply } => {
                let decision = match logs.get_mut(&key) {
                    Some(log) => log.try_admit(&req),
                    None => {
                        let mut log = EventLog::new();
                        let decision = log.try_admit(&req);
                        if !log.is_empty() {
                            logs.insert(key, log);
                        }
                        decision
                    }
                };
                let _ = reply.send(decision);
            }
            Command::Peek {
                key,
                window_start,
                reply,
            } => {
                let usage = logs
                    .get(&key)
                    .map(|log| log.usage(window_start))
                    .unwrap_or_default();
                let _ = reply.send(usage);
            }
            Command::Clear { key, reply } => {
                logs.remove(&key);
                let _ = reply.send(());
            }
            Command::Sweep {
                horizon_start,
                reply,
            } => {
                let before = logs.len();
                logs.retain(|_, log| {
                    log.prune(horizon_start);
                    !log.is_empty()
                });
                let removed = before - logs.len();
                trace!(removed = removed, "Actor store swept");
                let _ = reply.send(removed);
            }
            Command::Len { reply } => {
                let _ = reply.send(logs.len());
            }
        }
    }

    debug!("Actor store stopped");
}

#[async_trait]
impl RateStore for ActorStore {
    async fn admit(&self, key: &RateKey, req: Admit) -> Result<Decision> {
        let key = key.clone();
        self.request(|reply| Command::Admit { key, req, reply }).await
    }

    async fn peek(&self, key: &RateKey, window_start: i64) -> Result<Usage> {
        let key = key.clone();
        self.request(|reply| Command::Peek {
            key,
            window_start,
            reply,
        })
        .await
    }

    async fn clear(&self, key: &RateKey) -> Result<()> {
        let key = key.clone();
        self.request(|reply| Command::Clear { key, reply }).await
    }

    async fn sweep(&self, horizon_start: i64) -> Result<usize> {
        self.request(|reply| Command::Sweep {
            horizon_start,
            reply,
        })
        .await
    }

    async fn len(&self) -> Result<usize> {
        self.request(|reply| Command::Len { reply }).await
    }
}
