//! Registry of live session actors.

use crate::actor::SessionActor;
use crate::commands::{SessionConfig, SessionStatus};
use crate::handle::SessionHandle;
use crate::strategy::{ActionExecutor, SessionEvent, Strategy};
use anyhow::Result;
use polytrade_arbitrage::rebalancer::RebalancerConfig;
use polytrade_core::JsonStore;
use polytrade_exchange::price_cache::PriceCache;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{error, info};

/// Owns every running session and the channels into them.
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    books: PriceCache,
    actions: Arc<dyn ActionExecutor>,
    rebalancer_config: RebalancerConfig,
    /// Session state files live here; `None` keeps state in memory.
    state_dir: Option<PathBuf>,
    pause_probe: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

struct SessionEntry {
    handle: SessionHandle,
    events: mpsc::Sender<SessionEvent>,
    yes_asset_id: String,
    no_asset_id: String,
}

impl SessionRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(
        books: PriceCache,
        actions: Arc<dyn ActionExecutor>,
        rebalancer_config: RebalancerConfig,
        state_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            books,
            actions,
            rebalancer_config,
            state_dir,
            pause_probe: None,
        }
    }

    /// Wires the quote-pause probe handed to every spawned actor.
    #[must_use]
    pub fn with_pause_probe(mut self, probe: Arc<dyn Fn() -> bool + Send + Sync>) -> Self {
        self.pause_probe = Some(probe);
        self
    }

    /// Spawns a session actor for `config` running `strategy`.
    ///
    /// # Errors
    /// Fails when a session with the same id already exists.
    pub async fn spawn_session(
        &self,
        config: SessionConfig,
        strategy: Box<dyn Strategy>,
    ) -> Result<SessionHandle> {
        let session_id = config.session_id.clone();
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(&session_id) {
                anyhow::bail!("session {session_id} already exists");
            }
        }

        let store = match &self.state_dir {
            Some(dir) => JsonStore::with_path(dir.join(format!("session-{session_id}.json"))),
            None => JsonStore::in_memory(),
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(512);
        let (status_tx, status_rx) = watch::channel(SessionStatus::initial(&config));

        let entry = SessionEntry {
            handle: SessionHandle::new(cmd_tx, status_rx),
            events: event_tx,
            yes_asset_id: config.yes_asset_id.clone(),
            no_asset_id: config.no_asset_id.clone(),
        };

        let mut actor = SessionActor::new(
            config,
            strategy,
            self.actions.clone(),
            self.books.clone(),
            self.rebalancer_config,
            cmd_rx,
            event_rx,
            status_tx,
            store,
        );
        if let Some(probe) = &self.pause_probe {
            actor = actor.with_pause_probe(probe.clone());
        }
        let task_id = session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = actor.run().await {
                error!(session = %task_id, error = %e, "session actor failed");
            }
        });

        let handle = entry.handle.clone();
        self.sessions.write().await.insert(session_id.clone(), entry);
        info!(session = %session_id, "session spawned");
        Ok(handle)
    }

    /// Handle for one session.
    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|e| e.handle.clone())
    }

    /// Ids of every live session.
    pub async fn list(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Routes a book update to every session watching `asset_id`.
    pub async fn route_book_update(&self, asset_id: &str) {
        let sessions = self.sessions.read().await;
        for entry in sessions.values() {
            if entry.yes_asset_id == asset_id || entry.no_asset_id == asset_id {
                let _ = entry
                    .events
                    .try_send(SessionEvent::BookUpdate {
                        asset_id: asset_id.to_string(),
                    });
            }
        }
    }

    /// Shuts one session down and removes it.
    ///
    /// # Errors
    /// Fails when the session does not exist.
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| anyhow::anyhow!("session {session_id} not found"))?;
        entry.handle.shutdown().await?;
        Ok(())
    }

    /// Shuts every session down.
    pub async fn shutdown_all(&self) {
        let entries: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, e)| e.handle).collect()
        };
        for handle in entries {
            let _ = handle.shutdown().await;
        }
    }
}
