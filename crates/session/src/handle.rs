use crate::commands::{SessionCommand, SessionConfig, SessionStatus};
use anyhow::Result;
use tokio::sync::{mpsc, oneshot, watch};

/// Cloneable handle to one session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    status_rx: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Wraps the command sender and status watch.
    #[must_use]
    pub fn new(tx: mpsc::Sender<SessionCommand>, status_rx: watch::Receiver<SessionStatus>) -> Self {
        Self { tx, status_rx }
    }

    /// Starts the session loop.
    ///
    /// # Errors
    /// Fails when the actor is gone.
    pub async fn start(&self) -> Result<()> {
        self.tx.send(SessionCommand::Start).await?;
        Ok(())
    }

    /// Stops signal processing (the actor stays alive).
    ///
    /// # Errors
    /// Fails when the actor is gone.
    pub async fn stop(&self) -> Result<()> {
        self.tx.send(SessionCommand::Stop).await?;
        Ok(())
    }

    /// Swaps the session configuration.
    ///
    /// # Errors
    /// Fails when the actor is gone.
    pub async fn update_config(&self, config: SessionConfig) -> Result<()> {
        self.tx
            .send(SessionCommand::UpdateConfig(Box::new(config)))
            .await?;
        Ok(())
    }

    /// Round-trips a status query through the actor.
    ///
    /// # Errors
    /// Fails when the actor is gone.
    pub async fn status(&self) -> Result<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionCommand::GetStatus(tx)).await?;
        Ok(rx.await?)
    }

    /// Last published status without a round trip.
    #[must_use]
    pub fn latest_status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    /// Shuts the actor down.
    ///
    /// # Errors
    /// Fails when the actor is already gone.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(SessionCommand::Shutdown).await?;
        Ok(())
    }
}
