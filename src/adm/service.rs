//! Single-owner async front end for [`AdaptiveDifficultyManager`].
//!
//! The controller lives inside one tokio task. Callers talk to it through an
//! ordered command channel, so rounds and arousal updates are applied in the
//! order they were sent. Positions are published through a watch channel and
//! state is checkpointed off the async runtime every few rounds.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::adm::engine::AdaptiveDifficultyManager;
use crate::adm::error::{AdmError, AdmResult};
use crate::adm::types::{NormalizedPositions, PersistedAdmState, RoundMetrics, RoundOutcome, SessionContext};

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Rounds between background checkpoints; 0 disables checkpointing.
    pub checkpoint_interval_rounds: u64,
    pub channel_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval_rounds: 5,
            channel_capacity: 64,
        }
    }
}

enum Command {
    Round {
        metrics: RoundMetrics,
        reply: oneshot::Sender<RoundOutcome>,
    },
    UpdateArousal(f64),
    StartSession {
        duration: Duration,
        initial_arousal: f64,
        reply: oneshot::Sender<SessionContext>,
    },
    Snapshot {
        reply: oneshot::Sender<PersistedAdmState>,
    },
    Shutdown {
        reply: oneshot::Sender<AdmResult<PersistedAdmState>>,
    },
}

pub struct AdmService {
    commands: mpsc::Sender<Command>,
    positions: watch::Receiver<NormalizedPositions>,
    worker: JoinHandle<()>,
}

impl AdmService {
    /// Moves `manager` into a worker task. Must be called inside a tokio runtime.
    pub fn spawn(manager: AdaptiveDifficultyManager, options: ServiceOptions) -> Self {
        let (commands, rx) = mpsc::channel(options.channel_capacity.max(1));
        let (positions_tx, positions) = watch::channel(manager.normalized_positions().clone());
        let worker = tokio::spawn(run_worker(manager, rx, positions_tx, options));
        Self {
            commands,
            positions,
            worker,
        }
    }

    async fn send(&self, command: Command) -> AdmResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AdmError::ServiceClosed)
    }

    pub async fn record_round(&self, metrics: RoundMetrics) -> AdmResult<RoundOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Round { metrics, reply }).await?;
        rx.await.map_err(|_| AdmError::ServiceClosed)
    }

    pub async fn update_arousal(&self, level: f64) -> AdmResult<()> {
        self.send(Command::UpdateArousal(level)).await
    }

    pub async fn start_session(&self, duration: Duration, initial_arousal: f64) -> AdmResult<SessionContext> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartSession {
            duration,
            initial_arousal,
            reply,
        })
        .await?;
        rx.await.map_err(|_| AdmError::ServiceClosed)
    }

    pub async fn snapshot(&self) -> AdmResult<PersistedAdmState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| AdmError::ServiceClosed)
    }

    pub fn current_positions(&self) -> NormalizedPositions {
        self.positions.borrow().clone()
    }

    pub fn subscribe_positions(&self) -> watch::Receiver<NormalizedPositions> {
        self.positions.clone()
    }

    /// Ends the session, performs the final save and waits for the worker to exit.
    pub async fn shutdown(self) -> AdmResult<PersistedAdmState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        let result = rx.await.map_err(|_| AdmError::ServiceClosed)?;
        self.worker.await?;
        result
    }
}

async fn checkpoint(manager: &AdaptiveDifficultyManager) {
    let Some(gateway) = manager.gateway().cloned() else {
        return;
    };
    let snapshot = manager.snapshot();
    let user_id = manager.user_id().to_string();
    match tokio::task::spawn_blocking(move || gateway.save_state(&snapshot, &user_id)).await {
        Ok(Ok(())) => tracing::debug!(round = manager.round_index(), "checkpoint saved"),
        Ok(Err(err)) => tracing::warn!(error = %err, "checkpoint failed"),
        Err(err) => tracing::warn!(error = %err, "checkpoint task failed"),
    }
}

async fn finish(mut manager: AdaptiveDifficultyManager) -> AdmResult<PersistedAdmState> {
    tokio::task::spawn_blocking(move || manager.end_session()).await?
}

async fn run_worker(
    mut manager: AdaptiveDifficultyManager,
    mut rx: mpsc::Receiver<Command>,
    positions: watch::Sender<NormalizedPositions>,
    options: ServiceOptions,
) {
    tracing::info!(user_id = manager.user_id(), "adaptation worker started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::Round { metrics, reply } => {
                let outcome = manager.record_identification_performance(&metrics);
                positions.send_replace(outcome.positions.clone());
                let _ = reply.send(outcome);

                let every = options.checkpoint_interval_rounds;
                if every > 0 && manager.round_index() % every == 0 {
                    checkpoint(&manager).await;
                }
            }
            Command::UpdateArousal(level) => manager.update_arousal(level),
            Command::StartSession {
                duration,
                initial_arousal,
                reply,
            } => {
                let context = manager.start_session(duration, initial_arousal);
                positions.send_replace(manager.normalized_positions().clone());
                let _ = reply.send(context);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(manager.snapshot());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(finish(manager).await);
                tracing::info!("adaptation worker stopped");
                return;
            }
        }
    }

    // every handle dropped without an explicit shutdown
    if let Err(err) = finish(manager).await {
        tracing::warn!(error = %err, "final save failed");
    }
    tracing::info!("adaptation worker stopped");
}
