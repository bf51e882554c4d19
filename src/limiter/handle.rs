//! Control handle for a running limiter actor.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use uuid::Uuid;

use super::actor::{Command, LimiterState, Token};
use super::config::LimiterConfig;
use crate::error::{RatekeeperError, Result};

/// Outcome of an acquire attempt.
///
/// Running out of budget is an expected result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// A token was received within the budget
    Granted,
    /// The budget elapsed before a token was emitted
    Exhausted,
}

/// Cloneable handle to a started `TokenLimiter`.
///
/// Every operation is a message to the actor; the handle never touches the
/// limiter's configuration or timer directly.
#[derive(Debug, Clone)]
pub struct LimiterHandle {
    instance_id: Uuid,
    name: String,
    started_at: DateTime<Utc>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LimiterState>,
}

impl LimiterHandle {
    pub(crate) fn new(
        instance_id: Uuid,
        name: String,
        started_at: DateTime<Utc>,
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<LimiterState>,
    ) -> Self {
        Self {
            instance_id,
            name,
            started_at,
            commands,
            state,
        }
    }

    /// Identity of this actor instance; a replacement always gets a new one.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Name the limiter was started with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the control loop was spawned.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current lifecycle state of the actor.
    pub fn state(&self) -> LimiterState {
        *self.state.borrow()
    }

    /// Wait for the actor to reach `ShutDown`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // An error means the actor is gone, which is the same outcome.
        let _ = state.wait_for(|s| *s == LimiterState::ShutDown).await;
    }

    /// Wait up to `budget` for the next token.
    pub async fn acquire(&self, budget: Duration) -> Result<Acquisition> {
        let (tx, mut rx) = oneshot::channel::<Token>();
        self.send(Command::Acquire(tx))?;

        match time::timeout(budget, &mut rx).await {
            Ok(Ok(_token)) => Ok(Acquisition::Granted),
            Ok(Err(_)) => Err(self.unavailable()),
            Err(_) => {
                // A token sent after the deadline is kept rather than lost.
                // Closing first makes any later send hand it back to the actor.
                rx.close();
                match rx.try_recv() {
                    Ok(_token) => Ok(Acquisition::Granted),
                    Err(_) => Ok(Acquisition::Exhausted),
                }
            }
        }
    }

    /// Ask the actor for its current configuration.
    pub async fn query_config(&self) -> Result<LimiterConfig> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Query(tx))?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// Queue a reconfiguration; applied as the actor's next event.
    pub fn request_update(&self, config: LimiterConfig) -> Result<()> {
        config.validate()?;
        self.send(Command::Update(config))
    }

    /// Signal the actor to stop after its current event.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> RatekeeperError {
        RatekeeperError::Unavailable(self.name.clone())
    }
}
