//! The token emission actor.
//!
//! Each `TokenLimiter` runs as its own tokio task and owns its configuration
//! and emission timer exclusively. Other components talk to it only through a
//! [`LimiterHandle`], which turns each operation into a [`Command`] delivered
//! over the actor's queue. Commands and timer fires are processed strictly one
//! at a time, so the actor needs no internal locking.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::config::LimiterConfig;
use super::handle::LimiterHandle;
use crate::error::Result;

/// A unit of permission handed to exactly one acquirer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token;

/// Lifecycle of a limiter actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterState {
    /// Configured, control loop not yet started
    Created,
    /// Control loop is processing events
    Running,
    /// Control loop has exited; terminal
    ShutDown,
}

/// Messages understood by the actor's control loop.
#[derive(Debug)]
pub(crate) enum Command {
    Acquire(oneshot::Sender<Token>),
    Update(LimiterConfig),
    Query(oneshot::Sender<LimiterConfig>),
    Shutdown,
}

/// A single limiter that emits one token per `interval / count`.
pub struct TokenLimiter {
    instance_id: Uuid,
    config: LimiterConfig,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<LimiterState>,
}

impl TokenLimiter {
    /// Create a limiter in the `Created` state.
    ///
    /// Fails with `InvalidConfig` if the rate parameters are not positive.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        config.validate()?;

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LimiterState::Created);

        Ok(Self {
            instance_id: Uuid::new_v4(),
            config,
            commands_tx,
            commands,
            state,
        })
    }

    /// Name from the initial configuration.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LimiterState {
        *self.state.borrow()
    }

    /// Spawn the control loop and return the handle used to drive it.
    ///
    /// Must be called from within a tokio runtime. The loop exits on an
    /// explicit shutdown or once every handle has been dropped.
    pub fn start(self) -> LimiterHandle {
        let handle = LimiterHandle::new(
            self.instance_id,
            self.config.name.clone(),
            Utc::now(),
            self.commands_tx.clone(),
            self.state.subscribe(),
        );

        let control_loop = ControlLoop {
            instance_id: self.instance_id,
            config: self.config,
            commands: self.commands,
            state: self.state,
            unclaimed: None,
            waiters: VecDeque::new(),
        };
        // The handle holds the only remaining senders from here on.
        drop(self.commands_tx);

        tokio::spawn(control_loop.run());
        handle
    }
}

struct ControlLoop {
    instance_id: Uuid,
    config: LimiterConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<LimiterState>,
    /// At most one token waits for a consumer.
    unclaimed: Option<Token>,
    waiters: VecDeque<oneshot::Sender<Token>>,
}

impl ControlLoop {
    async fn run(mut self) {
        self.state.send_replace(LimiterState::Running);
        let mut ticker = emission_ticker(self.config.period());

        info!(
            limiter = %self.config.name,
            instance = %self.instance_id,
            period_ms = self.config.period().as_secs_f64() * 1000.0,
            "Limiter started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Acquire(waiter)) => self.enqueue(waiter),
                    Some(Command::Update(config)) => {
                        // The tick future is already dropped here, so swapping the
                        // timer cannot race a pending fire.
                        ticker = emission_ticker(config.period());
                        debug!(
                            limiter = %config.name,
                            instance = %self.instance_id,
                            interval_ms = config.interval_millis,
                            count = config.count,
                            "Limiter reconfigured"
                        );
                        self.config = config;
                    }
                    Some(Command::Query(reply)) => {
                        let _ = reply.send(self.config.clone());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = ticker.tick() => self.emit(),
            }
        }

        // Dropping queued waiters resolves their acquire calls as unavailable.
        self.waiters.clear();
        self.state.send_replace(LimiterState::ShutDown);
        info!(
            limiter = %self.config.name,
            instance = %self.instance_id,
            "Limiter shut down"
        );
    }

    fn emit(&mut self) {
        if self.unclaimed.is_some() {
            trace!(limiter = %self.config.name, "Previous token unclaimed, skipping emission");
            return;
        }
        if !self.hand_out(Token) {
            self.unclaimed = Some(Token);
        }
    }

    fn enqueue(&mut self, waiter: oneshot::Sender<Token>) {
        if let Some(token) = self.unclaimed.take() {
            match waiter.send(token) {
                Ok(()) => {
                    trace!(limiter = %self.config.name, "Token granted from reserve");
                    return;
                }
                Err(token) => {
                    self.unclaimed = Some(token);
                    return;
                }
            }
        }
        self.waiters.retain(|w| !w.is_closed());
        self.waiters.push_back(waiter);
    }

    /// Give the token to the oldest waiter still listening.
    fn hand_out(&mut self, mut token: Token) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(token) {
                Ok(()) => {
                    trace!(limiter = %self.config.name, "Token granted");
                    return true;
                }
                Err(returned) => token = returned,
            }
        }
        false
    }
}

fn emission_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RatekeeperError;
    use crate::limiter::Acquisition;

    fn config(name: &str, interval_millis: i64, count: i64) -> LimiterConfig {
        LimiterConfig::new(name, interval_millis, count, 0.1).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let invalid = LimiterConfig {
            name: "bad".to_string(),
            interval_millis: 100,
            count: 0,
            precision: 0.0,
        };
        assert!(matches!(
            TokenLimiter::new(invalid),
            Err(RatekeeperError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let limiter = TokenLimiter::new(config("life", 100, 1)).unwrap();
        assert_eq!(limiter.state(), LimiterState::Created);

        let handle = limiter.start();
        handle.query_config().await.unwrap();
        assert_eq!(handle.state(), LimiterState::Running);

        handle.shutdown().unwrap();
        handle.closed().await;
        assert_eq!(handle.state(), LimiterState::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_token() {
        let handle = TokenLimiter::new(config("acquire", 10, 1)).unwrap().start();

        let outcome = handle.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(outcome, Acquisition::Granted);

        handle.shutdown().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_frequency_cap() {
        let handle = TokenLimiter::new(config("freq", 100, 5)).unwrap().start();
        let window_end = Instant::now() + Duration::from_millis(100);

        let mut granted = 0;
        while Instant::now() < window_end {
            let budget = window_end.saturating_duration_since(Instant::now());
            if handle.acquire(budget).await.unwrap() == Acquisition::Granted {
                granted += 1;
            }
        }

        assert!(granted <= 5, "limit exceeded: {} tokens in one interval", granted);
        handle.shutdown().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_spaced_by_period() {
        let handle = TokenLimiter::new(config("spacing", 100, 4)).unwrap().start();

        let mut grants = Vec::new();
        for _ in 0..4 {
            let outcome = handle.acquire(Duration::from_secs(1)).await.unwrap();
            assert_eq!(outcome, Acquisition::Granted);
            grants.push(Instant::now());
        }

        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(25));
        }
        handle.shutdown().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_unclaimed_token() {
        let handle = TokenLimiter::new(config("reserve", 10, 1)).unwrap().start();

        // Ten periods pass with nobody waiting; only one token is held back.
        time::sleep(Duration::from_millis(105)).await;

        assert_eq!(
            handle.acquire(Duration::from_millis(1)).await.unwrap(),
            Acquisition::Granted
        );
        assert_eq!(
            handle.acquire(Duration::from_millis(1)).await.unwrap(),
            Acquisition::Exhausted
        );
        handle.shutdown().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_at_deadline_is_not_lost() {
        let handle = TokenLimiter::new(config("edge", 100, 1)).unwrap().start();

        // The budget runs out on the same instant the first token is emitted.
        let first = handle.acquire(Duration::from_millis(100)).await.unwrap();
        if first == Acquisition::Exhausted {
            assert_eq!(
                handle.acquire(Duration::from_millis(1)).await.unwrap(),
                Acquisition::Granted
            );
        }
        handle.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_zero_budget_never_blocks() {
        let handle = TokenLimiter::new(config("zero", 60_000, 1)).unwrap().start();

        let outcome = handle.acquire(Duration::ZERO).await.unwrap();
        assert_eq!(outcome, Acquisition::Exhausted);
        handle.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_update_applies_to_query() {
        let handle = TokenLimiter::new(config("test", 1, 1)).unwrap().start();
        let update = config("test", 2, 2);

        handle.request_update(update.clone()).unwrap();
        let current = handle.query_config().await.unwrap();

        assert_eq!(current, update);
        handle.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_config() {
        let handle = TokenLimiter::new(config("test", 100, 1)).unwrap().start();
        let mut update = config("test", 100, 1);
        update.count = 0;

        assert!(matches!(
            handle.request_update(update),
            Err(RatekeeperError::InvalidConfig(_))
        ));
        assert_eq!(handle.query_config().await.unwrap().count, 1);
        handle.shutdown().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_changes_period() {
        let handle = TokenLimiter::new(config("r", 100, 1)).unwrap().start();
        handle.request_update(config("r", 100, 5)).unwrap();
        handle.query_config().await.unwrap();

        let window_end = Instant::now() + Duration::from_millis(100);
        let mut granted = 0;
        while Instant::now() < window_end {
            let budget = window_end.saturating_duration_since(Instant::now());
            if handle.acquire(budget).await.unwrap() == Acquisition::Granted {
                granted += 1;
            }
        }

        assert!(granted >= 2, "expected faster emission, got {} tokens", granted);
        handle.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_get_config() {
        let handle = TokenLimiter::new(config("test", 10, 4)).unwrap().start();

        let current = handle.query_config().await.unwrap();
        assert_eq!(current.name, "test");
        assert_eq!(current.count, 4);
        assert_eq!(current.interval_millis, 10);
        handle.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let handle = TokenLimiter::new(config("slow", 60_000, 1)).unwrap().start();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.acquire(Duration::from_secs(30)).await })
        };
        // Let the acquire request reach the actor first.
        handle.query_config().await.unwrap();
        handle.shutdown().unwrap();

        let outcome = time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter hung after shutdown")
            .unwrap();
        assert!(matches!(outcome, Err(RatekeeperError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_are_unavailable() {
        let handle = TokenLimiter::new(config("gone", 100, 1)).unwrap().start();
        handle.shutdown().unwrap();
        handle.closed().await;

        assert!(matches!(
            handle.query_config().await,
            Err(RatekeeperError::Unavailable(_))
        ));
        assert!(matches!(
            handle.acquire(Duration::from_millis(10)).await,
            Err(RatekeeperError::Unavailable(_))
        ));
    }
}
