//! Named circuit breaker commands.
//!
//! Each command is a [`CircuitBreaker`] registered process-wide under its
//! name, so every client configured with the same command name shares one
//! circuit and one concurrency budget. Configuring a name again replaces the
//! circuit with a fresh one using the new policy.
//!
//! # Policy
//!
//! A call through a command is rejected when:
//!
//! - the circuit is open (`ClientError::CircuitOpen`)
//! - `max_concurrent_requests` calls are already in flight
//!   (`ClientError::MaxConcurrency`)
//!
//! A call that takes longer than `timeout` fails with
//! `ClientError::CommandTimeout` and counts as a failure.
//!
//! The circuit opens when the rolling window holds at least
//! `request_volume_threshold` outcomes and the share of failures reaches
//! `error_percent_threshold`. Once `sleep_window` has elapsed, an open
//! circuit admits one test call; success closes it and clears its metrics.
//!
//! ```text
//! ┌────────┐  volume >= threshold && errors% >= threshold  ┌──────┐
//! │ Closed │ ────────────────────────────────────────────▶ │ Open │
//! └────────┘                                               └──────┘
//!     ▲                                                       │
//!     │ test call succeeds           sleep_window elapsed     │
//!     └──────────────────────── single test call ◀────────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::ClientError;

/// Length of the rolling window used for health metrics.
const ROLLING_WINDOW: Duration = Duration::from_secs(10);

static COMMANDS: LazyLock<Mutex<HashMap<String, Arc<CircuitBreaker>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Policy for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    /// Maximum duration of a single call.
    ///
    /// Default: 1 second
    pub timeout: Duration,

    /// Maximum number of calls in flight at once.
    ///
    /// Default: 10
    pub max_concurrent_requests: usize,

    /// Minimum number of outcomes in the rolling window before the circuit
    /// may trip.
    ///
    /// Default: 20
    pub request_volume_threshold: usize,

    /// How long an open circuit rejects calls before admitting a test call.
    ///
    /// Default: 5 seconds
    pub sleep_window: Duration,

    /// Failure percentage at which the circuit opens.
    ///
    /// Default: 50
    pub error_percent_threshold: u8,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            max_concurrent_requests: 10,
            request_volume_threshold: 20,
            sleep_window: Duration::from_secs(5),
            error_percent_threshold: 50,
        }
    }
}

impl CommandConfig {
    /// Validates the command policy.
    ///
    /// # Validation Rules
    ///
    /// - `timeout` must be non-zero
    /// - `max_concurrent_requests` must be > 0
    /// - `error_percent_threshold` must be in `1..=100`
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be greater than 0".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ClientError::Config(
                "max_concurrent_requests must be greater than 0".into(),
            ));
        }
        if self.error_percent_threshold == 0 || self.error_percent_threshold > 100 {
            return Err(ClientError::Config(
                "error_percent_threshold must be between 1 and 100".into(),
            ));
        }
        Ok(())
    }
}

/// A command name together with its policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Command name shared by every client that uses this circuit.
    pub name: String,
    /// Policy of the command.
    pub command: CommandConfig,
}

impl BreakerConfig {
    /// Create a breaker configuration.
    pub fn new<S: Into<String>>(name: S, command: CommandConfig) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }
}

/// Circuit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are allowed.
    Closed,
    /// Calls are rejected until the sleep window elapses.
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

#[derive(Debug)]
struct Health {
    open: bool,
    /// When the circuit opened, or when the last test call was admitted.
    opened_or_tested_at: Option<Instant>,
    window: VecDeque<(Instant, Outcome)>,
}

impl Health {
    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > ROLLING_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn error_percent(&self) -> usize {
        if self.window.is_empty() {
            return 0;
        }
        let failures = self
            .window
            .iter()
            .filter(|(_, outcome)| *outcome == Outcome::Failure)
            .count();
        failures * 100 / self.window.len()
    }
}

/// The circuit behind one named command.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CommandConfig,
    forced_open: AtomicBool,
    health: Mutex<Health>,
    permits: Arc<Semaphore>,
}

impl CircuitBreaker {
    /// Create an unregistered circuit.
    pub fn new<S: Into<String>>(name: S, config: CommandConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests));
        Self {
            name: name.into(),
            config,
            forced_open: AtomicBool::new(false),
            health: Mutex::new(Health {
                open: false,
                opened_or_tested_at: None,
                window: VecDeque::new(),
            }),
            permits,
        }
    }

    /// The command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command policy.
    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// The current state.
    pub fn state(&self) -> CircuitState {
        if self.is_open(&self.health()) {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Hold the circuit open regardless of health until cleared.
    pub fn force_open(&self, forced: bool) {
        self.forced_open.store(forced, Ordering::SeqCst);
        if forced {
            warn!(command = %self.name, "circuit forced open");
        }
    }

    /// Close the circuit and clear its metrics.
    pub fn reset(&self) {
        let mut health = self.health();
        health.open = false;
        health.opened_or_tested_at = None;
        health.window.clear();
        self.forced_open.store(false, Ordering::SeqCst);
        info!(command = %self.name, "circuit reset");
    }

    /// Run `call` as this command.
    ///
    /// `call` is only invoked once the circuit and the concurrency budget have
    /// admitted the request. An error returned by `call` propagates unchanged.
    pub async fn run<T, F, Fut>(&self, call: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        if !self.allow_request() {
            debug!(command = %self.name, "short-circuited");
            return Err(ClientError::CircuitOpen(self.name.clone()));
        }

        let _permit = self.permits.try_acquire().map_err(|_| {
            debug!(command = %self.name, "rejected: max concurrency");
            ClientError::MaxConcurrency(self.name.clone())
        })?;

        match tokio::time::timeout(self.config.timeout, call()).await {
            Ok(Ok(value)) => {
                self.record(Outcome::Success);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record(Outcome::Failure);
                Err(err)
            }
            Err(_) => {
                self.record(Outcome::Failure);
                Err(ClientError::CommandTimeout(self.name.clone()))
            }
        }
    }

    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allow_request(&self) -> bool {
        let mut health = self.health();
        if !self.is_open(&health) {
            return true;
        }
        if self.forced_open.load(Ordering::SeqCst) {
            return false;
        }
        self.allow_single_test(&mut health, Instant::now())
    }

    fn is_open(&self, health: &Health) -> bool {
        self.forced_open.load(Ordering::SeqCst) || health.open
    }

    /// Open a closed circuit whose window is unhealthy.
    fn trip_if_unhealthy(&self, health: &mut Health, now: Instant) {
        if health.open || health.window.len() < self.config.request_volume_threshold {
            return;
        }

        let error_percent = health.error_percent();
        if error_percent >= usize::from(self.config.error_percent_threshold) {
            health.open = true;
            health.opened_or_tested_at = Some(now);
            warn!(
                command = %self.name,
                error_percent,
                volume = health.window.len(),
                "circuit opened"
            );
        }
    }

    fn allow_single_test(&self, health: &mut Health, now: Instant) -> bool {
        let Some(since) = health.opened_or_tested_at else {
            return false;
        };
        if now.duration_since(since) >= self.config.sleep_window {
            health.opened_or_tested_at = Some(now);
            debug!(command = %self.name, "admitting test call");
            return true;
        }
        false
    }

    fn record(&self, outcome: Outcome) {
        let now = Instant::now();
        let mut health = self.health();
        if outcome == Outcome::Success && health.open {
            health.open = false;
            health.opened_or_tested_at = None;
            health.window.clear();
            info!(command = %self.name, "circuit closed");
        }
        health.window.push_back((now, outcome));
        health.prune(now);
        if outcome == Outcome::Failure {
            self.trip_if_unhealthy(&mut health, now);
        }
    }
}

/// Register `config` under its name, replacing any previous circuit.
///
/// # Errors
///
/// Returns `ClientError::Config` if the policy is invalid.
pub fn configure(config: &BreakerConfig) -> Result<Arc<CircuitBreaker>, ClientError> {
    config.command.validate()?;
    let circuit = Arc::new(CircuitBreaker::new(
        config.name.clone(),
        config.command.clone(),
    ));
    commands().insert(config.name.clone(), circuit.clone());
    debug!(command = %config.name, "command configured");
    Ok(circuit)
}

/// Look up the circuit registered under `name`.
pub fn lookup(name: &str) -> Option<Arc<CircuitBreaker>> {
    commands().get(name).cloned()
}

fn commands() -> MutexGuard<'static, HashMap<String, Arc<CircuitBreaker>>> {
    COMMANDS.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn tight_config() -> CommandConfig {
        CommandConfig {
            timeout: Duration::from_secs(1),
            max_concurrent_requests: 2,
            request_volume_threshold: 2,
            sleep_window: Duration::from_millis(50),
            error_percent_threshold: 50,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> ClientError {
        breaker
            .run(|| async { Err::<(), _>(ClientError::Transport("refused".into())) })
            .await
            .unwrap_err()
    }

    #[test]
    fn test_command_config_default() {
        let config = CommandConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.max_concurrent_requests, 10);
        assert_eq!(config.request_volume_threshold, 20);
        assert_eq!(config.sleep_window, Duration::from_secs(5));
        assert_eq!(config.error_percent_threshold, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_command_config_validate_rejects_zero_values() {
        let config = CommandConfig {
            max_concurrent_requests: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let config = CommandConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CommandConfig {
            error_percent_threshold: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_initial_state_closed() {
        let breaker = CircuitBreaker::new("initial", tight_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        let value = breaker.run(|| async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_inner_error_propagates_unchanged() {
        let breaker = CircuitBreaker::new("propagate", tight_config());
        match fail(&breaker).await {
            ClientError::Transport(msg) => assert_eq!(msg, "refused"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_opens_after_failures_and_skips_inner_call() {
        let breaker = CircuitBreaker::new("trips", tight_config());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicUsize::new(0);
        let err = breaker
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::CircuitOpen(name) if name == "trips"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_below_volume_threshold_stays_closed() {
        let breaker = CircuitBreaker::new("volume", tight_config());
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_healthy_window_stays_closed() {
        let config = CommandConfig {
            error_percent_threshold: 75,
            ..tight_config()
        };
        let breaker = CircuitBreaker::new("healthy", config);
        breaker.run(|| async { Ok(()) }).await.unwrap();
        fail(&breaker).await;
        // 50% errors, below the 75% threshold
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new("recovers", tight_config());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        breaker.run(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_stays_open() {
        let breaker = CircuitBreaker::new("relapses", tight_config());
        fail(&breaker).await;
        fail(&breaker).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(fail(&breaker).await, ClientError::Transport(_)));
        // the failed test call restarted the sleep window
        assert!(matches!(fail(&breaker).await, ClientError::CircuitOpen(_)));
    }

    #[tokio::test]
    async fn test_first_call_after_sleep_window_is_admitted() {
        let breaker = CircuitBreaker::new("unobserved", tight_config());
        fail(&breaker).await;
        fail(&breaker).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let calls = AtomicUsize::new(0);
        breaker
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_open_and_reset() {
        let breaker = CircuitBreaker::new("forced", tight_config());
        breaker.force_open(true);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(fail(&breaker).await, ClientError::CircuitOpen(_)));

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.run(|| async { Ok(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn test_max_concurrency_rejects() {
        let config = CommandConfig {
            max_concurrent_requests: 1,
            ..tight_config()
        };
        let breaker = Arc::new(CircuitBreaker::new("saturated", config));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .run(|| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        let err = breaker.run(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ClientError::MaxConcurrency(_)));
        assert!(err.is_rejected());

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout() {
        let config = CommandConfig {
            timeout: Duration::from_millis(20),
            ..tight_config()
        };
        let breaker = CircuitBreaker::new("slow", config);
        let err = breaker
            .run(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::CommandTimeout(name) if name == "slow"));
    }

    #[test]
    fn test_registry_configure_and_lookup() {
        let config = BreakerConfig::new("registry-test", tight_config());
        let circuit = configure(&config).unwrap();
        let found = lookup("registry-test").expect("command should be registered");
        assert!(Arc::ptr_eq(&circuit, &found));

        // configuring again replaces the circuit
        let replaced = configure(&config).unwrap();
        assert!(!Arc::ptr_eq(&circuit, &replaced));
        assert!(lookup("no-such-command").is_none());
    }

    #[test]
    fn test_registry_rejects_invalid_config() {
        let config = BreakerConfig::new(
            "registry-invalid",
            CommandConfig {
                max_concurrent_requests: 0,
                ..Default::default()
            },
        );
        assert!(configure(&config).is_err());
        assert!(lookup("registry-invalid").is_none());
    }
}
