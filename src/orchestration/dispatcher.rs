//! # Work Dispatcher
//!
//! Generic "dispatch a group of units, await them all, merge" primitive
//! used at both fan-out levels (pages and batches). Each unit is retried
//! with exponential backoff up to a fixed budget, concurrency is capped by
//! a semaphore, and the group wait is bounded so a lost unit can never
//! hang the dispatcher.
//!
//! Retry pacing lives here and nowhere else: the business components
//! (batch runner, page orchestrator) stay pure and testable without any
//! task runtime. A unit is a factory closure producing a fresh future per
//! attempt, which is what makes retrying safe for idempotent work like
//! re-fetching a page.

use crate::config::EtlConfig;
use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Retry budget and pacing for one unit of work.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on the computed delay
    pub max_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `attempt` (1-based), or `None`
    /// when the budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self
            .base_delay
            .mul_f64(self.backoff_multiplier.powi(exponent))
            .min(self.max_delay);

        if self.jitter {
            let jittered = delay.mul_f64(1.0 + fastrand::f64() * 0.1);
            Some(jittered.min(self.max_delay))
        } else {
            Some(delay)
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Units of work allowed in flight at once
    pub max_concurrent_units: usize,
    /// Upper bound on waiting for a whole group
    pub group_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: 10,
            group_timeout: Duration::from_secs(3600),
            retry: RetryConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_pipeline_config(config: &EtlConfig) -> Self {
        Self {
            max_concurrent_units: config.max_concurrent_units,
            group_timeout: Duration::from_secs(config.group_timeout_secs),
            retry: RetryConfig {
                max_attempts: config.retry_limit,
                base_delay: Duration::from_millis(config.backoff_base_ms),
                max_delay: Duration::from_millis(config.backoff_max_ms),
                backoff_multiplier: 2.0,
                jitter: true,
            },
        }
    }

    /// Short timeouts and no jitter, for deterministic tests.
    pub fn for_testing() -> Self {
        Self {
            max_concurrent_units: 4,
            group_timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                backoff_multiplier: 2.0,
                jitter: false,
            },
        }
    }
}

/// Terminal state of one dispatched unit. Every unit reaches exactly one.
#[derive(Debug)]
pub enum UnitOutcome<T> {
    Completed {
        unit_index: usize,
        attempts: u32,
        value: T,
    },
    /// The retry budget was spent without a success.
    Exhausted {
        unit_index: usize,
        attempts: u32,
        error: String,
    },
    /// The group deadline passed before the unit finished.
    TimedOut { unit_index: usize },
}

impl<T> UnitOutcome<T> {
    pub fn unit_index(&self) -> usize {
        match self {
            Self::Completed { unit_index, .. }
            | Self::Exhausted { unit_index, .. }
            | Self::TimedOut { unit_index } => *unit_index,
        }
    }
}

/// Spawns groups of retryable units onto the tokio runtime.
pub struct Dispatcher {
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_units));
        Self { config, semaphore }
    }

    /// Spawn every unit and return a handle yielding outcomes in
    /// completion order.
    pub fn dispatch<T, F, Fut>(&self, units: Vec<F>) -> DispatchGroup<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + self.config.group_timeout;
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for (unit_index, unit) in units.into_iter().enumerate() {
            let semaphore = self.semaphore.clone();
            let retry = self.config.retry.clone();
            let handle = tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return UnitOutcome::Exhausted {
                            unit_index,
                            attempts: 0,
                            error: "dispatcher semaphore closed".to_string(),
                        }
                    }
                };
                run_with_retry(unit_index, &unit, &retry).await
            });
            pending.insert(handle.id(), unit_index);
        }

        DispatchGroup {
            tasks,
            pending,
            deadline,
            timed_out: Vec::new(),
        }
    }

    /// Dispatch and collect every outcome.
    pub async fn dispatch_group<T, F, Fut>(&self, units: Vec<F>) -> Vec<UnitOutcome<T>>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut group = self.dispatch(units);
        let mut outcomes = Vec::new();
        while let Some(outcome) = group.join_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

async fn run_with_retry<T, F, Fut>(unit_index: usize, unit: &F, retry: &RetryConfig) -> UnitOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match unit().await {
            Ok(value) => {
                return UnitOutcome::Completed {
                    unit_index,
                    attempts: attempt,
                    value,
                }
            }
            Err(err) => match retry.delay_for(attempt) {
                Some(delay) => {
                    warn!(
                        unit_index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "unit failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    error!(unit_index, attempts = attempt, error = %err, "unit failed permanently");
                    return UnitOutcome::Exhausted {
                        unit_index,
                        attempts: attempt,
                        error: err.to_string(),
                    };
                }
            },
        }
    }
}

/// In-flight dispatch group. Yields one outcome per unit, then `None`.
pub struct DispatchGroup<T> {
    tasks: JoinSet<UnitOutcome<T>>,
    pending: HashMap<tokio::task::Id, usize>,
    deadline: tokio::time::Instant,
    timed_out: Vec<usize>,
}

impl<T: 'static> DispatchGroup<T> {
    /// Next outcome in completion order.
    ///
    /// Once the group deadline passes, remaining units are aborted and
    /// reported as [`UnitOutcome::TimedOut`] — the wait is bounded no
    /// matter what the units do.
    pub async fn join_next(&mut self) -> Option<UnitOutcome<T>> {
        loop {
            if let Some(unit_index) = self.timed_out.pop() {
                return Some(UnitOutcome::TimedOut { unit_index });
            }
            if self.tasks.is_empty() {
                return None;
            }

            match tokio::time::timeout_at(self.deadline, self.tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    self.pending.remove(&id);
                    return Some(outcome);
                }
                Ok(Some(Err(join_error))) => {
                    let Some(unit_index) = self.pending.remove(&join_error.id()) else {
                        continue;
                    };
                    error!(unit_index, error = %join_error, "unit task aborted");
                    return Some(UnitOutcome::Exhausted {
                        unit_index,
                        attempts: 0,
                        error: format!("unit task aborted: {join_error}"),
                    });
                }
                Ok(None) => return None,
                Err(_) => {
                    warn!(
                        pending = self.pending.len(),
                        "group deadline reached, aborting remaining units"
                    );
                    self.tasks.abort_all();
                    self.tasks.detach_all();
                    self.timed_out = self.pending.drain().map(|(_, index)| index).collect();
                }
            }
        }
    }
}
