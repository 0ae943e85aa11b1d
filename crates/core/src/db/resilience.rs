//! Retry and circuit breaking around a document store.
//!
//! Every attempt passes through the circuit breaker. Failed attempts are
//! retried according to their error class; a write conflict returned as a
//! result value gets its own retry budget.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use sqlx::error::ErrorKind;
use tracing::{debug, info, warn};

use crate::error::{DmsError, Result};

use super::repository::{
    DeleteRequest, DeleteResult, DocumentStoreRepository, GetRequest, GetResult, QueryRequest, QueryResult,
    StoreOutcome, UpdateRequest, UpdateResult, UpsertRequest, UpsertResult,
};
use super::sqlite::is_write_conflict;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after transient backend errors (timeouts, busy database).
    pub transient_retries: u32,
    pub transient_base_delay: Duration,
    pub transient_max_delay: Duration,
    /// Retries after any other non-constraint backend error.
    pub other_retries: u32,
    pub other_delay: Duration,
    /// Retries after a write-conflict result.
    pub write_conflict_retries: u32,
    pub write_conflict_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_retries: 4,
            transient_base_delay: Duration::from_millis(100),
            transient_max_delay: Duration::from_secs(2),
            other_retries: 1,
            other_delay: Duration::from_millis(50),
            write_conflict_retries: 3,
            write_conflict_delay: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerPolicy {
    /// Share of failed attempts in the window that opens the circuit.
    pub failure_ratio: f64,
    pub sampling_window: Duration,
    /// Attempts the window must hold before the ratio is considered.
    pub minimum_throughput: usize,
    pub break_duration: Duration,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_window: Duration::from_secs(10),
            minimum_throughput: 10,
            break_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResiliencePolicy {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    Transient,
    Constraint,
    Other,
    Fatal,
}

pub(crate) fn classify(err: &DmsError) -> ErrorClass {
    match err {
        _ if is_write_conflict(err) => ErrorClass::Transient,
        DmsError::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed) => {
            ErrorClass::Transient
        }
        DmsError::Database(sqlx::Error::Database(db)) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => ErrorClass::Constraint,
            _ => ErrorClass::Other,
        },
        DmsError::Database(sqlx::Error::PoolClosed) => ErrorClass::Fatal,
        DmsError::Database(_) => ErrorClass::Other,
        DmsError::Io(_) => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum BreakerState {
    Closed,
    Open { until: Instant },
    /// A single probe attempt is in flight.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    /// `(when, failed)` per attempt while closed.
    samples: VecDeque<(Instant, bool)>,
}

#[derive(Debug)]
struct CircuitBreaker {
    policy: CircuitBreakerPolicy,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    fn new(policy: CircuitBreakerPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                samples: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> CircuitState {
        match self.inner.lock().state {
            BreakerState::Closed => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Admit an attempt, or fail fast while open.
    fn acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open { until } if Instant::now() >= until => {
                inner.state = BreakerState::HalfOpen;
                info!("document store circuit half-open, probing");
                Ok(())
            }
            BreakerState::Open { .. } | BreakerState::HalfOpen => Err(DmsError::CircuitOpen),
        }
    }

    fn record(&self, failed: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            BreakerState::HalfOpen if failed => {
                inner.state = BreakerState::Open {
                    until: now + self.policy.break_duration,
                };
                warn!("document store probe failed, circuit re-opened");
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.samples.clear();
                info!("document store circuit closed");
            }
            BreakerState::Closed => {
                inner.samples.push_back((now, failed));
                let window = self.policy.sampling_window;
                while inner
                    .samples
                    .front()
                    .is_some_and(|(at, _)| now.duration_since(*at) > window)
                {
                    inner.samples.pop_front();
                }

                let total = inner.samples.len();
                let failures = inner.samples.iter().filter(|(_, f)| *f).count();
                if total >= self.policy.minimum_throughput
                    && failures as f64 / total as f64 >= self.policy.failure_ratio
                {
                    inner.state = BreakerState::Open {
                        until: now + self.policy.break_duration,
                    };
                    inner.samples.clear();
                    warn!(
                        failures,
                        total,
                        break_secs = self.policy.break_duration.as_secs_f64(),
                        "document store circuit opened"
                    );
                }
            }
            // Attempts admitted before the circuit opened.
            BreakerState::Open { .. } => {}
        }
    }
}

/// Wraps a document store with retries and a circuit breaker.
pub struct ResilientDocumentStore {
    inner: Arc<dyn DocumentStoreRepository>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilientDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStoreRepository>, policy: ResiliencePolicy) -> Self {
        Self {
            inner,
            retry: policy.retry,
            breaker: CircuitBreaker::new(policy.circuit_breaker),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn transient_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self
            .retry
            .transient_base_delay
            .saturating_mul(1 << exponent)
            .min(self.retry.transient_max_delay);
        let jitter_ms = (delay.as_millis() / 4) as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        delay + Duration::from_millis(jitter)
    }

    async fn execute<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        T: StoreOutcome,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut transient_retries = 0;
        let mut other_retries = 0;
        let mut conflict_retries = 0;

        loop {
            self.breaker.acquire()?;
            let err = match call().await {
                Ok(result) => {
                    self.breaker.record(false);
                    if result.is_write_conflict() && conflict_retries < self.retry.write_conflict_retries {
                        conflict_retries += 1;
                        debug!(operation, retry = conflict_retries, "retrying after write conflict");
                        tokio::time::sleep(self.retry.write_conflict_delay).await;
                        continue;
                    }
                    return Ok(result);
                }
                Err(err) => err,
            };

            let class = classify(&err);
            self.breaker
                .record(matches!(class, ErrorClass::Transient | ErrorClass::Other));

            let delay = match class {
                ErrorClass::Transient if transient_retries < self.retry.transient_retries => {
                    transient_retries += 1;
                    self.transient_delay(transient_retries)
                }
                ErrorClass::Other if other_retries < self.retry.other_retries => {
                    other_retries += 1;
                    self.retry.other_delay
                }
                _ => return Err(err),
            };
            warn!(
                operation,
                ?class,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "document store attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentStoreRepository for ResilientDocumentStore {
    async fn upsert_document(&self, request: &UpsertRequest) -> Result<UpsertResult> {
        self.execute("upsert", move || self.inner.upsert_document(request)).await
    }

    async fn get_document_by_id(&self, request: &GetRequest) -> Result<GetResult> {
        self.execute("get", move || self.inner.get_document_by_id(request)).await
    }

    async fn update_document_by_id(&self, request: &UpdateRequest) -> Result<UpdateResult> {
        self.execute("update", move || self.inner.update_document_by_id(request)).await
    }

    async fn delete_document_by_id(&self, request: &DeleteRequest) -> Result<DeleteResult> {
        self.execute("delete", move || self.inner.delete_document_by_id(request)).await
    }

    async fn query_documents(&self, request: &QueryRequest) -> Result<QueryResult> {
        self.execute("query", move || self.inner.query_documents(request)).await
    }
}
