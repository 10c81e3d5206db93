//! Sends one chunk through the credential pool with retry and rotation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::credentials::{Credential, CredentialPool, RotationRun};
use crate::error::{ApiError, DispatchError};
use crate::DEFAULT_MAX_ATTEMPTS;

/// What gets sent for one chunk.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub text: &'a str,
    pub instructions: &'a str,
    pub model: &'a str,
}

/// A text-generation endpoint reachable with a single credential.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// One request, no retries.
    async fn send(
        &self,
        request: CompletionRequest<'_>,
        credential: &Credential,
    ) -> Result<String, ApiError>;
}

/// Retry budget for transient failures on a single credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Requests per credential, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Successful dispatch of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub text: String,
    pub credential_ordinal: usize,
    /// Requests sent for this chunk, across credentials
    pub attempts: usize,
}

/// Dispatches chunks to a [`CompletionBackend`].
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request`, rotating through `pool` as credentials fail.
    ///
    /// - transient errors are retried on the same credential per the
    ///   retry policy, then the next credential is tried
    /// - a throttled credential is marked exhausted for the run and the next
    ///   one is tried immediately
    /// - fatal errors are returned at once
    ///
    /// When every credential was throttled for this chunk the result is
    /// [`DispatchError::AllCredentialsExhausted`].
    pub async fn dispatch(
        &self,
        pool: &mut CredentialPool,
        run: &mut RotationRun,
        request: CompletionRequest<'_>,
    ) -> Result<Dispatched, DispatchError> {
        if pool.is_empty() {
            return Err(DispatchError::NoCredentials);
        }

        let mut tried = BTreeSet::new();
        let mut attempts = 0;
        let mut throttled = 0;
        let mut last_transient: Option<String> = None;
        let mut ordinal = run.first_candidate(pool.starting_ordinal(run));

        loop {
            tried.insert(ordinal);
            let Some(credential) = pool.get(ordinal) else {
                return Err(DispatchError::NoCredentials);
            };

            match self.send_with_retries(request, credential, &mut attempts).await {
                Ok(text) => {
                    run.mark_success(ordinal);
                    pool.record_success(ordinal);
                    debug!(credential = ordinal, attempts, "Chunk dispatched");
                    return Ok(Dispatched {
                        text,
                        credential_ordinal: ordinal,
                        attempts,
                    });
                }
                Err(ApiError::RateLimited { status, .. }) => {
                    warn!(credential = ordinal, status, "Credential rate limited, rotating");
                    run.mark_exhausted(ordinal);
                    throttled += 1;
                }
                Err(ApiError::Transient(message)) => {
                    warn!(
                        credential = ordinal,
                        error = %message,
                        "Transient failures exhausted retries, rotating"
                    );
                    last_transient = Some(message);
                }
                Err(ApiError::Fatal { status, message }) => {
                    return Err(DispatchError::Fatal { status, message });
                }
            }

            match run.next_candidate(ordinal, &tried) {
                Some(next) => ordinal = next,
                None => break,
            }
        }

        match last_transient {
            Some(message) => Err(DispatchError::Transient(message)),
            None => {
                info!(credentials = throttled, "All credentials rate limited");
                Err(DispatchError::AllCredentialsExhausted {
                    attempts: throttled,
                })
            }
        }
    }

    async fn send_with_retries(
        &self,
        request: CompletionRequest<'_>,
        credential: &Credential,
        attempts: &mut usize,
    ) -> Result<String, ApiError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            *attempts += 1;
            match self.backend.send(request, credential).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        credential = credential.ordinal,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::client::RotationStrategy;
    use pretty_assertions::assert_eq;

    fn setup(n: usize, strategy: RotationStrategy) -> (Arc<ScriptedBackend>, Dispatcher, CredentialPool) {
        let backend = Arc::new(ScriptedBackend::new());
        let dispatcher = Dispatcher::new(backend.clone(), instant_retries());
        let pool = CredentialPool::new((0..n).map(|i| format!("key-{}", i)), strategy);
        (backend, dispatcher, pool)
    }

    fn request(text: &str) -> CompletionRequest<'_> {
        CompletionRequest {
            text,
            instructions: "improve",
            model: "test-model",
        }
    }

    fn ordinals(backend: &ScriptedBackend) -> Vec<usize> {
        backend.calls().into_iter().map(|(o, _)| o).collect()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(30), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_success_on_first_credential() {
        let (backend, dispatcher, mut pool) = setup(2, RotationStrategy::Failover);
        let mut run = pool.start_run();

        let out = dispatcher.dispatch(&mut pool, &mut run, request("hello")).await.unwrap();
        assert_eq!(out.text, "enhanced: hello");
        assert_eq!(out.credential_ordinal, 0);
        assert_eq!(out.attempts, 1);
        assert_eq!(pool.cursor(), Some(0));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_all_rate_limited_takes_exactly_n_attempts() {
        let (backend, dispatcher, mut pool) = setup(3, RotationStrategy::Failover);
        for ordinal in 0..3 {
            backend.fail_always(ordinal, rate_limited());
        }
        let mut run = pool.start_run();

        let err = dispatcher
            .dispatch(&mut pool, &mut run, request("x"))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::AllCredentialsExhausted { attempts: 3 });
        assert_eq!(ordinals(&backend), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_to_next_credential() {
        let (backend, dispatcher, mut pool) = setup(3, RotationStrategy::Failover);
        backend.script(0, Err(rate_limited()));
        let mut run = pool.start_run();

        let out = dispatcher.dispatch(&mut pool, &mut run, request("a")).await.unwrap();
        assert_eq!(out.credential_ordinal, 1);
        assert!(run.is_exhausted(0));

        // Failover stays on the credential that worked.
        let out = dispatcher.dispatch(&mut pool, &mut run, request("b")).await.unwrap();
        assert_eq!(out.credential_ordinal, 1);
        assert_eq!(ordinals(&backend), vec![0, 1, 1]);
    }

    #[tokio::test]
    async fn test_throttled_credential_waits_for_the_others() {
        let (backend, dispatcher, mut pool) = setup(3, RotationStrategy::Failover);
        backend.script(0, Err(rate_limited()));
        let mut run = pool.start_run();
        dispatcher.dispatch(&mut pool, &mut run, request("a")).await.unwrap();

        // 1 and 2 get throttled on the next chunk; 0 is only retried after both.
        backend.script(1, Err(rate_limited()));
        backend.script(2, Err(rate_limited()));
        let out = dispatcher.dispatch(&mut pool, &mut run, request("b")).await.unwrap();
        assert_eq!(out.credential_ordinal, 0);
        assert_eq!(ordinals(&backend), vec![0, 1, 1, 2, 0]);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_same_credential() {
        let (backend, dispatcher, mut pool) = setup(2, RotationStrategy::Failover);
        backend.script(0, Err(transient()));
        backend.script(0, Err(transient()));
        let mut run = pool.start_run();

        let out = dispatcher.dispatch(&mut pool, &mut run, request("a")).await.unwrap();
        assert_eq!(out.credential_ordinal, 0);
        assert_eq!(out.attempts, 3);
        assert_eq!(ordinals(&backend), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_moves_to_next_credential() {
        let (backend, dispatcher, mut pool) = setup(2, RotationStrategy::Failover);
        backend.fail_always(0, transient());
        let mut run = pool.start_run();

        let out = dispatcher.dispatch(&mut pool, &mut run, request("a")).await.unwrap();
        assert_eq!(out.credential_ordinal, 1);
        assert_eq!(ordinals(&backend), vec![0, 0, 0, 1]);
        assert!(!run.is_exhausted(0));
    }

    #[tokio::test]
    async fn test_mixed_failures_report_last_transient() {
        let (backend, dispatcher, mut pool) = setup(2, RotationStrategy::Failover);
        backend.fail_always(0, transient());
        backend.fail_always(1, rate_limited());
        let mut run = pool.start_run();

        let err = dispatcher
            .dispatch(&mut pool, &mut run, request("a"))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Transient("503 unavailable".into()));
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let (backend, dispatcher, mut pool) = setup(3, RotationStrategy::Failover);
        backend.script(
            0,
            Err(ApiError::Fatal {
                status: 400,
                message: "bad request".into(),
            }),
        );
        let mut run = pool.start_run();

        let err = dispatcher
            .dispatch(&mut pool, &mut run, request("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Fatal { status: 400, .. }));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_round_robin_spreads_chunks() {
        let (backend, dispatcher, mut pool) = setup(3, RotationStrategy::RoundRobin);
        let mut run = pool.start_run();
        for text in ["a", "b", "c", "d"] {
            dispatcher.dispatch(&mut pool, &mut run, request(text)).await.unwrap();
        }
        assert_eq!(ordinals(&backend), vec![0, 1, 2, 0]);

        // The cursor carries over into the next run.
        let mut run = pool.start_run();
        let out = dispatcher.dispatch(&mut pool, &mut run, request("e")).await.unwrap();
        assert_eq!(out.credential_ordinal, 1);
    }

    #[tokio::test]
    async fn test_failover_restarts_at_first_credential_each_run() {
        let (backend, dispatcher, mut pool) = setup(2, RotationStrategy::Failover);
        backend.script(0, Err(rate_limited()));
        let mut run = pool.start_run();
        dispatcher.dispatch(&mut pool, &mut run, request("a")).await.unwrap();

        let mut run = pool.start_run();
        let out = dispatcher.dispatch(&mut pool, &mut run, request("b")).await.unwrap();
        assert_eq!(out.credential_ordinal, 0);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let (_, dispatcher, _) = setup(0, RotationStrategy::Failover);
        let mut pool = CredentialPool::new(Vec::<String>::new(), RotationStrategy::Failover);
        let mut run = pool.start_run();
        let err = dispatcher
            .dispatch(&mut pool, &mut run, request("a"))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::NoCredentials);
    }
}
