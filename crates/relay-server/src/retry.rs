use bytes::Bytes;
use futures::stream::{self, StreamExt};
use relay_core::{AccountProvider, BoxStream, ConcurrencyGate, ErrorClassifier, Platform, RelayError, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::admission::TenantPermit;
use crate::config::RetryConfig;
use crate::scheduler::UnifiedScheduler;

/// Wraps account selection and upstream execution in the retry/failover
/// loop shared by every platform's route handler: pick an account, run the
/// executor, classify failures, mark the account's status, and try another
/// account until `max_retries` is exhausted.
pub struct RetryEngine {
    scheduler: Arc<UnifiedScheduler>,
    classifier: ErrorClassifier,
    config: RetryConfig,
    account_concurrency: Arc<ConcurrencyGate>,
}

impl RetryEngine {
    pub fn new(
        scheduler: Arc<UnifiedScheduler>,
        config: RetryConfig,
        account_concurrency: Arc<ConcurrencyGate>,
    ) -> Self {
        let classifier = if config.retryable_error_substrings.is_empty() {
            ErrorClassifier::retry_default()
        } else {
            ErrorClassifier::from_substrings(&config.retryable_error_substrings)
        };

        Self {
            scheduler,
            classifier,
            config,
            account_concurrency,
        }
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.config.initial_delay_ms)
    }

    fn grow(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(delay.as_secs_f64() * self.config.backoff_factor)
    }

    /// Records the side effect an upstream failure has on the account's
    /// availability (rate limited / overloaded / unauthorized / quota),
    /// same taxonomy every route's former `handle_relay_error` duplicated.
    fn mark_account_status(&self, account_id: &str, error: &RelayError) {
        match error {
            RelayError::RateLimited(retry_after) => {
                self.scheduler
                    .mark_account_rate_limited(account_id, *retry_after);
            }
            RelayError::Overloaded {
                retry_after_minutes,
            } => {
                self.scheduler
                    .mark_account_overloaded(account_id, *retry_after_minutes as u64);
            }
            RelayError::Unauthorized(_) => {
                self.scheduler
                    .mark_account_unavailable(account_id, "unauthorized");
            }
            RelayError::InsufficientQuota => {
                self.scheduler
                    .mark_account_unavailable(account_id, "insufficient_quota");
            }
            _ => {}
        }
    }

    /// Runs `executor` against accounts selected for `platform`, retrying
    /// on classified-retryable failures until `max_retries` attempts have
    /// been made or a non-retryable error / success is reached.
    pub async fn execute<T, F, Fut>(
        &self,
        platform: Platform,
        request_body: &serde_json::Value,
        session_id_header: Option<&str>,
        mut executor: F,
    ) -> Result<(T, Arc<dyn AccountProvider>)>
    where
        F: FnMut(Arc<dyn AccountProvider>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tried: HashSet<String> = HashSet::new();
        let mut delay = self.initial_delay();
        let mut last_error: Option<RelayError> = None;

        for attempt in 0..=self.config.max_retries {
            let account = match self
                .scheduler
                .select_account_excluding(platform, request_body, &tried, session_id_header)
                .await
            {
                Ok(account) => account,
                Err(e) => {
                    if attempt < self.config.max_retries {
                        warn!(attempt = attempt + 1, error = %e, "No account available, backing off before retry");
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                        delay = self.grow(delay);
                        continue;
                    }
                    return Err(last_error.unwrap_or(e));
                }
            };
            let account_id = account.id().to_string();

            let _permit = match TenantPermit::try_acquire(self.account_concurrency.clone(), &account_id) {
                Some(permit) => permit,
                None => {
                    warn!(account_id = %account_id, "Account concurrency limit reached, trying another account");
                    tried.insert(account_id);
                    continue;
                }
            };

            if attempt > 0 {
                info!(account_id = %account_id, attempt = attempt + 1, "Retrying request with different account");
            }

            match executor(account.clone()).await {
                Ok(value) => return Ok((value, account)),
                Err(e) => {
                    self.mark_account_status(&account_id, &e);

                    if attempt < self.config.max_retries && self.classifier.is_retryable(&e) {
                        warn!(account_id = %account_id, error = %e, attempt = attempt + 1, "Request failed, will try another account");
                        tried.insert(account_id);
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                        delay = self.grow(delay);
                        continue;
                    }

                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or(RelayError::NoAccount(platform)))
    }

    /// Stream variant of [`execute`]. The upstream's first SSE chunk is
    /// inspected before anything is forwarded to the client: if it's an
    /// `event: error` frame the attempt is treated as a connection-phase
    /// failure and retried like any other classified error. Once a
    /// non-error first chunk is seen the stream is committed and handed
    /// back with that chunk reattached — no further retry is possible past
    /// this point, matching the spec's stream-commit rule.
    pub async fn execute_stream<F, Fut>(
        &self,
        platform: Platform,
        request_body: &serde_json::Value,
        session_id_header: Option<&str>,
        mut executor: F,
    ) -> Result<(BoxStream<Result<Bytes>>, Arc<dyn AccountProvider>)>
    where
        F: FnMut(Arc<dyn AccountProvider>) -> Fut,
        Fut: Future<Output = Result<BoxStream<Result<Bytes>>>>,
    {
        let mut tried: HashSet<String> = HashSet::new();
        let mut delay = self.initial_delay();
        let mut last_error: Option<RelayError> = None;

        for attempt in 0..=self.config.max_retries {
            let account = match self
                .scheduler
                .select_account_excluding(platform, request_body, &tried, session_id_header)
                .await
            {
                Ok(account) => account,
                Err(e) => {
                    if attempt < self.config.max_retries {
                        warn!(attempt = attempt + 1, error = %e, "No account available, backing off before retry");
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                        delay = self.grow(delay);
                        continue;
                    }
                    return Err(last_error.unwrap_or(e));
                }
            };
            let account_id = account.id().to_string();

            let permit = match TenantPermit::try_acquire(self.account_concurrency.clone(), &account_id) {
                Some(permit) => permit,
                None => {
                    warn!(account_id = %account_id, "Account concurrency limit reached, trying another account");
                    tried.insert(account_id);
                    continue;
                }
            };

            if attempt > 0 {
                info!(account_id = %account_id, attempt = attempt + 1, "Retrying stream request with different account");
            }

            let mut upstream = match executor(account.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.mark_account_status(&account_id, &e);
                    if attempt < self.config.max_retries && self.classifier.is_retryable(&e) {
                        tried.insert(account_id);
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                        delay = self.grow(delay);
                        continue;
                    }
                    return Err(e);
                }
            };

            match upstream.next().await {
                None => return Ok((Box::pin(stream::empty()), account)),
                Some(Err(e)) => {
                    self.mark_account_status(&account_id, &e);
                    if attempt < self.config.max_retries && self.classifier.is_retryable(&e) {
                        tried.insert(account_id);
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                        delay = self.grow(delay);
                        continue;
                    }
                    return Err(e);
                }
                Some(Ok(first_chunk)) => {
                    if relay_claude::chunk_is_error_event(&first_chunk) && attempt < self.config.max_retries {
                        warn!(account_id = %account_id, "First SSE event is an error, retrying before commit");
                        tried.insert(account_id);
                        tokio::time::sleep(delay).await;
                        delay = self.grow(delay);
                        continue;
                    }

                    // The account concurrency slot must stay held for the stream's
                    // whole lifetime, not just selection, so the permit is captured
                    // by the generator and released only when the stream ends or
                    // the client disconnects and drops it.
                    let committed = async_stream::stream! {
                        let _permit = permit;
                        yield Ok(first_chunk);
                        let mut upstream = upstream;
                        while let Some(item) = upstream.next().await {
                            yield item;
                        }
                    };
                    return Ok((Box::pin(committed), account));
                }
            }
        }

        Err(last_error.unwrap_or(RelayError::NoAccount(platform)))
    }
}
