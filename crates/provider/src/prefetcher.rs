//! Concurrent storage prefetcher with bounded concurrency and retry.
//!
//! Fetches a batch of storage slots in parallel from a [`StateProvider`]
//! into a [`StateCache`], so that decodes waiting on those slots can resume
//! without further round trips.

use crate::cache::StateCache;
use crate::StateProvider;
use alloy_primitives::{Address, B256, U256};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{StrataError, StrataResult};

/// Default max concurrent provider requests.
const DEFAULT_CONCURRENCY: usize = 8;

/// Max retry attempts for transient provider errors.
const MAX_RETRIES: u32 = 3;

/// Base delay of the exponential backoff.
const RETRY_BASE_DELAY_MS: u64 = 200;

/// Outcome of one prefetch batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrefetchReport {
    pub fetched: usize,
    pub cached: usize,
    pub failed: usize,
}

/// Concurrent slot prefetcher.
///
/// Owns a provider and fetches storage words via a `JoinSet`, throttled by
/// a semaphore.
///
/// ```ignore
/// let prefetcher = Prefetcher::new(Arc::new(provider)).with_concurrency(4);
/// prefetcher.prefetch(&cache, block, address, &slots).await?;
/// ```
pub struct Prefetcher<P> {
    provider: Arc<P>,
    max_concurrent: usize,
}

impl<P: StateProvider + 'static> Prefetcher<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            max_concurrent: DEFAULT_CONCURRENCY,
        }
    }

    /// Override max concurrent requests (default: 8).
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Fetches every slot of `address` not already in `cache`.
    ///
    /// Slots that still fail after retrying are logged and counted; the
    /// rest are cached.
    pub async fn prefetch(
        &self,
        cache: &StateCache,
        block: u64,
        address: Address,
        slots: &[U256],
    ) -> StrataResult<PrefetchReport> {
        let unique: Vec<U256> = slots
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let missing = cache.missing(block, address, &unique);
        let mut report = PrefetchReport {
            cached: unique.len() - missing.len(),
            ..PrefetchReport::default()
        };
        if missing.is_empty() {
            return Ok(report);
        }

        tracing::debug!(
            block,
            %address,
            slots = missing.len(),
            concurrency = self.max_concurrent,
            "prefetching storage"
        );

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_concurrent));
        let mut tasks = tokio::task::JoinSet::new();
        for slot in missing {
            let provider = self.provider.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StrataError::Internal(format!("prefetch semaphore closed: {e}")))?;
                let word = with_retry(|| provider.storage_at(address, slot, block)).await?;
                Ok::<(U256, B256), StrataError>((slot, word))
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok((slot, word))) => {
                    cache.insert_storage(block, address, slot, word);
                    report.fetched += 1;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "prefetch failed");
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "prefetch task panicked");
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(block, %address, fetched = report.fetched, failed = report.failed, "prefetch done");
        Ok(report)
    }
}

/// Runs `op`, retrying transient errors with exponential backoff.
pub(crate) async fn with_retry<T, F, Fut>(mut op: F) -> StrataResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StrataResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1));
                tracing::debug!(attempt, error = %e, ?delay, "retrying provider request");
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryProvider;
    use alloy_primitives::Bytes;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` requests with a transient error.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StateProvider for Flaky {
        async fn storage_at(&self, _: Address, slot: U256, _: u64) -> StrataResult<B256> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(StrataError::Provider("429 Too Many Requests".into()));
            }
            Ok(B256::from(slot.to_be_bytes::<32>()))
        }

        async fn code_at(&self, _: Address, _: u64) -> StrataResult<Bytes> {
            Err(StrataError::InvalidInput("no code".into()))
        }
    }

    #[tokio::test]
    async fn fetches_only_missing_slots() {
        let address = Address::repeat_byte(1);
        let provider = Arc::new(MemoryProvider::new().with_storage(address, U256::from(2), B256::repeat_byte(2)));
        let cache = StateCache::new();
        cache.insert_storage(7, address, U256::from(1), B256::repeat_byte(1));

        let prefetcher = Prefetcher::new(provider.clone()).with_concurrency(2);
        let slots = [U256::from(1), U256::from(2), U256::from(2), U256::from(3)];
        let report = prefetcher.prefetch(&cache, 7, address, &slots).await.unwrap();

        assert_eq!(
            report,
            PrefetchReport {
                fetched: 2,
                cached: 1,
                failed: 0
            }
        );
        assert_eq!(provider.requests(), 2);
        assert_eq!(cache.storage(7, address, U256::from(2)), Some(B256::repeat_byte(2)));
        assert_eq!(cache.storage(7, address, U256::from(3)), Some(B256::ZERO));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let provider = Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
        };
        let word = with_retry(|| provider.storage_at(Address::ZERO, U256::from(5), 0))
            .await
            .unwrap();
        assert_eq!(word, B256::from(U256::from(5).to_be_bytes::<32>()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let provider = Flaky {
            failures: 0,
            calls: AtomicUsize::new(0),
        };
        assert!(with_retry(|| provider.code_at(Address::ZERO, 0)).await.is_err());
    }

    #[tokio::test]
    async fn exhausted_retries_count_as_failures() {
        let provider = Arc::new(Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let cache = StateCache::new();
        let report = Prefetcher::new(provider.clone())
            .prefetch(&cache, 1, Address::ZERO, &[U256::from(1)])
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), MAX_RETRIES as usize + 1);
        assert_eq!(cache.storage_len(), 0);
    }
}
