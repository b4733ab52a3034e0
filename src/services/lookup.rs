use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::config::{LookupSettings, LookupStrategy, ProviderSettings};
use crate::models::barcode::Barcode;
use crate::models::product::LookupResult;
use crate::services::providers::{ProductProvider, ProviderError, ProviderKind};

/// One provider that failed during a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub error: ProviderError,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LookupError {
    #[error("No provider returned a result ({} failed)", .failures.len())]
    NoResultFound { failures: Vec<ProviderFailure> },
}

impl LookupError {
    /// True when every queried provider answered "not found", so the absence can be cached.
    pub fn is_definitive(&self) -> bool {
        match self {
            LookupError::NoResultFound { failures } => {
                !failures.is_empty() && failures.iter().all(|f| f.error.is_definitive())
            }
        }
    }
}

/// Fans a barcode out to the configured providers.
pub struct LookupManager {
    providers: Vec<Arc<dyn ProductProvider>>,
}

struct ProviderCall<'a> {
    rank: u32,
    settings: &'a ProviderSettings,
    provider: Arc<dyn ProductProvider>,
}

impl LookupManager {
    pub fn new(providers: Vec<Arc<dyn ProductProvider>>) -> Self {
        Self { providers }
    }

    /// Query enabled providers per the configured strategy.
    ///
    /// Returns the successful results sorted by rank, or `NoResultFound` when
    /// none succeeded.
    pub async fn lookup(
        &self,
        barcode: &Barcode,
        settings: &LookupSettings,
    ) -> Result<Vec<LookupResult>, LookupError> {
        let calls: Vec<ProviderCall<'_>> = settings
            .enabled()
            .filter_map(|(rank, cfg)| {
                let provider = self.providers.iter().find(|p| p.kind() == cfg.kind)?;
                Some(ProviderCall {
                    rank,
                    settings: cfg,
                    provider: provider.clone(),
                })
            })
            .collect();

        if calls.is_empty() {
            warn!(barcode = %barcode, "No lookup providers enabled");
            return Err(LookupError::NoResultFound {
                failures: Vec::new(),
            });
        }

        let start = Instant::now();
        let outcome = match settings.strategy {
            LookupStrategy::Sequential => self.sequential(barcode, &calls).await,
            LookupStrategy::Parallel => {
                self.parallel(barcode, &calls, settings.parallel_deadline())
                    .await
            }
        };
        let elapsed = start.elapsed();

        metrics::histogram!(
            "lookup_duration_seconds",
            "strategy" => settings.strategy.to_string()
        )
        .record(elapsed.as_secs_f64());

        match &outcome {
            Ok(results) => info!(
                barcode = %barcode,
                strategy = %settings.strategy,
                results = results.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Lookup complete"
            ),
            Err(LookupError::NoResultFound { failures }) => info!(
                barcode = %barcode,
                strategy = %settings.strategy,
                failed = failures.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Lookup found nothing"
            ),
        }
        outcome
    }

    async fn sequential(
        &self,
        barcode: &Barcode,
        calls: &[ProviderCall<'_>],
    ) -> Result<Vec<LookupResult>, LookupError> {
        let mut failures = Vec::new();
        for call in calls {
            match call_provider(barcode, call).await {
                Ok(result) => return Ok(vec![result]),
                Err(error) => failures.push(ProviderFailure {
                    provider: call.provider.kind(),
                    error,
                }),
            }
        }
        Err(LookupError::NoResultFound { failures })
    }

    async fn parallel(
        &self,
        barcode: &Barcode,
        calls: &[ProviderCall<'_>],
        deadline: std::time::Duration,
    ) -> Result<Vec<LookupResult>, LookupError> {
        let deadline = tokio::time::Instant::now() + deadline;
        let mut pending: FuturesUnordered<_> = calls
            .iter()
            .map(|call| async move { (call.provider.kind(), call_provider(barcode, call).await) })
            .collect();

        let mut results = Vec::new();
        let mut failures = Vec::new();
        let mut finished = Vec::with_capacity(calls.len());

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((kind, outcome))) => {
                    finished.push(kind);
                    match outcome {
                        Ok(result) => results.push(result),
                        Err(error) => failures.push(ProviderFailure {
                            provider: kind,
                            error,
                        }),
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        barcode = %barcode,
                        outstanding = pending.len(),
                        "Parallel lookup deadline elapsed, dropping outstanding providers"
                    );
                    for call in calls {
                        let kind = call.provider.kind();
                        if !finished.contains(&kind) {
                            failures.push(ProviderFailure {
                                provider: kind,
                                error: ProviderError::Timeout,
                            });
                        }
                    }
                    break;
                }
            }
        }
        // Dropping the set cancels calls still in flight.
        drop(pending);

        if results.is_empty() {
            return Err(LookupError::NoResultFound { failures });
        }
        results.sort_by_key(|r| r.rank);
        Ok(results)
    }
}

async fn call_provider(
    barcode: &Barcode,
    call: &ProviderCall<'_>,
) -> Result<LookupResult, ProviderError> {
    let kind = call.provider.kind();
    let outcome = tokio::time::timeout(
        call.settings.timeout(),
        call.provider.fetch(barcode, call.settings),
    )
    .await
    .unwrap_or(Err(ProviderError::Timeout));

    let label = match &outcome {
        Ok(_) => "found",
        Err(e) => e.label(),
    };
    metrics::counter!(
        "provider_requests_total",
        "provider" => kind.to_string(),
        "outcome" => label
    )
    .increment(1);

    match outcome {
        Ok(hit) => {
            debug!(barcode = %barcode, provider = %kind, rank = call.rank, "Provider returned a product");
            Ok(LookupResult::from_hit(kind, call.rank, barcode, hit))
        }
        Err(ProviderError::NotFound) => {
            debug!(barcode = %barcode, provider = %kind, "Provider has no product");
            Err(ProviderError::NotFound)
        }
        Err(error) => {
            warn!(barcode = %barcode, provider = %kind, error = %error, "Provider lookup failed");
            Err(error)
        }
    }
}
