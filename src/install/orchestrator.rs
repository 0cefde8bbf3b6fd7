// src/install/orchestrator.rs

//! Batch installs with per-registry concurrency and rate limits
//!
//! Requests are grouped by registry. Every group gets a semaphore sized to
//! the registry's concurrency ceiling and shares that registry's token
//! bucket; all groups run at the same time. Each request is its own task and
//! its failure (error, panic or cancellation) is captured into an
//! [`InstallError`] without touching its siblings.

use super::{Install, InstallError, InstallRequest, InstallResult, MultiInstallRequest, MultiInstallResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::ratelimit::{RateLimit, RateLimiterRegistry, TokenBucket};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs many install requests through one [`Install`] implementation
pub struct InstallOrchestrator {
    installer: Arc<dyn Install>,
    config: Arc<Config>,
    limiters: RateLimiterRegistry,
    cancel: CancellationToken,
}

impl InstallOrchestrator {
    pub fn new(installer: Arc<dyn Install>, config: Arc<Config>) -> Self {
        Self {
            installer,
            config,
            limiters: RateLimiterRegistry::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop starting new installs; pending ones are reported as cancelled
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token buckets created so far, one per registry seen
    pub fn rate_limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }

    /// Install every request and report each outcome
    ///
    /// Per-request failures land in `failed`; `Err` is only returned when the
    /// batch cannot be set up (e.g. a registry configured with a concurrency
    /// of zero or above [`Semaphore::MAX_PERMITS`]), in which case nothing
    /// was started.
    pub async fn install_multiple(
        &self,
        batch: MultiInstallRequest,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<MultiInstallResult> {
        let total = batch.requests.len();

        let mut groups: BTreeMap<String, Vec<InstallRequest>> = BTreeMap::new();
        for request in batch.requests {
            groups.entry(request.registry.clone()).or_default().push(request);
        }

        // Resolve every group's limits before starting anything
        let mut plans = Vec::with_capacity(groups.len());
        for (registry, requests) in groups {
            let ceiling = self.config.concurrency_for(&registry);
            if ceiling == 0 {
                return Err(Error::ConfigError(format!(
                    "registry '{registry}' has a concurrency of 0"
                )));
            }
            if ceiling > Semaphore::MAX_PERMITS {
                return Err(Error::ConfigError(format!(
                    "registry '{registry}' has a concurrency of {ceiling}, above the limit of {}",
                    Semaphore::MAX_PERMITS
                )));
            }

            let bucket = self.limiters.get_or_create(&registry, || {
                RateLimit::parse_or_default(self.config.rate_limit_for(&registry))
            });
            debug!(
                "Registry {}: {} request(s), concurrency {}, {} tokens",
                registry,
                requests.len(),
                ceiling,
                bucket.capacity()
            );
            plans.push((Arc::new(Semaphore::new(ceiling)), bucket, requests));
        }

        info!("Installing {} ruleset(s) from {} registries", total, plans.len());

        let completed = Arc::new(Mutex::new(0usize));
        let mut handles = Vec::with_capacity(total);
        for (gate, bucket, requests) in plans {
            for request in requests {
                let unit = Unit {
                    installer: self.installer.clone(),
                    gate: gate.clone(),
                    bucket: bucket.clone(),
                    cancel: self.cancel.clone(),
                    progress: progress.clone(),
                    completed: completed.clone(),
                    total,
                };
                let target = (request.registry.clone(), request.ruleset.clone());
                handles.push((target, tokio::spawn(unit.run(request))));
            }
        }

        let mut result = MultiInstallResult {
            total,
            ..Default::default()
        };
        for ((registry, ruleset), handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(InstallError {
                    registry,
                    ruleset,
                    cause: Error::WorkerFailed(e.to_string()),
                })
            });

            match outcome {
                Ok(installed) => result.successful.push(installed),
                Err(err) => {
                    warn!("Install failed: {}", err);
                    result.failed.push(err);
                }
            }
        }

        if let Some(progress) = &progress {
            progress.finish(result.successful.len(), result.failed.len());
        }
        info!(
            "Batch finished: {} succeeded, {} failed, {} total",
            result.successful.len(),
            result.failed.len(),
            result.total
        );
        Ok(result)
    }
}

/// Everything one request's task needs
struct Unit {
    installer: Arc<dyn Install>,
    gate: Arc<Semaphore>,
    bucket: Arc<TokenBucket>,
    cancel: CancellationToken,
    progress: Option<Arc<dyn ProgressReporter>>,
    completed: Arc<Mutex<usize>>,
    total: usize,
}

impl Unit {
    async fn run(self, request: InstallRequest) -> std::result::Result<InstallResult, InstallError> {
        let description = request.description();
        let registry = request.registry.clone();
        let ruleset = request.ruleset.clone();

        let outcome = match AssertUnwindSafe(self.execute(request)).catch_unwind().await {
            Ok(Ok(installed)) => Ok(installed),
            Ok(Err(cause)) => Err(cause),
            Err(panic) => Err(Error::WorkerFailed(format!(
                "install panicked: {}",
                panic_message(&*panic)
            ))),
        }
        .map_err(|cause| InstallError {
            registry,
            ruleset,
            cause,
        });

        self.report(&description, outcome.is_ok());
        outcome
    }

    /// Slot, then token, then the install itself
    async fn execute(&self, request: InstallRequest) -> Result<InstallResult> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.gate.acquire() => permit.map_err(|_| Error::Cancelled)?,
        };

        self.bucket.acquire(&self.cancel).await?;
        self.installer.install(request).await
    }

    fn report(&self, description: &str, ok: bool) {
        let mut completed = self.completed.lock();
        *completed += 1;

        // Reported under the lock so counts reach the reporter in order
        if let Some(progress) = &self.progress {
            let status = if ok { "installed" } else { "failed" };
            let message = format!("{status} {description}");
            let reported = std::panic::catch_unwind(AssertUnwindSafe(|| {
                progress.report(*completed, self.total, &message)
            }));
            if let Err(panic) = reported {
                warn!(
                    "Progress reporter panicked on {}/{}: {}",
                    *completed,
                    self.total,
                    panic_message(&*panic)
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
