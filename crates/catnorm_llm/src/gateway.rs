//! Multi-provider router (§4.4 "Multi-provider router").
//!
//! Wraps each configured [`ChatProvider`] with its own rate limiter,
//! concurrency semaphore and circuit breaker, and tries providers in
//! priority order on failure or an open breaker.

use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::provider::{ChatProvider, CompletionRequest, CompletionResult};
use crate::rate_limiter::TokenBucket;
use catnorm_protocol::{LlmErrorKind, METRICS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Rolling reliability stats for one provider, read by the preview/status
/// surface (§4.4 "reliability score").
#[derive(Debug, Default)]
pub struct ProviderStats {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub total_latency_ms: AtomicU64,
}

impl ProviderStats {
    pub fn record_success(&self, latency: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// `successes / (successes + failures)`, 1.0 if never called.
    pub fn success_rate(&self) -> f64 {
        let s = self.successes.load(Ordering::Relaxed) as f64;
        let f = self.failures.load(Ordering::Relaxed) as f64;
        if s + f == 0.0 {
            1.0
        } else {
            s / (s + f)
        }
    }

    pub fn p50_latency_ms(&self) -> u64 {
        let s = self.successes.load(Ordering::Relaxed).max(1);
        self.total_latency_ms.load(Ordering::Relaxed) / s
    }
}

/// Static routing parameters for a provider (§6 `ProviderConfig`).
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub priority: i32,
    pub weight: f64,
    pub enabled: bool,
    pub max_concurrent: usize,
    pub rate_per_sec: f64,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub max_wait: Duration,
}

pub struct RoutedProvider {
    pub provider: Arc<dyn ChatProvider>,
    pub config: RouteConfig,
    pub stats: ProviderStats,
    bucket: TokenBucket,
    semaphore: Semaphore,
    breaker: CircuitBreaker,
}

impl RoutedProvider {
    pub fn new(provider: Arc<dyn ChatProvider>, config: RouteConfig) -> Self {
        let bucket = TokenBucket::new(config.rate_per_sec);
        let semaphore = Semaphore::new(config.max_concurrent.max(1));
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown);
        Self {
            provider,
            config,
            stats: ProviderStats::default(),
            bucket,
            semaphore,
            breaker,
        }
    }

    fn eligible(&self) -> bool {
        self.config.enabled && self.provider.is_available() && self.breaker.state() != BreakerState::Open
    }

    async fn try_once(&self, request: CompletionRequest, cancel: &catnorm_protocol::CancellationToken) -> Result<CompletionResult, LlmErrorKind> {
        if self.breaker.state() == BreakerState::Open {
            return Err(LlmErrorKind::CircuitOpen);
        }

        if !self.bucket.acquire(self.config.max_wait).await {
            return Err(LlmErrorKind::RateLimited);
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmErrorKind::ProviderUnavailable)?;

        METRICS.inc_llm_calls();
        let result = self.provider.complete(request, cancel).await;
        match &result {
            Ok(r) => {
                self.stats.record_success(r.latency);
                self.breaker.record_success();
            }
            Err(LlmErrorKind::Cancelled) => {}
            Err(_) => {
                self.stats.record_failure();
                self.breaker.record_failure();
            }
        }
        result
    }
}

/// Tries every enabled, breaker-closed provider in descending priority
/// order (ties broken by registration order), falling over to the next
/// on failure (§4.4 "Multi-provider router").
pub struct ProviderRouter {
    providers: Vec<RoutedProvider>,
}

impl ProviderRouter {
    pub fn new(mut providers: Vec<RoutedProvider>) -> Self {
        providers.sort_by(|a, b| b.config.priority.cmp(&a.config.priority));
        Self { providers }
    }

    pub fn providers(&self) -> &[RoutedProvider] {
        &self.providers
    }

    /// Route `request` to the highest-priority eligible provider, retrying
    /// transient failures via [`crate::retry::retry_with_backoff`] before
    /// falling over to the next provider.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        max_attempts: u32,
        cancel: &catnorm_protocol::CancellationToken,
    ) -> Result<CompletionResult, LlmErrorKind> {
        let mut last_error = LlmErrorKind::ProviderUnavailable;
        let mut tried_any = false;

        for routed in &self.providers {
            if !routed.eligible() {
                continue;
            }
            tried_any = true;
            debug!(provider = routed.provider.name(), "routing completion request");

            let outcome = crate::retry::retry_with_backoff(max_attempts, || {
                routed.try_once(request.clone(), cancel)
            })
            .await;

            match outcome {
                Ok(result) => return Ok(result),
                Err(LlmErrorKind::Cancelled) => return Err(LlmErrorKind::Cancelled),
                Err(err) => {
                    warn!(provider = routed.provider.name(), error = %err, "provider failed, trying next");
                    last_error = err;
                }
            }
        }

        if !tried_any {
            return Err(LlmErrorKind::ProviderUnavailable);
        }
        Err(last_error)
    }
}

/// Gateway-wide knobs that are not per-provider (§4.4).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_attempts: u32,
    pub cache_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Entry point the AI stage (§4.5 step 3) calls into: a [`ProviderRouter`]
/// plus an optional read-through [`crate::cache::ResponseCache`], so
/// identical `(provider, model, prompt)` requests within the TTL window
/// never hit the network twice.
pub struct LlmGateway {
    router: ProviderRouter,
    cache: crate::cache::ResponseCache,
    config: GatewayConfig,
}

impl LlmGateway {
    pub fn new(router: ProviderRouter, config: GatewayConfig) -> Self {
        let cache = crate::cache::ResponseCache::new(config.cache_ttl);
        Self {
            router,
            cache,
            config,
        }
    }

    pub fn providers(&self) -> &[RoutedProvider] {
        self.router.providers()
    }

    /// Resolve `request`, serving from cache when a fresh entry exists for
    /// the eligible primary provider's name, else routing live and caching
    /// the result under that provider's name on success.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &catnorm_protocol::CancellationToken,
    ) -> Result<CompletionResult, LlmErrorKind> {
        let prompt_hash = crate::cache::ResponseCache::hash_prompt(
            &request
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );

        if let Some(primary) = self.router.providers().iter().find(|p| p.eligible()) {
            if let Some(hit) = self.cache.get(primary.provider.name(), &request.model, prompt_hash) {
                debug!(provider = primary.provider.name(), "response cache hit");
                return Ok(hit);
            }
        }

        let result = self
            .router
            .complete(request.clone(), self.config.max_attempts, cancel)
            .await?;

        if let Some(primary) = self.router.providers().iter().find(|p| p.eligible()) {
            self.cache
                .put(primary.provider.name(), &request.model, prompt_hash, result.clone());
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn route_config() -> RouteConfig {
        RouteConfig {
            priority: 0,
            weight: 1.0,
            enabled: true,
            max_concurrent: 2,
            rate_per_sec: 100.0,
            breaker_threshold: 2,
            breaker_cooldown: Duration::from_millis(10),
            max_wait: Duration::from_millis(50),
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "generic-chat-v1".to_string(),
            messages: vec![catnorm_protocol::ChatMessage::user("hi")],
            max_tokens: 8,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn falls_over_to_second_provider_on_failure() {
        let primary = Arc::new(MockProvider::new(
            "primary",
            vec![Err(LlmErrorKind::AuthFailed)],
        ));
        let secondary = Arc::new(MockProvider::new(
            "secondary",
            vec![Ok(MockProvider::success("from secondary"))],
        ));

        let router = ProviderRouter::new(vec![
            RoutedProvider::new(primary, RouteConfig { priority: 10, ..route_config() }),
            RoutedProvider::new(secondary, RouteConfig { priority: 5, ..route_config() }),
        ]);

        let cancel = catnorm_protocol::CancellationToken::new();
        let result = router.complete(request(), 1, &cancel).await.unwrap();
        assert_eq!(result.text, "from secondary");
    }

    #[tokio::test]
    async fn open_breaker_skips_provider() {
        let primary = Arc::new(MockProvider::new(
            "primary",
            vec![Err(LlmErrorKind::ProviderUnavailable), Err(LlmErrorKind::ProviderUnavailable)],
        ));
        let secondary = Arc::new(MockProvider::new(
            "secondary",
            vec![Ok(MockProvider::success("ok"))],
        ));

        let router = ProviderRouter::new(vec![
            RoutedProvider::new(
                primary,
                RouteConfig {
                    priority: 10,
                    breaker_threshold: 1,
                    ..route_config()
                },
            ),
            RoutedProvider::new(secondary, RouteConfig { priority: 5, ..route_config() }),
        ]);

        let cancel = catnorm_protocol::CancellationToken::new();
        // First call trips the primary's breaker and falls over.
        let first = router.complete(request(), 1, &cancel).await.unwrap();
        assert_eq!(first.text, "ok");
    }

    #[tokio::test]
    async fn no_eligible_providers_yields_provider_unavailable() {
        let disabled = Arc::new(MockProvider::new("disabled", vec![]));
        let router = ProviderRouter::new(vec![RoutedProvider::new(
            disabled,
            RouteConfig { enabled: false, ..route_config() },
        )]);
        let cancel = catnorm_protocol::CancellationToken::new();
        let err = router.complete(request(), 1, &cancel).await.unwrap_err();
        assert_eq!(err, LlmErrorKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn gateway_caches_repeat_requests() {
        let provider = Arc::new(MockProvider::new(
            "primary",
            vec![Ok(MockProvider::success("computed"))],
        ));
        let router = ProviderRouter::new(vec![RoutedProvider::new(provider, route_config())]);
        let gateway = LlmGateway::new(router, GatewayConfig::default());
        let cancel = catnorm_protocol::CancellationToken::new();

        let first = gateway.complete(request(), &cancel).await.unwrap();
        assert_eq!(first.text, "computed");

        // Second call would fail (mock queue is empty); a cache hit avoids that.
        let second = gateway.complete(request(), &cancel).await.unwrap();
        assert_eq!(second.text, "computed");
    }
}
