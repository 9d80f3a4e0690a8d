//! Ordered provider fallback.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rota_core::Coordinates;
use thiserror::Error;
use tracing::instrument;

use super::GeocodeRequest;
use super::provider::{GeocodingProvider, ProviderError};

/// First successful provider answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHit {
    pub coordinates: Coordinates,
    pub provider: &'static str,
    /// Provider calls made, rate-limit retries included
    pub calls: u32,
}

/// One provider's last failure.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: &'static str,
    pub error: ProviderError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("all providers failed: {}", join_failures(.attempts))]
    Exhausted {
        attempts: Vec<ProviderFailure>,
        /// Provider calls made, rate-limit retries included
        calls: u32,
    },
}

impl ChainError {
    /// Provider calls made before giving up.
    #[must_use]
    pub const fn provider_calls(&self) -> u32 {
        match self {
            Self::Exhausted { calls, .. } => *calls,
        }
    }
}

fn join_failures(attempts: &[ProviderFailure]) -> String {
    if attempts.is_empty() {
        return "no providers configured".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Providers tried in a fixed order until one yields coordinates.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn GeocodingProvider>>,
    timeout: Duration,
    rate_limit_backoff: Duration,
    rate_limit_retries: u32,
}

impl ProviderChain {
    #[must_use]
    pub fn new(timeout: Duration, rate_limit_backoff: Duration, rate_limit_retries: u32) -> Self {
        Self {
            providers: Vec::new(),
            timeout,
            rate_limit_backoff,
            rate_limit_retries,
        }
    }

    /// Append a provider after the existing ones.
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn GeocodingProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve `request` with the first provider that succeeds.
    ///
    /// # Errors
    ///
    /// Returns `ChainError::Exhausted` with every provider's failure when
    /// none of them produced coordinates inside Brazil.
    #[instrument(skip(self, request), fields(query = %request.query))]
    pub async fn geocode(&self, request: &GeocodeRequest) -> Result<ProviderHit, ChainError> {
        let mut attempts = Vec::with_capacity(self.providers.len());
        let mut calls = 0;

        for provider in &self.providers {
            let name = provider.name();
            let mut retries = 0;

            let error = loop {
                calls += 1;
                match self.call(provider.as_ref(), request).await {
                    Ok(coordinates) => {
                        tracing::debug!(provider = name, %coordinates, "Provider resolved address");
                        return Ok(ProviderHit {
                            coordinates,
                            provider: name,
                            calls,
                        });
                    }
                    Err(ProviderError::RateLimited) if retries < self.rate_limit_retries => {
                        retries += 1;
                        tracing::warn!(
                            provider = name,
                            retries,
                            backoff_ms = self.rate_limit_backoff.as_millis(),
                            "Provider rate limited, backing off"
                        );
                        tokio::time::sleep(self.rate_limit_backoff).await;
                    }
                    Err(e) => break e,
                }
            };

            tracing::debug!(provider = name, error = %error, "Provider failed, trying next");
            attempts.push(ProviderFailure {
                provider: name,
                error,
            });
        }

        Err(ChainError::Exhausted { attempts, calls })
    }

    async fn call(
        &self,
        provider: &dyn GeocodingProvider,
        request: &GeocodeRequest,
    ) -> Result<Coordinates, ProviderError> {
        let coordinates = tokio::time::timeout(self.timeout, provider.geocode(request))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;

        if coordinates.is_within_brazil() {
            Ok(coordinates)
        } else {
            Err(ProviderError::OutOfBounds(coordinates))
        }
    }
}

impl fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderChain")
            .field("providers", &self.provider_names())
            .field("timeout", &self.timeout)
            .field("rate_limit_backoff", &self.rate_limit_backoff)
            .field("rate_limit_retries", &self.rate_limit_retries)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Clone, Copy)]
    enum Answer {
        Fortaleza,
        Lisbon,
        RateLimited,
        NoResult,
    }

    impl Answer {
        fn resolve(self) -> Result<Coordinates, ProviderError> {
            match self {
                Self::Fortaleza => Ok(Coordinates::new(-3.73, -38.52)),
                Self::Lisbon => Ok(Coordinates::new(38.72, -9.14)),
                Self::RateLimited => Err(ProviderError::RateLimited),
                Self::NoResult => Err(ProviderError::NoResult),
            }
        }
    }

    /// Replays a fixed sequence of answers, then keeps repeating the last.
    struct Scripted {
        name: &'static str,
        answers: Vec<Answer>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(name: &'static str, answers: &[Answer]) -> Arc<Self> {
            Arc::new(Self {
                name,
                answers: answers.to_vec(),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeocodingProvider for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn geocode(&self, _request: &GeocodeRequest) -> Result<Coordinates, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.answers
                .get(n)
                .or_else(|| self.answers.last())
                .unwrap()
                .resolve()
        }
    }

    fn request() -> GeocodeRequest {
        GeocodeRequest {
            query: "Rua A, 10, Fortaleza, CE, Brasil".to_string(),
            cache_key: "rua a, 10, fortaleza, ce, brasil".to_string(),
            postal_code: None,
            city: Some("Fortaleza".to_string()),
            state: Some("CE".to_string()),
        }
    }

    fn chain() -> ProviderChain {
        ProviderChain::new(Duration::from_millis(200), Duration::from_millis(1), 3)
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let first = Scripted::new("first", &[Answer::Fortaleza]);
        let second = Scripted::new("second", &[Answer::Fortaleza]);
        let chain = chain().with(first.clone()).with(second.clone());

        let hit = chain.geocode(&request()).await.unwrap();
        assert_eq!(hit.provider, "first");
        assert_eq!(hit.calls, 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_bounds_falls_through() {
        let first = Scripted::new("first", &[Answer::Lisbon]);
        let second = Scripted::new("second", &[Answer::Fortaleza]);
        let chain = chain().with(first).with(second);

        let hit = chain.geocode(&request()).await.unwrap();
        assert_eq!(hit.provider, "second");
    }

    #[tokio::test]
    async fn test_rate_limit_retries_same_provider() {
        let first = Scripted::new("first", &[Answer::RateLimited, Answer::RateLimited, Answer::Fortaleza]);
        let second = Scripted::new("second", &[Answer::Fortaleza]);
        let chain = chain().with(first.clone()).with(second.clone());

        let hit = chain.geocode(&request()).await.unwrap();
        assert_eq!(hit.provider, "first");
        assert_eq!(first.calls(), 3);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_are_bounded() {
        let first = Scripted::new("first", &[Answer::RateLimited]);
        let second = Scripted::new("second", &[Answer::NoResult]);
        let chain = chain().with(first.clone()).with(second.clone());

        let err = chain.geocode(&request()).await.unwrap_err();
        // One call plus three retries
        assert_eq!(first.calls(), 4);
        assert_eq!(second.calls(), 1);

        let ChainError::Exhausted { attempts, calls } = err;
        assert_eq!(calls, 5);
        assert_eq!(attempts.len(), 2);
        assert!(matches!(attempts[0].error, ProviderError::RateLimited));
        assert!(matches!(attempts[1].error, ProviderError::NoResult));
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let err = chain().geocode(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "all providers failed: no providers configured");
    }
}
