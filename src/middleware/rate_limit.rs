//! Rate limiting as a tower layer.
//!
//! Runs before everything except CORS so an over-budget client is turned
//! away before CSRF or authentication spend any work. The `X-RateLimit-*`
//! headers are stamped on every response, allowed or not.

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::error::SecurityError;
use crate::services::rate_limit::{client_ip, RateDecision, RateLimiter};

/// Layer applying [`RateLimitService`].
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
}

impl RateLimitLayer {
    /// Create a layer around a limiter.
    #[must_use]
    pub const fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Middleware counting each request against its client's window.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let ip = client_ip(req.headers());

            match limiter.record(&ip).await {
                Ok(decision) if decision.allowed => {
                    let mut response = inner.call(req).await?;
                    stamp_headers(response.headers_mut(), &decision);
                    Ok(response)
                }
                Ok(decision) => {
                    tracing::warn!(%ip, limit = decision.limit, "rate limit exceeded");
                    let mut response = SecurityError::RateLimited {
                        retry_after_secs: decision.reset_secs,
                    }
                    .into_response();
                    stamp_headers(response.headers_mut(), &decision);
                    Ok(response)
                }
                Err(error) => Ok(error.into_response()),
            }
        })
    }
}

fn stamp_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    let pairs = [
        ("x-ratelimit-limit", decision.limit),
        ("x-ratelimit-remaining", decision.remaining),
        ("x-ratelimit-reset", decision.reset_secs),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name, value);
        }
    }
}
