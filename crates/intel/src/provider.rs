use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{MerchantReport, MerchantReportRequest, StatementAnalysis, StatementInput};

/// Failure from the intelligence boundary.
///
/// Crossing the cache boundary this surfaces as a compute failure; job code
/// records it as the job's error message. Neither path retries here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntelError {
    /// The request could not be analyzed as given (caller-correctable).
    #[error("invalid intel input: {0}")]
    InvalidInput(String),

    /// The upstream service failed or answered unusably.
    #[error("intel upstream failed: {0}")]
    Upstream(String),

    /// The per-call deadline elapsed.
    #[error("intel call `{stage}` timed out after {after_ms}ms")]
    Timeout { stage: &'static str, after_ms: u64 },
}

impl IntelError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn timeout(stage: &'static str, after: Duration) -> Self {
        Self::Timeout {
            stage,
            after_ms: after.as_millis() as u64,
        }
    }
}

/// The third-party analysis service, seen as a black box.
///
/// Implementations own their transport; callers inject one instance at
/// startup and share it (no module-level singletons).
#[async_trait]
pub trait IntelProvider: Send + Sync + 'static {
    async fn merchant_report(
        &self,
        request: &MerchantReportRequest,
    ) -> Result<MerchantReport, IntelError>;

    async fn analyze_statement(
        &self,
        input: &StatementInput,
    ) -> Result<StatementAnalysis, IntelError>;
}

#[async_trait]
impl<P> IntelProvider for Arc<P>
where
    P: IntelProvider + ?Sized,
{
    async fn merchant_report(
        &self,
        request: &MerchantReportRequest,
    ) -> Result<MerchantReport, IntelError> {
        (**self).merchant_report(request).await
    }

    async fn analyze_statement(
        &self,
        input: &StatementInput,
    ) -> Result<StatementAnalysis, IntelError> {
        (**self).analyze_statement(input).await
    }
}

/// Decorator enforcing a per-call deadline on an inner provider.
///
/// Long-running job stages wrap their provider in this so a hung upstream
/// fails the stage explicitly instead of leaving the job processing forever.
#[derive(Debug, Clone)]
pub struct TimeoutIntelProvider<P> {
    inner: P,
    per_call: Duration,
}

impl<P> TimeoutIntelProvider<P> {
    pub fn new(inner: P, per_call: Duration) -> Self {
        Self { inner, per_call }
    }
}

#[async_trait]
impl<P> IntelProvider for TimeoutIntelProvider<P>
where
    P: IntelProvider,
{
    async fn merchant_report(
        &self,
        request: &MerchantReportRequest,
    ) -> Result<MerchantReport, IntelError> {
        match tokio::time::timeout(self.per_call, self.inner.merchant_report(request)).await {
            Ok(result) => result,
            Err(_) => Err(IntelError::timeout("merchant_report", self.per_call)),
        }
    }

    async fn analyze_statement(
        &self,
        input: &StatementInput,
    ) -> Result<StatementAnalysis, IntelError> {
        match tokio::time::timeout(self.per_call, self.inner.analyze_statement(input)).await {
            Ok(result) => result,
            Err(_) => Err(IntelError::timeout("statement_analysis", self.per_call)),
        }
    }
}
