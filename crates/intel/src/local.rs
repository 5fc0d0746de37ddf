use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{IntelError, IntelProvider};
use crate::types::{MerchantReport, MerchantReportRequest, StatementAnalysis, StatementInput};

const SEGMENTS: &[&str] = &[
    "general auto repair",
    "tire and wheel",
    "collision center",
    "quick lube",
    "dealership service department",
];

const COMPETITORS: &[&str] = &["First Data", "Worldpay", "Heartland", "TSYS", "Elavon"];

/// Deterministic in-process provider.
///
/// Stands in for the hosted analysis service in tests and in-memory wiring.
/// Model:
/// - All numbers derive from an FNV-1a hash of the input text, so identical
///   inputs always produce identical insights.
/// - Statement analysis bounds the inferred current rate to 240..=380 bps and
///   always proposes a lower rate, mirroring the shape of real output.
///
/// Knobs for exercising failure paths: an artificial per-call latency and a
/// runtime failure toggle.
#[derive(Debug, Default)]
pub struct LocalIntelProvider {
    latency: Duration,
    failing: AtomicBool,
}

impl LocalIntelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Flip the provider into (or out of) a failing state; subsequent calls
    /// return an upstream error until flipped back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    async fn simulate_call(&self) -> Result<(), IntelError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(IntelError::upstream("intel service unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl IntelProvider for LocalIntelProvider {
    async fn merchant_report(
        &self,
        request: &MerchantReportRequest,
    ) -> Result<MerchantReport, IntelError> {
        self.simulate_call().await?;

        if request.merchant_name.trim().is_empty() {
            return Err(IntelError::invalid_input("merchant name is empty"));
        }

        let h = fnv1a(request.merchant_name.as_bytes());
        let segment = SEGMENTS[(h % SEGMENTS.len() as u64) as usize];
        let competitor = COMPETITORS[((h >> 8) % COMPETITORS.len() as u64) as usize];

        // Seasonal adjustment in -10%..=+10%, derived from the name hash.
        let adjustment_pct = ((h >> 16) % 21) as i64 - 10;
        let estimated_annual =
            request.monthly_volume_cents * 12 * (100 + adjustment_pct) / 100;

        let volume_band = if request.monthly_volume_cents >= 5_000_000 {
            "a high-volume shop; interchange optimization is the lead story"
        } else if request.monthly_volume_cents >= 1_500_000 {
            "a mid-volume shop; flat-rate overpayment is the usual wedge"
        } else {
            "a smaller shop; emphasize no-monthly-minimum pricing"
        };

        Ok(MerchantReport {
            merchant_name: request.merchant_name.clone(),
            segment: segment.to_owned(),
            estimated_annual_volume_cents: estimated_annual,
            competitor_processor: competitor.to_owned(),
            talking_points: vec![
                format!("Likely segment: {segment}, currently on {competitor}."),
                format!("This is {volume_band}."),
            ],
        })
    }

    async fn analyze_statement(
        &self,
        input: &StatementInput,
    ) -> Result<StatementAnalysis, IntelError> {
        self.simulate_call().await?;

        let text = input.statement_text.trim();
        if text.is_empty() {
            return Err(IntelError::invalid_input("statement text is empty"));
        }

        let line_items_parsed = text
            .lines()
            .filter(|line| line.chars().any(|c| c.is_ascii_digit()))
            .count() as u32;

        let h = fnv1a(text.as_bytes());
        let current_bps = 240 + (h % 141) as u32;
        let margin_bps = 35 + ((h >> 16) % 56) as u32;
        let inferred_monthly_volume_cents = 2_500_000 + ((h >> 24) % 8_000_000) as i64;
        let monthly_savings_cents =
            inferred_monthly_volume_cents * i64::from(margin_bps) / 10_000;

        let mut warnings = Vec::new();
        if line_items_parsed < 3 {
            warnings.push("too few priced line items; rate attribution is approximate".to_owned());
        }
        if text.len() < 200 {
            warnings.push("statement sample is short; totals may be incomplete".to_owned());
        }

        Ok(StatementAnalysis {
            current_effective_rate_bps: current_bps,
            proposed_rate_bps: current_bps - margin_bps,
            monthly_savings_cents,
            line_items_parsed,
            warnings,
        })
    }
}

/// FNV-1a, 64-bit. Stable across runs and platforms.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TimeoutIntelProvider;
    use gearcrm_core::DealId;

    fn report_request() -> MerchantReportRequest {
        MerchantReportRequest {
            deal_id: DealId::new(),
            merchant_name: "Hilltop Transmission".to_owned(),
            monthly_volume_cents: 3_200_000,
        }
    }

    fn statement() -> StatementInput {
        StatementInput {
            deal_id: DealId::new(),
            statement_text: concat!(
                "MERCHANT STATEMENT - JULY\n",
                "Visa CPS Retail        412 items   $18,204.11\n",
                "MC Merit III           298 items   $12,977.40\n",
                "Discover PSL           41 items    $1,801.22\n",
                "Monthly service fee    $49.95\n",
                "PCI non-compliance     $19.95\n",
            )
            .to_owned(),
        }
    }

    #[tokio::test]
    async fn merchant_report_is_deterministic() {
        let provider = LocalIntelProvider::new();
        let request = report_request();
        let first = provider.merchant_report(&request).await.unwrap();
        let second = provider.merchant_report(&request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn merchant_report_rejects_empty_name() {
        let provider = LocalIntelProvider::new();
        let mut request = report_request();
        request.merchant_name = "   ".to_owned();
        let err = provider.merchant_report(&request).await.unwrap_err();
        assert!(matches!(err, IntelError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn statement_analysis_stays_in_model_bounds() {
        let provider = LocalIntelProvider::new();
        let analysis = provider.analyze_statement(&statement()).await.unwrap();

        assert!((240..=380).contains(&analysis.current_effective_rate_bps));
        assert!(analysis.proposed_rate_bps < analysis.current_effective_rate_bps);
        assert!(analysis.monthly_savings_cents > 0);
        assert_eq!(analysis.line_items_parsed, 5);
    }

    #[tokio::test]
    async fn empty_statement_is_invalid_input() {
        let provider = LocalIntelProvider::new();
        let input = StatementInput {
            deal_id: DealId::new(),
            statement_text: "\n  \n".to_owned(),
        };
        let err = provider.analyze_statement(&input).await.unwrap_err();
        assert!(matches!(err, IntelError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn failure_toggle_surfaces_upstream_error() {
        let provider = LocalIntelProvider::new();
        provider.set_failing(true);
        let err = provider.merchant_report(&report_request()).await.unwrap_err();
        assert!(matches!(err, IntelError::Upstream(_)));

        provider.set_failing(false);
        assert!(provider.merchant_report(&report_request()).await.is_ok());
    }

    #[tokio::test]
    async fn timeout_decorator_cuts_off_slow_calls() {
        let slow = LocalIntelProvider::new().with_latency(Duration::from_millis(80));
        let wrapped = TimeoutIntelProvider::new(slow, Duration::from_millis(10));

        let err = wrapped.merchant_report(&report_request()).await.unwrap_err();
        assert!(matches!(err, IntelError::Timeout { stage: "merchant_report", .. }));
    }

    #[tokio::test]
    async fn timeout_decorator_passes_fast_calls_through() {
        let fast = LocalIntelProvider::new();
        let wrapped = TimeoutIntelProvider::new(fast, Duration::from_millis(500));
        assert!(wrapped.analyze_statement(&statement()).await.is_ok());
    }
}
