use serde::{Deserialize, Serialize};

use gearcrm_core::DealId;

/// Inputs for a merchant prospecting report.
#[derive(Debug, Clone, PartialEq)]
pub struct MerchantReportRequest {
    pub deal_id: DealId,
    pub merchant_name: String,
    pub monthly_volume_cents: i64,
}

/// Prospecting insight for one merchant.
///
/// An insight payload for display and caching, not a domain entity. It is
/// served to clients verbatim, hence the camelCase field names on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantReport {
    pub merchant_name: String,
    /// Coarse business segment the merchant most likely belongs to.
    pub segment: String,
    pub estimated_annual_volume_cents: i64,
    /// Processor the merchant is most likely on today.
    pub competitor_processor: String,
    pub talking_points: Vec<String>,
}

/// Raw statement text submitted for analysis.
///
/// Serialized as the background job's input payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementInput {
    pub deal_id: DealId,
    pub statement_text: String,
}

/// Outcome of analyzing a merchant's card-processing statement.
///
/// Stored as the job's result payload and served to clients verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementAnalysis {
    /// Effective rate the merchant pays today, in basis points.
    pub current_effective_rate_bps: u32,
    /// Rate we would quote, in basis points.
    pub proposed_rate_bps: u32,
    pub monthly_savings_cents: i64,
    pub line_items_parsed: u32,
    pub warnings: Vec<String>,
}
