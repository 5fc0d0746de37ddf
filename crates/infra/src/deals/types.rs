//! Deal records and the sales pipeline stages they move through.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use gearcrm_core::{DealId, DomainError, DomainResult, RepId, SortValue};

use crate::deals::query::DealSortField;

/// Upper bound on merchant names, matching the column width used in storage.
const MAX_MERCHANT_NAME_LEN: usize = 200;

/// Pipeline stage of a deal, ordered from first contact to installed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStage {
    Lead,
    Contacted,
    Quoted,
    Signed,
    Installed,
}

impl DealStage {
    /// All stages in pipeline order. Board views and rollups iterate this so
    /// empty stages still get a column.
    pub const ALL: [DealStage; 5] = [
        DealStage::Lead,
        DealStage::Contacted,
        DealStage::Quoted,
        DealStage::Signed,
        DealStage::Installed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Contacted => "contacted",
            Self::Quoted => "quoted",
            Self::Signed => "signed",
            Self::Installed => "installed",
        }
    }
}

impl core::fmt::Display for DealStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for DealStage {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(Self::Lead),
            "contacted" => Ok(Self::Contacted),
            "quoted" => Ok(Self::Quoted),
            "signed" => Ok(Self::Signed),
            "installed" => Ok(Self::Installed),
            other => Err(DomainError::validation(format!(
                "unknown deal stage: `{other}`"
            ))),
        }
    }
}

/// A merchant deal being worked by a field rep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub merchant_name: String,
    pub stage: DealStage,
    /// Card volume the merchant processes per month, in cents.
    pub monthly_volume_cents: i64,
    pub rep_id: RepId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// The value of this deal's sort key for `field`, as carried in cursors.
    pub fn sort_value(&self, field: DealSortField) -> SortValue {
        match field {
            DealSortField::CreatedAt => SortValue::Timestamp(self.created_at),
            DealSortField::UpdatedAt => SortValue::Timestamp(self.updated_at),
            DealSortField::MerchantName => SortValue::Text(self.merchant_name.clone()),
            DealSortField::MonthlyVolume => SortValue::Integer(self.monthly_volume_cents),
        }
    }
}

/// Input for creating a deal. Validated before it touches a store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDeal {
    pub merchant_name: String,
    pub stage: DealStage,
    pub monthly_volume_cents: i64,
    pub rep_id: RepId,
}

impl NewDeal {
    pub fn validate(&self) -> DomainResult<()> {
        let name = self.merchant_name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("merchant name must not be empty"));
        }
        if name.len() > MAX_MERCHANT_NAME_LEN {
            return Err(DomainError::validation(format!(
                "merchant name must be at most {MAX_MERCHANT_NAME_LEN} characters"
            )));
        }
        if self.monthly_volume_cents < 0 {
            return Err(DomainError::validation(
                "monthly volume must not be negative",
            ));
        }
        Ok(())
    }

    /// Materialize the deal with a fresh id. Callers validate first.
    ///
    /// Timestamps are stamped at microsecond resolution, the precision
    /// `timestamptz` stores and cursors round-trip.
    pub fn into_deal(self, now: DateTime<Utc>) -> Deal {
        let now = now.trunc_subsecs(6);
        Deal {
            id: DealId::new(),
            merchant_name: self.merchant_name.trim().to_owned(),
            stage: self.stage,
            monthly_volume_cents: self.monthly_volume_cents,
            rep_id: self.rep_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-stage aggregate used by the dashboard summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRollup {
    pub stage: DealStage,
    pub deals: u64,
    pub monthly_volume_cents: i64,
}
