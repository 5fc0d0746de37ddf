//! Query shapes for listing deals: sort allow-list, filter allow-list, and
//! the keyset page request both store backends accept.
//!
//! Sort fields and filters are closed enums. Client input is parsed into
//! these shapes at the API boundary and only the enum's own column mapping
//! ever reaches SQL text; client strings are never interpolated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use gearcrm_core::{
    Cursor, DealId, DomainError, DomainResult, FilterOp, PageLimit, PageResult, RepId,
    SortDirection, SortValueKind,
};

use crate::deals::types::{Deal, DealStage};

/// Sortable deal columns. Anything not listed here cannot be sorted by.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealSortField {
    CreatedAt,
    UpdatedAt,
    MerchantName,
    MonthlyVolume,
}

impl DealSortField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::MerchantName => "merchant_name",
            Self::MonthlyVolume => "monthly_volume",
        }
    }

    /// The storage column backing this sort field.
    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::MerchantName => "merchant_name",
            Self::MonthlyVolume => "monthly_volume_cents",
        }
    }

    /// SQL expression used in ORDER BY and keyset predicates. Text sorts pin
    /// the "C" collation so SQL ordering agrees with the codec's bytewise
    /// comparison regardless of database locale.
    pub fn order_expr(self) -> &'static str {
        match self {
            Self::MerchantName => "merchant_name COLLATE \"C\"",
            other => other.column(),
        }
    }

    /// Value type carried in cursors minted for this field.
    pub fn kind(self) -> SortValueKind {
        match self {
            Self::CreatedAt | Self::UpdatedAt => SortValueKind::Timestamp,
            Self::MerchantName => SortValueKind::Text,
            Self::MonthlyVolume => SortValueKind::Integer,
        }
    }
}

impl core::str::FromStr for DealSortField {
    type Err = DomainError;

    /// Accepts both the canonical snake_case name and the camelCase spelling
    /// query strings arrive in.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" | "createdAt" => Ok(Self::CreatedAt),
            "updated_at" | "updatedAt" => Ok(Self::UpdatedAt),
            "merchant_name" | "merchantName" => Ok(Self::MerchantName),
            "monthly_volume" | "monthlyVolume" => Ok(Self::MonthlyVolume),
            other => Err(DomainError::validation(format!(
                "cannot sort deals by `{other}`"
            ))),
        }
    }
}

/// A parsed `sort=<field>:<asc|desc>` query parameter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DealSort {
    pub field: DealSortField,
    pub direction: SortDirection,
}

impl Default for DealSort {
    /// Newest first, the listing default.
    fn default() -> Self {
        Self {
            field: DealSortField::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

impl DealSort {
    /// Parse the `field:direction` query form. A bare `field` defaults to
    /// descending, matching the listing default.
    pub fn parse(spec: &str) -> DomainResult<Self> {
        let (field, direction) = match spec.split_once(':') {
            Some((field, direction)) => (field, direction.parse()?),
            None => (spec, SortDirection::Desc),
        };
        Ok(Self {
            field: field.parse()?,
            direction,
        })
    }
}

/// A validated filter predicate. Each variant fixes its column and operator;
/// only the value varies, and it is always bound, never spliced.
#[derive(Debug, Clone, PartialEq)]
pub enum DealFilter {
    Stage(DealStage),
    Rep(RepId),
    MinMonthlyVolume(i64),
    MaxMonthlyVolume(i64),
    MerchantNameContains(String),
}

impl DealFilter {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Stage(_) => "stage",
            Self::Rep(_) => "rep_id",
            Self::MinMonthlyVolume(_) | Self::MaxMonthlyVolume(_) => "monthly_volume_cents",
            Self::MerchantNameContains(_) => "merchant_name",
        }
    }

    pub fn op(&self) -> FilterOp {
        match self {
            Self::Stage(_) | Self::Rep(_) => FilterOp::Eq,
            Self::MinMonthlyVolume(_) => FilterOp::Gte,
            Self::MaxMonthlyVolume(_) => FilterOp::Lte,
            Self::MerchantNameContains(_) => FilterOp::Contains,
        }
    }

    /// In-memory evaluation. `MerchantNameContains` is case-insensitive to
    /// match the ILIKE the SQL backend uses.
    pub fn matches(&self, deal: &Deal) -> bool {
        match self {
            Self::Stage(stage) => deal.stage == *stage,
            Self::Rep(rep) => deal.rep_id == *rep,
            Self::MinMonthlyVolume(min) => deal.monthly_volume_cents >= *min,
            Self::MaxMonthlyVolume(max) => deal.monthly_volume_cents <= *max,
            Self::MerchantNameContains(needle) => deal
                .merchant_name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

/// One keyset page over the deal list.
#[derive(Debug, Clone, Default)]
pub struct DealPageRequest {
    pub limit: PageLimit,
    pub cursor: Option<Cursor>,
    pub sort: DealSort,
    pub filters: Vec<DealFilter>,
}

impl DealPageRequest {
    /// Reject cursors that do not belong to this sort. A token minted under
    /// one ordering resumed under another would silently skip or repeat rows,
    /// so the mismatch is a client error instead.
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(cursor) = &self.cursor {
            if cursor.sort_value.kind() != self.sort.field.kind() {
                return Err(DomainError::validation(format!(
                    "cursor carries a {} position but the requested sort is by {}",
                    cursor.sort_value.kind(),
                    self.sort.field.as_str(),
                )));
            }
            if cursor.direction != self.sort.direction {
                return Err(DomainError::validation(
                    "cursor direction does not match the requested sort direction",
                ));
            }
        }
        Ok(())
    }

    /// Mint the cursor for `deal` as the last row of a page under this sort.
    pub fn cursor_for(&self, deal: &Deal) -> Cursor {
        Cursor::new(
            deal.sort_value(self.sort.field),
            deal.id.into(),
            self.sort.direction,
        )
    }
}

/// One page of the pipeline board: every stage gets a column, each paged
/// independently, newest deals first.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    /// Page size applied to every stage column.
    pub per_stage: PageLimit,
    /// Resume positions keyed by stage; absent stages start from the top.
    pub cursors: HashMap<DealStage, Cursor>,
    /// Optional rep scope across all columns.
    pub rep: Option<RepId>,
}

impl PipelineRequest {
    /// The page request backing a single stage column.
    pub fn column_request(&self, stage: DealStage) -> DealPageRequest {
        let mut filters = vec![DealFilter::Stage(stage)];
        if let Some(rep) = self.rep {
            filters.push(DealFilter::Rep(rep));
        }
        DealPageRequest {
            limit: self.per_stage,
            cursor: self.cursors.get(&stage).cloned(),
            sort: DealSort {
                field: DealSortField::CreatedAt,
                direction: SortDirection::Desc,
            },
            filters,
        }
    }
}

/// A stage column of the pipeline board.
#[derive(Debug, Clone)]
pub struct PipelineColumn {
    pub stage: DealStage,
    pub page: PageResult<Deal>,
}

/// The board itself: one column per stage, in pipeline order.
#[derive(Debug, Clone)]
pub struct PipelinePage {
    pub columns: Vec<PipelineColumn>,
}

/// Compare two deals under a sort field, ascending, with the id as the
/// tie-break. Both store backends order pages by exactly this key.
pub fn compare_deals(a: &Deal, b: &Deal, field: DealSortField) -> core::cmp::Ordering {
    let by_field = match field {
        DealSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        DealSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        DealSortField::MerchantName => a.merchant_name.cmp(&b.merchant_name),
        DealSortField::MonthlyVolume => a.monthly_volume_cents.cmp(&b.monthly_volume_cents),
    };
    by_field.then_with(|| DealId::cmp(&a.id, &b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gearcrm_core::SortValue;
    use uuid::Uuid;

    fn deal(name: &str, volume: i64) -> Deal {
        Deal {
            id: DealId::new(),
            merchant_name: name.to_owned(),
            stage: DealStage::Quoted,
            monthly_volume_cents: volume,
            rep_id: RepId::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sort_parses_field_and_direction() {
        let sort = DealSort::parse("monthly_volume:asc").unwrap();
        assert_eq!(sort.field, DealSortField::MonthlyVolume);
        assert_eq!(sort.direction, SortDirection::Asc);

        let bare = DealSort::parse("merchant_name").unwrap();
        assert_eq!(bare.field, DealSortField::MerchantName);
        assert_eq!(bare.direction, SortDirection::Desc);

        let camel = DealSort::parse("monthlyVolume:asc").unwrap();
        assert_eq!(camel.field, DealSortField::MonthlyVolume);
    }

    #[test]
    fn sort_rejects_unlisted_fields() {
        assert!(DealSort::parse("rep_id:asc").is_err());
        assert!(DealSort::parse("id; DROP TABLE deals").is_err());
        assert!(DealSort::parse("created_at:sideways").is_err());
    }

    #[test]
    fn filters_match_in_memory() {
        let d = deal("Apex Auto Body", 80_000);
        assert!(DealFilter::Stage(DealStage::Quoted).matches(&d));
        assert!(!DealFilter::Stage(DealStage::Lead).matches(&d));
        assert!(DealFilter::MinMonthlyVolume(80_000).matches(&d));
        assert!(!DealFilter::MinMonthlyVolume(80_001).matches(&d));
        assert!(DealFilter::MaxMonthlyVolume(80_000).matches(&d));
        assert!(DealFilter::MerchantNameContains("apex".into()).matches(&d));
        assert!(!DealFilter::MerchantNameContains("tire".into()).matches(&d));
    }

    #[test]
    fn validate_rejects_cursor_from_another_sort() {
        let request = DealPageRequest {
            sort: DealSort::parse("created_at:desc").unwrap(),
            cursor: Some(Cursor::new(
                SortValue::Integer(42),
                Uuid::now_v7(),
                SortDirection::Desc,
            )),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn validate_rejects_cursor_with_flipped_direction() {
        let request = DealPageRequest {
            sort: DealSort::parse("monthly_volume:asc").unwrap(),
            cursor: Some(Cursor::new(
                SortValue::Integer(42),
                Uuid::now_v7(),
                SortDirection::Desc,
            )),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn column_request_scopes_stage_and_rep() {
        let rep = RepId::new();
        let request = PipelineRequest {
            per_stage: PageLimit::new(Some(5)),
            cursors: HashMap::new(),
            rep: Some(rep),
        };
        let column = request.column_request(DealStage::Signed);
        assert_eq!(column.limit.get(), 5);
        assert!(column.filters.contains(&DealFilter::Stage(DealStage::Signed)));
        assert!(column.filters.contains(&DealFilter::Rep(rep)));
        assert_eq!(column.sort.field, DealSortField::CreatedAt);
        assert_eq!(column.sort.direction, SortDirection::Desc);
    }

    #[test]
    fn compare_breaks_ties_by_id() {
        let mut a = deal("Same Name", 10);
        let mut b = deal("Same Name", 10);
        let now = Utc::now();
        a.created_at = now;
        b.created_at = now;
        let expected = DealId::cmp(&a.id, &b.id);
        assert_eq!(compare_deals(&a, &b, DealSortField::CreatedAt), expected);
        assert_eq!(compare_deals(&a, &b, DealSortField::MerchantName), expected);
    }
}
