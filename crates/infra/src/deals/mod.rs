//! Deal storage and keyset pagination.
//!
//! ## Design
//!
//! - Pages are keyed by `(sort field, id)`, never by offset
//! - Sortable fields and filters are closed allow-lists
//! - Cursors are minted from the last row returned and validated against the
//!   requested sort before use
//! - The pipeline board pages every stage independently under one budget
//!
//! ## Components
//!
//! - `Deal`, `DealStage`: the records and their lifecycle stages
//! - `DealStore`: persistence boundary (in-memory and Postgres backends)
//! - `DealPageRequest` / `PipelineRequest`: validated query shapes

pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;
pub mod types;

pub use memory::InMemoryDealStore;
pub use postgres::PgDealStore;
pub use query::{
    DealFilter, DealPageRequest, DealSort, DealSortField, PipelineColumn, PipelinePage,
    PipelineRequest,
};
pub use store::{DealStore, DealStoreError};
pub use types::{Deal, DealStage, NewDeal, StageRollup};
