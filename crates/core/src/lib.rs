//! `gearcrm-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the domain error model, the opaque pagination
//! cursor codec, and the page request/result model shared by every paginated
//! resource.

pub mod cursor;
pub mod error;
pub mod id;
pub mod page;

pub use cursor::{Cursor, CursorError, SortDirection, SortValue, SortValueKind};
pub use error::{DomainError, DomainResult};
pub use id::{DealId, JobId, RepId};
pub use page::{FilterOp, PageLimit, PageResult};
