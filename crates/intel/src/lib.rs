//! `gearcrm-intel`
//!
//! **Responsibility:** merchant-intelligence subsystem boundary.
//!
//! This crate wraps the third-party analysis service the CRM calls for
//! merchant reports and statement analysis. It is intentionally **not** part
//! of the domain model:
//! - It must not mutate domain state; outputs are insights consumed by
//!   callers (cache compute functions, background jobs).
//! - Callers own retry and fallback policy; this crate only enforces the
//!   per-call timeout.

pub mod local;
pub mod provider;
pub mod types;

pub use local::LocalIntelProvider;
pub use provider::{IntelError, IntelProvider, TimeoutIntelProvider};
pub use types::{MerchantReport, MerchantReportRequest, StatementAnalysis, StatementInput};
