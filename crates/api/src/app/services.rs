use std::sync::Arc;

use sqlx::PgPool;

use gearcrm_infra::cache::TieredCache;
use gearcrm_infra::deals::{DealStore, InMemoryDealStore, PgDealStore};
use gearcrm_infra::jobs::{
    InMemoryJobStore, JobStore, PgJobStore, RecoverySweepConfig, WorkerConfig, WorkerHandle,
    spawn_recovery_sweep, spawn_statement_worker,
};
use gearcrm_intel::{IntelProvider, LocalIntelProvider};

/// Shared service graph handed to every route through an `Extension`.
///
/// Stores are held as trait objects so the same handlers run against the
/// in-memory backend in tests and Postgres in production.
pub struct AppServices {
    pub deals: Arc<dyn DealStore>,
    pub cache: Arc<TieredCache>,
    pub jobs: Arc<dyn JobStore>,
    pub intel: Arc<dyn IntelProvider>,
    /// Background loops stop when the service graph is dropped.
    _workers: Vec<WorkerHandle>,
}

pub async fn build_services() -> AppServices {
    let use_postgres = std::env::var("GEARCRM_USE_POSTGRES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_postgres {
        return build_postgres_services().await;
    }

    build_in_memory_services()
}

fn build_in_memory_services() -> AppServices {
    let deals: Arc<dyn DealStore> = Arc::new(InMemoryDealStore::new());
    let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    assemble(deals, jobs)
}

async fn build_postgres_services() -> AppServices {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set when GEARCRM_USE_POSTGRES=true");

    let pool = Arc::new(
        PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to Postgres"),
    );

    let deals = PgDealStore::new(pool.clone());
    deals
        .ensure_schema()
        .await
        .expect("Failed to create deals schema");

    let jobs = PgJobStore::new(pool);
    jobs.ensure_schema()
        .await
        .expect("Failed to create jobs schema");

    assemble(Arc::new(deals), Arc::new(jobs))
}

/// Wire the cache, intel provider, and background loops around a pair of
/// stores. The statement worker and the stale-job sweep start immediately;
/// the sweep's first pass re-fails work orphaned by a previous process.
fn assemble(deals: Arc<dyn DealStore>, jobs: Arc<dyn JobStore>) -> AppServices {
    let cache = Arc::new(TieredCache::new());
    let intel: Arc<dyn IntelProvider> = Arc::new(LocalIntelProvider::new());

    let worker = spawn_statement_worker(jobs.clone(), intel.clone(), WorkerConfig::default());
    let sweep = spawn_recovery_sweep(jobs.clone(), RecoverySweepConfig::default());

    AppServices {
        deals,
        cache,
        jobs,
        intel,
        _workers: vec![worker, sweep],
    }
}
