use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, Utc};
use tokio::runtime::Runtime;
use uuid::Uuid;

use gearcrm_core::{Cursor, PageLimit, RepId, SortDirection, SortValue};
use gearcrm_infra::deals::{
    DealPageRequest, DealSort, DealStage, DealStore, InMemoryDealStore, NewDeal,
};

const SEED_ROWS: usize = 10_000;
const PAGE: u32 = 50;

fn seeded_store(rt: &Runtime) -> InMemoryDealStore {
    let store = InMemoryDealStore::new();
    let base = Utc::now() - Duration::days(365);
    rt.block_on(async {
        for i in 0..SEED_ROWS {
            let new = NewDeal {
                merchant_name: format!("Merchant {i:05}"),
                stage: DealStage::ALL[i % DealStage::ALL.len()],
                monthly_volume_cents: ((i * 37) % 900_000) as i64 + 10_000,
                rep_id: RepId::new(),
            };
            store
                .insert(new, base + Duration::seconds(i as i64))
                .await
                .expect("seed deal");
        }
    });
    store
}

/// Walk the store to the page starting at `depth` rows and return the cursor
/// that resumes there.
fn cursor_at_depth(rt: &Runtime, store: &InMemoryDealStore, depth: usize) -> Option<Cursor> {
    if depth == 0 {
        return None;
    }
    rt.block_on(async {
        let mut request = DealPageRequest {
            limit: PageLimit::new(Some(PAGE)),
            sort: DealSort::parse("created_at:asc").expect("sort spec"),
            ..Default::default()
        };
        let mut skipped = 0;
        loop {
            let page = store.page(&request).await.expect("walk page");
            skipped += page.items.len();
            let token = page.next_cursor.expect("store has enough rows");
            if skipped >= depth {
                return Some(Cursor::decode(&token).expect("own cursor decodes"));
            }
            request.cursor = Some(Cursor::decode(&token).expect("own cursor decodes"));
        }
    })
}

fn bench_cursor_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor_codec");
    group.throughput(Throughput::Elements(1));

    let cursor = Cursor::new(
        SortValue::Timestamp(Utc::now()),
        Uuid::now_v7(),
        SortDirection::Desc,
    );
    group.bench_function("encode", |b| {
        b.iter(|| black_box(&cursor).encode());
    });

    let token = cursor.encode();
    group.bench_function("decode", |b| {
        b.iter(|| Cursor::decode(black_box(&token)).expect("valid token"));
    });

    group.finish();
}

fn bench_page_at_depth(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let store = seeded_store(&rt);

    let mut group = c.benchmark_group("page_at_depth");
    group.throughput(Throughput::Elements(PAGE as u64));

    for depth in [0usize, 2_500, 5_000, 7_500] {
        let cursor = cursor_at_depth(&rt, &store, depth);
        group.bench_with_input(BenchmarkId::new("keyset", depth), &depth, |b, _| {
            b.iter(|| {
                let request = DealPageRequest {
                    limit: PageLimit::new(Some(PAGE)),
                    sort: DealSort::parse("created_at:asc").expect("sort spec"),
                    cursor: cursor.clone(),
                    ..Default::default()
                };
                let page = rt.block_on(store.page(&request)).expect("page");
                black_box(page.items.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cursor_codec, bench_page_at_depth);
criterion_main!(benches);
