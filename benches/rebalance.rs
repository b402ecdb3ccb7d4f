//! Rebalance benchmarks: full pipeline, flattening, and plan generation.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use driftplan::{
    CostModel, Holding, InstrumentId, PlanParams, PortfolioSnapshot, RebalanceRequest,
    TargetNode, TargetTable, Universe, UnlistedPolicy, compute_drift, generate_plan, rebalance,
    resolve,
};
use rust_decimal::Decimal;

fn id(i: usize) -> InstrumentId {
    InstrumentId::new(format!("S{i:04}"))
}

/// `n` holdings with deterministic pseudo-random quantities and prices,
/// targeted at equal weight across `n` instruments offset by half, so half
/// the book is divested and half bought.
fn build_request(n: usize) -> RebalanceRequest {
    let mut state: u32 = 42;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };

    let holdings: Vec<Holding> = (0..n)
        .map(|i| {
            let qty = Decimal::from(next() % 500 + 1);
            let price = Decimal::new(i64::from(next() % 50_000 + 100), 2);
            Holding::new(id(i), qty, price).unwrap()
        })
        .collect();
    let snapshot = PortfolioSnapshot::new(holdings, Decimal::from(10_000)).unwrap();

    let offset = n / 2;
    let quotes: Vec<(InstrumentId, Decimal)> = (n..n + offset)
        .map(|i| (id(i), Decimal::new(i64::from(next() % 50_000 + 100), 2)))
        .collect();
    let universe = Universe::from_snapshot(&snapshot).with_quotes(quotes).unwrap();

    let weight = Decimal::ONE / Decimal::from(n);
    let nodes: Vec<TargetNode> = (offset..n + offset)
        .map(|i| TargetNode::Instrument {
            instrument: id(i),
            weight,
        })
        .collect();

    RebalanceRequest {
        snapshot,
        targets: TargetTable::new(nodes),
        universe,
        policy: UnlistedPolicy::Divest,
        params: PlanParams {
            tolerance: Decimal::new(5, 3),
            cost_model: CostModel::flat(Decimal::new(250, 2)),
            ..PlanParams::default()
        },
    }
}

/// 10 categories of `n / 10` instruments each.
fn nested_table(n: usize) -> TargetTable {
    let per = n / 10;
    let member_weight = Decimal::ONE / Decimal::from(per);
    let categories = (0..10)
        .map(|c| {
            let members = (0..per)
                .map(|j| TargetNode::Instrument {
                    instrument: id(c * per + j),
                    weight: member_weight,
                })
                .collect();
            TargetNode::category(&format!("cat{c}"), Decimal::new(1, 1), members)
        })
        .collect();
    TargetTable::new(categories)
}

fn bench_rebalance(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebalance");

    for &n in &[10usize, 100, 1_000] {
        let req = build_request(n);
        group.bench_with_input(BenchmarkId::new("pipeline", n), &req, |b, req| {
            b.iter(|| rebalance(black_box(req)).unwrap());
        });
    }

    group.finish();
}

fn bench_stages(c: &mut Criterion) {
    let req = build_request(1_000);
    let targets = resolve(&req.targets, &req.snapshot, &req.universe, req.policy).unwrap();
    let drift = compute_drift(&req.snapshot, &targets, &req.universe).unwrap();

    c.bench_function("drift_1000", |b| {
        b.iter(|| compute_drift(black_box(&req.snapshot), &targets, &req.universe).unwrap());
    });

    c.bench_function("plan_1000", |b| {
        b.iter(|| generate_plan(black_box(&drift), &req.params).unwrap());
    });

    let table = nested_table(1_000);
    c.bench_function("flatten_nested_1000", |b| {
        b.iter(|| black_box(&table).flatten().unwrap());
    });
}

criterion_group!(benches, bench_rebalance, bench_stages);
criterion_main!(benches);
