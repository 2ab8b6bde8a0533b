use agro_core::{Baseline, EngineConfig, MonteCarloRequest, ScenarioInput};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_monte_carlo(c: &mut Criterion) {
    let cfg = EngineConfig::default();
    let req = MonteCarloRequest {
        iterations: 10_000,
        bag_price: 150.0,
        rainfall_delta_pct: -5.0,
        input_cost_delta_pct: 8.0,
        seed: Some(42),
    };
    c.bench_function("monte carlo 10k trials", |b| {
        b.iter(|| {
            let _ = black_box(agro_econ::run_monte_carlo(&req, &cfg));
        })
    });
}

fn bench_simulate(c: &mut Criterion) {
    let cfg = EngineConfig::default();
    let baseline = Baseline {
        yield_bag_ha: 55.0,
        margin_per_ha: 1800.0,
        cost_per_ha: 4200.0,
    };
    let scenario = ScenarioInput {
        rainfall_delta_pct: 10.0,
        input_cost_delta_pct: -5.0,
        fertilizer_delta_pct: 3.0,
        cultivar: "SOJA RR".into(),
        bag_price: 150.0,
    };
    c.bench_function("deterministic simulate", |b| {
        b.iter(|| black_box(agro_econ::simulate(&scenario, &baseline, &cfg)))
    });
}

criterion_group!(benches, bench_monte_carlo, bench_simulate);
criterion_main!(benches);
