use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ipscomp::optimizer::{GridOptimizer, ParameterRange, SearchSpace};
use ipscomp::stack::{StackParams, Topology};
use ipscomp::{LeakageEvaluator, SimulationConfig, StackBuilder};

fn white_leakage(c: &mut Criterion) {
    let config = SimulationConfig::default().with_topology(Topology::Symmetric);
    let stack = StackBuilder::new(&config)
        .build(&StackParams::new(1.0, 60.0))
        .expect("valid stack");
    let evaluator = LeakageEvaluator::from_config(&config);
    let pair = config.polarizers();

    c.bench_function("white_leakage_symmetric", |b| {
        b.iter(|| {
            evaluator
                .leakage(black_box(&config.target), black_box(&stack), &pair)
                .expect("leakage")
        })
    });
}

fn small_grid(c: &mut Criterion) {
    let config = SimulationConfig::default();
    let space = SearchSpace::new(
        &ParameterRange::new(0.0, 2.0, 0.25),
        &ParameterRange::new(-100.0, 100.0, 20.0),
    )
    .expect("non-empty grid");
    let optimizer = GridOptimizer::new(&config);

    c.bench_function("grid_search_99_points", |b| {
        b.iter(|| optimizer.search(black_box(&space)).expect("search"))
    });
}

criterion_group!(benches, white_leakage, small_grid);
criterion_main!(benches);
