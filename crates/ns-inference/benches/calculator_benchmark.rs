//! Criterion benchmarks for the calculators on a Gaussian signal over an
//! exponential background.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use ns_inference::testing;
use ns_inference::{AsymptoticCalculator, Calculator, FrequentistCalculator, Poi, TestStatistic, UpperLimit};

fn bench_asymptotic_pvalue(c: &mut Criterion) {
    let config = testing::upper_limit_config();
    config.bestfit().unwrap();
    let p = config.parameters();
    let poialt = Poi::scalar(p, "Nsig", 0.0).unwrap();

    let mut group = c.benchmark_group("asymptotic_pvalue");
    for n in [5usize, 20] {
        let grid: Vec<f64> = (1..=n).map(|i| 40.0 * i as f64 / n as f64).collect();
        let poinull = Poi::new(p, "Nsig", grid).unwrap();
        group.bench_with_input(BenchmarkId::new("cold", n), &poinull, |b, poinull| {
            b.iter(|| {
                let mut calc = AsymptoticCalculator::new(config.clone());
                black_box(calc.pvalue(black_box(poinull), Some(&poialt), TestStatistic::upper_limit(false)).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_upper_limit(c: &mut Criterion) {
    let config = testing::upper_limit_config();
    config.bestfit().unwrap();
    let p = config.parameters();
    let grid: Vec<f64> = (1..=40).map(f64::from).collect();

    c.bench_function("upper_limit_asymptotic_40pts", |b| {
        b.iter(|| {
            let poinull = Poi::new(p, "Nsig", grid.clone()).unwrap();
            let poialt = Poi::scalar(p, "Nsig", 0.0).unwrap();
            let mut ul = UpperLimit::new(poinull, Some(poialt), AsymptoticCalculator::new(config.clone())).unwrap();
            black_box(ul.upperlimit(0.05).unwrap())
        })
    });
}

fn bench_toys(c: &mut Criterion) {
    let config = testing::upper_limit_config();
    config.bestfit().unwrap();
    let p = config.parameters();
    let poigen = Poi::scalar(p, "Nsig", 10.0).unwrap();
    let calc = FrequentistCalculator::new(config.clone(), 100, 100);

    let mut group = c.benchmark_group("frequentist_dotoys");
    group.sample_size(10);
    for ntoys in [50usize, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(ntoys), &ntoys, |b, &n| {
            b.iter(|| black_box(calc.dotoys(&poigen, n, &[0.0, 10.0]).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_asymptotic_pvalue, bench_upper_limit, bench_toys);
criterion_main!(benches);
