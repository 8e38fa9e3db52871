//! Benchmarks for the per-frame diagnostics.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use turbulence_viz::{
    compute::{GaussianKde, LineSampler, RadialBins, SpectralTransform, linspace, standardize},
    reader::SyntheticReader,
    schema::{Component, SyntheticConfig},
};

fn synthetic_bx(width: usize) -> Vec<f64> {
    let reader = SyntheticReader::new(
        "synthetic",
        SyntheticConfig {
            width,
            ..SyntheticConfig::default()
        },
    );
    let snapshot = reader.generate(0).expect("synthetic frame");
    // Cell order does not matter for timing
    snapshot
        .variables
        .get("vg_b_vol")
        .expect("B field")
        .apply(Component::X)
        .expect("x component")
}

fn bench_radial_spectrum(c: &mut Criterion) {
    let mut group = c.benchmark_group("radial_spectrum");

    for width in [64, 128, 256, 512] {
        let field = synthetic_bx(width);
        let transform = SpectralTransform::new(width);
        let bins = RadialBins::new(width, 1.0, (width / 2).min(500));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, width)),
            &width,
            |b, _| {
                b.iter(|| bins.accumulate(&transform.power2d(black_box(&field))));
            },
        );
    }

    group.finish();
}

fn bench_structure_density(c: &mut Criterion) {
    let mut group = c.benchmark_group("structure_density");
    let points = linspace(-6.0, 6.0, 241);

    for width in [64, 256] {
        let field = synthetic_bx(width);
        let sampler = LineSampler::new(width);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, width)),
            &width,
            |b, _| {
                b.iter(|| {
                    let increments = sampler.increments(black_box(&field), 8);
                    standardize(&increments)
                        .and_then(GaussianKde::new)
                        .map(|kde| kde.evaluate_all(&points))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_radial_spectrum, bench_structure_density);
criterion_main!(benches);
