// -------------------------------------------------------------------------
// SCPN Ptycho Core -- Reconstruction Benchmark
// One full-batch iteration of GD, DM_AP and RAAR on a synthetic 8x8 raster,
// plus the overlap projection alone, on the sequential and rayon backends.
// -------------------------------------------------------------------------

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array2, Array3};
use num_complex::Complex64;
use ptycho_core::backend::{ArrayBackend, CpuBackend, ParallelBackend};
use ptycho_core::model::ObjectModel;
use ptycho_core::overlap::OverlapModel;
use ptycho_core::patches::PatchIndices;
use ptycho_core::preprocess::{raster_positions, DiffractionData};
use ptycho_core::probe::ProbeGuess;
use ptycho_core::reconstruct::PtychographicEngine;
use ptycho_types::config::{ReconstructionConfig, ReconstructionMethod, SetupConfig};
use std::hint::black_box;

const WINDOW: usize = 32;

/// Self-contained scene so benchmarks do not depend on measured data.
fn make_engine<B: ArrayBackend>(backend: B) -> PtychographicEngine<B> {
    let positions = raster_positions((8, 8), [6.0, 6.0], [0.0, 0.0]);
    let n = positions.nrows();
    let amplitudes = Array3::from_shape_fn((n, WINDOW, WINDOW), |(b, i, j)| {
        let r2 = (i.min(WINDOW - i).pow(2) + j.min(WINDOW - j).pow(2)) as f64;
        (-r2 / 20.0).exp() * (1.0 + 0.05 * (b % 7) as f64)
    });
    let data = DiffractionData::from_amplitudes(amplitudes, None).unwrap();
    let setup = SetupConfig {
        seed: Some(1),
        ..Default::default()
    };
    let guess = ProbeGuess::Aperture {
        semiangle_cutoff_px: 6.0,
        rolloff_px: 1.0,
    };
    PtychographicEngine::new(setup, data, positions, guess, None, backend).unwrap()
}

fn config(method: ReconstructionMethod) -> ReconstructionConfig {
    ReconstructionConfig {
        reconstruction_method: method,
        max_iter: 1,
        ..Default::default()
    }
}

fn bench_methods(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct_iteration");
    group.sample_size(10);

    for method in [
        ReconstructionMethod::GradientDescent,
        ReconstructionMethod::DifferenceMap,
        ReconstructionMethod::Raar,
    ] {
        let cfg = config(method);
        let mut cpu = make_engine(CpuBackend::new());
        group.bench_with_input(BenchmarkId::new("cpu", method.alias()), &cfg, |b, cfg| {
            b.iter(|| cpu.reconstruct(black_box(cfg)))
        });
        let mut par = make_engine(ParallelBackend::new());
        group.bench_with_input(BenchmarkId::new("parallel", method.alias()), &cfg, |b, cfg| {
            b.iter(|| par.reconstruct(black_box(cfg)))
        });
    }
    group.finish();
}

fn bench_overlap(c: &mut Criterion) {
    let backend = ParallelBackend::new();
    let positions = raster_positions((8, 8), [6.3, 5.7], [0.0, 0.0]);
    let indices = PatchIndices::compute(positions.view(), (80, 80), (WINDOW, WINDOW));
    let object = Array2::from_shape_fn((80, 80), |(i, j)| {
        Complex64::from_polar(1.0, 0.01 * (i * j) as f64)
    });
    let probe = Array3::from_elem((2, WINDOW, WINDOW), Complex64::new(0.5, 0.0));
    let model = OverlapModel::new(ObjectModel::Complex, (WINDOW, WINDOW));

    c.bench_function("overlap_64_positions_2_modes", |b| {
        b.iter(|| model.project(&backend, black_box(&object), black_box(&probe), &indices))
    });
}

criterion_group!(benches, bench_methods, bench_overlap);
criterion_main!(benches);
