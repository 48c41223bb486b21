use cmme_core::{PpmDecayBuilder, PpmSimpleBuilder, normalize, run_ppm};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn melody(len: usize) -> Vec<f64> {
    let mut rng = SmallRng::seed_from_u64(7);
    (0..len).map(|_| rng.random_range(55..80) as f64).collect()
}

fn bench_simple(c: &mut Criterion) {
    let inst = PpmSimpleBuilder::new(normalize(melody(500)).unwrap())
        .order_bound(5)
        .to_instructions_file()
        .unwrap();
    c.bench_function("ppm_simple_500", |b| b.iter(|| run_ppm(black_box(&inst))));
}

fn bench_decay(c: &mut Criterion) {
    let mut builder = PpmDecayBuilder::new(normalize(melody(200)).unwrap()).order_bound(4);
    builder.buffer_length_items = 20;
    builder.stm_weight = 0.5;
    builder.stm_duration = 50.0;
    builder.ltm_weight = 0.1;
    builder.ltm_half_life = 30.0;
    builder.noise = 0.01;
    let inst = builder.to_instructions_file().unwrap();
    c.bench_function("ppm_decay_200", |b| b.iter(|| run_ppm(black_box(&inst))));
}

criterion_group!(benches, bench_simple, bench_decay);
criterion_main!(benches);
