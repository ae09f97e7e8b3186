use criterion::{criterion_group, criterion_main, Criterion};
use damage::test::{build_rom, build_test_gb};

fn benchmark_run_until(c: &mut Criterion) {
    let mut gb = build_test_gb(&build_rom(0x00, 0x00, 0x00));

    c.bench_function("run_until", |b| {
        b.iter(|| {
            gb.run_until(gb.cycles() + 1_000_000);
            gb.clear_audio_buffer();
        })
    });
}

criterion_group!(benches, benchmark_run_until);
criterion_main!(benches);
