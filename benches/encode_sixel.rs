//! Sixel encoder benchmarks: raw encode vs the full normalize+encode path.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgba, RgbaImage};
use tooie_shelf::sixel::{encode_sixel, render_icon};
use tooie_shelf::terminal::CellPixels;

fn gradient_icon(size: u32) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        let alpha = if (x + y) % 7 == 0 { 0 } else { 255 };
        Rgba([(x * 255 / size) as u8, (y * 255 / size) as u8, 128, alpha])
    })
}

fn bench_encode(c: &mut Criterion) {
    let icon = gradient_icon(192);

    let mut group = c.benchmark_group("encode_sixel");
    group.sample_size(50);

    group.bench_function("encode_192px_gradient", |b| {
        b.iter(|| black_box(encode_sixel(black_box(&icon))));
    });

    group.bench_function("render_icon_8x4_cells", |b| {
        let cell = CellPixels {
            width: 10,
            height: 20,
        };
        b.iter(|| black_box(render_icon(black_box(&icon), 8, 4, cell)));
    });

    group.finish();
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
