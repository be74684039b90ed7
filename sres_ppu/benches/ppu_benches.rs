use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use sres_ppu::common::address::AddressU24;
use sres_ppu::common::clock::Chip;
use sres_ppu::components::ppu::Framebuffer;
use sres_ppu::components::ppu::Ppu;
use sres_ppu::components::ppu::PpuConfig;

/// Mode 1 with all layers and color math enabled, so every stage of the pipeline runs.
fn busy_ppu() -> Ppu {
    let mut ppu = Ppu::new(PpuConfig::default());
    for (reg, value) in [
        (0x2105, 0x01),
        (0x2107, 0x10),
        (0x2108, 0x14),
        (0x2109, 0x18),
        (0x212C, 0x17),
        (0x212D, 0x04),
        (0x2130, 0x02),
        (0x2131, 0x23),
        (0x2100, 0x0F),
    ] {
        ppu.write_io(AddressU24::new(0, reg), value);
    }
    ppu
}

fn run_frame(ppu: &mut Ppu, frame: &mut Framebuffer) {
    while !ppu.swap_video_frame(frame) {
        ppu.main();
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("ppu_frame_time", |b| {
        let mut ppu = busy_ppu();
        let mut frame = Framebuffer::default();
        b.iter(|| run_frame(black_box(&mut ppu), &mut frame));
    });

    c.bench_function("ppu_frame_time_headless", |b| {
        let mut ppu = busy_ppu();
        ppu.force_headless();
        let mut frame = Framebuffer::default();
        b.iter(|| run_frame(black_box(&mut ppu), &mut frame));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
