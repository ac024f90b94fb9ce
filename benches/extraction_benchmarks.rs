use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgly_bgswap::{
    config::{ContourConfig, CornerColorConfig},
    BackgroundSpec, Compositor, ContourExtractor, CornerColorExtractor, ExtractionMethod,
    ExtractionMode, MethodKind, PipelineConfig, ProcessingPipeline, SizeGuard, SizeGuardConfig,
    SourceImage,
};
use std::io::Cursor;

const SIZES: [(u32, u32); 3] = [(320, 240), (1024, 768), (2000, 1500)];

/// Dark subject with a lighter band on a soft gradient backdrop
fn synthetic_photo(width: u32, height: u32) -> DynamicImage {
    let (x0, x1) = (width * 3 / 10, width * 7 / 10);
    let (y0, y1) = (height / 5, height * 9 / 10);
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
            let band = if (y / 16) % 2 == 0 { 40 } else { 70 };
            Rgb([band, 30, 90])
        } else {
            let shade = 225 + (x * 20 / width.max(1)) as u8;
            Rgb([shade, shade, 240])
        }
    }))
}

fn benchmark_extraction_methods(c: &mut Criterion) {
    let contour = ContourExtractor::new(ContourConfig::default());
    let corner = CornerColorExtractor::new(CornerColorConfig::default());

    let mut group = c.benchmark_group("extraction_methods");
    group.sample_size(10);

    for (width, height) in SIZES {
        let image = synthetic_photo(width, height);
        let label = format!("{width}x{height}");

        group.bench_with_input(BenchmarkId::new("contour", &label), &image, |b, image| {
            b.iter(|| black_box(contour.extract(black_box(image))));
        });
        group.bench_with_input(BenchmarkId::new("corner_color", &label), &image, |b, image| {
            b.iter(|| black_box(corner.extract(black_box(image))));
        });
    }

    group.finish();
}

fn benchmark_size_guard(c: &mut Criterion) {
    let guard = SizeGuard::new(SizeGuardConfig::default());
    let image = synthetic_photo(4000, 3000);

    c.bench_function("size_guard_downscale_4000x3000", |b| {
        b.iter(|| {
            let source = SourceImage::new(image.clone(), 0, None);
            black_box(guard.optimize(source))
        });
    });
}

fn benchmark_compositing(c: &mut Criterion) {
    let corner = CornerColorExtractor::new(CornerColorConfig::default());
    let compositor = Compositor::default();
    let Ok(foreground) = corner.extract(&synthetic_photo(1024, 768)) else {
        return;
    };

    let mut group = c.benchmark_group("compositing");
    for background in ["transparent", "white", "#3366cc"] {
        let Ok(spec) = background.parse::<BackgroundSpec>() else {
            continue;
        };
        group.bench_function(background, |b| {
            b.iter(|| black_box(compositor.composite_one(&foreground.image, spec)));
        });
    }
    group.finish();
}

fn benchmark_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    let mut bytes = Vec::new();
    if synthetic_photo(1024, 768)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .is_err()
    {
        return;
    }
    let backgrounds = [BackgroundSpec::Transparent, BackgroundSpec::PresetColor(
        imgly_bgswap::PresetColor::White,
    )];

    for method in [MethodKind::Contour, MethodKind::CornerColor] {
        let Ok(config) = PipelineConfig::builder()
            .mode(ExtractionMode::Forced(method))
            .build()
        else {
            continue;
        };
        let Ok(pipeline) = ProcessingPipeline::new(config) else {
            continue;
        };
        group.bench_function(BenchmarkId::new("process_bytes", method), |b| {
            b.iter(|| black_box(pipeline.process_bytes(black_box(&bytes), &backgrounds)));
        });
    }
    group.finish();
}

criterion_group!(
    extraction_benches,
    benchmark_extraction_methods,
    benchmark_size_guard,
    benchmark_compositing,
    benchmark_full_pipeline
);
criterion_main!(extraction_benches);
