use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use images_emulator::fit::{apply_fit, Fit};
use images_emulator::image_processor::ImageProcessor;
use images_emulator::model::{Image, VariantOptions};
use images_emulator::pagination::{paginate, FilterOp, ListQuery, MetadataFilter, SortOrder};
use std::io::Cursor;
use std::time::Duration;

fn create_test_image(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format)
        .expect("Failed to create test image");
    buffer
}

fn options(fit: &str, width: u32, height: u32) -> VariantOptions {
    VariantOptions {
        fit: fit.to_string(),
        width,
        height,
        metadata: String::new(),
    }
}

fn transform_benchmark(c: &mut Criterion) {
    let processor = ImageProcessor::new();
    let jpeg = create_test_image(1024, 768, ImageOutputFormat::Jpeg(90));
    let png = create_test_image(1024, 768, ImageOutputFormat::Png);

    let mut group = c.benchmark_group("transform");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for fit in Fit::NAMES {
        group.bench_function(format!("jpeg_{}", fit), |b| {
            b.iter(|| processor.transform(black_box(&jpeg), &options(fit, 320, 240)))
        });
    }
    group.bench_function("png_cover", |b| {
        b.iter(|| processor.transform(black_box(&png), &options("cover", 320, 240)))
    });

    group.finish();
}

fn fit_benchmark(c: &mut Criterion) {
    let img = image::load_from_memory(&create_test_image(800, 600, ImageOutputFormat::Png))
        .expect("Failed to decode test image");

    let mut group = c.benchmark_group("apply_fit");
    group.bench_function("pad", |b| {
        b.iter(|| apply_fit(black_box(&img), Fit::Pad, 400, 400))
    });
    group.bench_function("crop_out_of_bounds", |b| {
        b.iter(|| apply_fit(black_box(&img), Fit::Crop, 1000, 1000))
    });
    group.finish();
}

fn pagination_benchmark(c: &mut Criterion) {
    let records: Vec<Image> = (0..10_000)
        .map(|i| {
            let mut image = Image::new("acct", &format!("img-{:05}", i), "bench.png");
            image
                .meta
                .insert("tier".to_string(), serde_json::json!(if i % 4 == 0 { "gold" } else { "silver" }));
            image
        })
        .collect();

    let plain = ListQuery::new(100, SortOrder::Asc);
    let filtered = ListQuery::new(100, SortOrder::Desc)
        .with_filter(Some(MetadataFilter::new("tier", FilterOp::Eq, "gold")));

    let mut group = c.benchmark_group("paginate");
    group.bench_function("first_page", |b| b.iter(|| paginate(black_box(&records), &plain)));
    group.bench_function("filtered_desc", |b| {
        b.iter(|| paginate(black_box(&records), &filtered))
    });
    group.finish();
}

criterion_group!(benches, transform_benchmark, fit_benchmark, pagination_benchmark);
criterion_main!(benches);
