// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the lesewerk-document crate: table detection on a
// dense ruled grid, native reading order, and OCR preprocessing.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

use lesewerk_core::config::TableConfig;
use lesewerk_core::types::{BoundingBox, LineSegment, TextRun};
use lesewerk_document::{NativeExtractor, OcrPreprocessing, PageContent, ScanEnhancer, TableExtractor};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A page holding a 40x6 ruled table with text in every cell.
fn dense_table_page() -> PageContent {
    let xs: Vec<f32> = (0..=6).map(|i| 40.0 + i as f32 * 85.0).collect();
    let ys: Vec<f32> = (0..=40).map(|i| 40.0 + i as f32 * 18.0).collect();

    let mut page = PageContent::new(1, 612.0, 792.0);
    for &y in &ys {
        page.segments.push(LineSegment::new(xs[0], y, xs[6], y));
    }
    for &x in &xs {
        page.segments.push(LineSegment::new(x, ys[0], x, ys[40]));
    }
    for y in ys.windows(2) {
        for x in xs.windows(2) {
            page.text_runs.push(TextRun {
                text: format!("cell {:.0}/{:.0}", x[0], y[0]),
                bbox: BoundingBox::new(x[0] + 2.0, y[0] + 3.0, x[1] - 2.0, y[1] - 3.0),
                font_size: 10.0,
            });
        }
    }
    page
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_table_extraction(c: &mut Criterion) {
    let page = dense_table_page();
    let extractor = TableExtractor::new(TableConfig::default());

    c.bench_function("table_extraction (40x6 grid)", |b| {
        b.iter(|| black_box(extractor.extract(black_box(&page))));
    });
}

fn bench_native_text(c: &mut Criterion) {
    let page = dense_table_page();
    let extractor = NativeExtractor::new(20, 0.5);

    c.bench_function("native_text (240 runs)", |b| {
        b.iter(|| black_box(extractor.extract(black_box(&page))));
    });
}

/// Full OCR preprocessing on a synthetic 600x800 scan.
fn bench_ocr_preprocessing(c: &mut Criterion) {
    let mut img = GrayImage::from_pixel(600, 800, Luma([220u8]));
    for y in (60..740).step_by(24) {
        for x in 60..540 {
            img.put_pixel(x, y, Luma([30u8]));
        }
    }
    let dynamic = DynamicImage::ImageLuma8(img);
    let settings = OcrPreprocessing::default();

    c.bench_function("ocr_preprocessing (600x800)", |b| {
        b.iter(|| {
            let out = ScanEnhancer::from_dynamic(black_box(dynamic.clone())).prepare(&settings);
            black_box(out.into_dynamic());
        });
    });
}

criterion_group!(
    benches,
    bench_table_extraction,
    bench_native_text,
    bench_ocr_preprocessing
);
criterion_main!(benches);
