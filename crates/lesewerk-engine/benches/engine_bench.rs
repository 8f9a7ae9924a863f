// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the lesewerk-engine crate: document fingerprinting
// and cache lookups under eviction pressure.

use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use lesewerk_core::config::EngineConfig;
use lesewerk_core::types::ExtractionMode;
use lesewerk_engine::fingerprint::{Fingerprint, fingerprint};
use lesewerk_engine::{CacheManager, ExtractionOptions};

fn bench_fingerprint(c: &mut Criterion) {
    let config = EngineConfig::default();
    let options = ExtractionOptions::new(ExtractionMode::Standard)
        .resolve(&config)
        .expect("default options resolve");
    let mut group = c.benchmark_group("fingerprint");
    for size in [64 * 1024, 4 * 1024 * 1024] {
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| black_box(fingerprint(black_box(bytes), &options, &config)));
        });
    }
    group.finish();
}

/// 1000 keys cycled through a cache that holds 250 of them.
fn bench_cache_churn(c: &mut Criterion) {
    let cache = CacheManager::new(250 * 1024, Duration::from_secs(3600));
    let keys: Vec<Fingerprint> = (0..1000).map(|i| Fingerprint::new(format!("{i:064x}"))).collect();
    let payload = vec![7u8; 1024];

    c.bench_function("cache_set_get (250 of 1000 resident)", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            if cache.get(key).is_none() {
                cache.set(key.clone(), payload.clone(), None);
            }
            i += 1;
        });
    });
}

criterion_group!(benches, bench_fingerprint, bench_cache_churn);
criterion_main!(benches);
