//! Hop-by-hop header filter benchmark.
//!
//! Run with: cargo bench

use chainproxy::common::headers::strip_hop_by_hop;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn sample_headers(n: usize) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Host".to_string(), "example.com".to_string()),
        ("Connection".to_string(), "keep-alive, X-Custom".to_string()),
        ("Keep-Alive".to_string(), "timeout=5".to_string()),
        ("Proxy-Authorization".to_string(), "Basic dXNlcjpwYXNz".to_string()),
        ("X-Custom".to_string(), "drop-me".to_string()),
        ("Accept".to_string(), "*/*".to_string()),
        ("User-Agent".to_string(), "bench/1.0".to_string()),
    ];
    for i in 0..n {
        headers.push((format!("X-Extra-{i}"), "value".to_string()));
    }
    headers
}

fn bench_strip_hop_by_hop(c: &mut Criterion) {
    let mut group = c.benchmark_group("strip_hop_by_hop");

    for size in [0usize, 10, 100] {
        let headers = sample_headers(size);
        group.throughput(Throughput::Elements(headers.len() as u64));
        group.bench_function(format!("headers_{}", headers.len()), |b| {
            b.iter(|| black_box(strip_hop_by_hop(black_box(&headers))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_strip_hop_by_hop);
criterion_main!(benches);
