//! Benchmarks for fingerprint construction and diffing at a handful of
//! result-set sizes.

use indexmap::IndexMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use reconnoiter::diff::DiffDetector;
use reconnoiter::fingerprint::FingerprintBuilder;
use reconnoiter::report::StageResult;

fn build_results(subdomain_count: usize, port_count: usize) -> IndexMap<String, StageResult> {
    let mut results = IndexMap::new();

    let mut dns = StageResult::ok(std::collections::BTreeMap::new());
    dns.fields.insert(
        "ipv4".to_string(),
        serde_json::json!(["93.184.216.34", "93.184.216.35"]),
    );
    results.insert("dns".to_string(), dns);

    let mut subdomains = StageResult::ok(std::collections::BTreeMap::new());
    let list: Vec<String> = (0..subdomain_count).map(|i| format!("host-{i}.example.com")).collect();
    subdomains.fields.insert("list".to_string(), serde_json::json!(list));
    results.insert("subdomains".to_string(), subdomains);

    let mut ports = StageResult::ok(std::collections::BTreeMap::new());
    let open_ports: Vec<u16> = (0..port_count).map(|i| 1000 + i as u16).collect();
    ports.fields.insert("openPorts".to_string(), serde_json::json!(open_ports));
    results.insert("ports".to_string(), ports);

    results
}

fn bench_fingerprint_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_build");

    for &size in &[10usize, 100, 1000] {
        let results = build_results(size, size.min(64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &results, |b, results| {
            b.iter(|| FingerprintBuilder::build(results));
        });
    }

    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_diff");

    for &size in &[10usize, 100, 1000] {
        let previous = FingerprintBuilder::build(&build_results(size, size.min(64)));
        let current = FingerprintBuilder::build(&build_results(size + 5, size.min(64) + 1));

        group.bench_with_input(BenchmarkId::from_parameter(size), &(previous, current), |b, (prev, curr)| {
            b.iter(|| DiffDetector::diff("scan-a", "scan-b", Some(prev), curr));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fingerprint_build, bench_diff);
criterion_main!(benches);
