//! Benchmarks for per-request target resolution

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hyper::header::{HeaderMap, HeaderValue};
use timeseriesui::connections::{BackendType, Connection};
use timeseriesui::resolver::{HeaderResolver, QueryParamResolver, TargetResolver, forwardable_headers};

fn bench_header_resolver(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_resolver");

    let connections = vec![
        Connection::new("Influx", BackendType::InfluxDb, "http://influx.local:8086")
            .with_credentials(Some("admin".to_string()), Some("secret".to_string())),
    ];
    let resolver = TargetResolver::Header(HeaderResolver::influxdb(&connections));
    let empty = HeaderMap::new();

    group.bench_function("default_connection", |b| {
        b.iter(|| {
            let target = resolver.resolve(&empty, black_box(Some("q=SHOW+DATABASES&db=telegraf")), "/query");
            black_box(target)
        });
    });

    let mut overridden = HeaderMap::new();
    overridden.insert("x-influxdb-url", HeaderValue::from_static("http://other.local:8086"));
    overridden.insert("x-influxdb-username", HeaderValue::from_static("reader"));

    group.bench_function("header_override", |b| {
        b.iter(|| {
            let target = resolver.resolve(&overridden, black_box(Some("q=SELECT+1&u=caller")), "/query");
            black_box(target)
        });
    });

    group.finish();
}

fn bench_query_param_resolver(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_param_resolver");

    let resolver = TargetResolver::QueryParam(QueryParamResolver::default());
    let mut headers = HeaderMap::new();
    headers.insert("x-proxy-username", HeaderValue::from_static("admin"));
    headers.insert("x-proxy-password", HeaderValue::from_static("secret"));
    let query = "target=https%3A%2F%2Fprom.local%2Fprometheus&path=%2Fapi%2Fv1%2Fquery_range&query=rate(http_requests_total%5B5m%5D)&start=1700000000&end=1700003600&step=15";

    group.bench_function("generic_range_query", |b| {
        b.iter(|| {
            let target = resolver.resolve(&headers, black_box(Some(query)), "");
            black_box(target)
        });
    });

    group.bench_function("forwardable_headers", |b| {
        let mut inbound = HeaderMap::new();
        inbound.insert("content-type", HeaderValue::from_static("application/json"));
        inbound.insert("accept", HeaderValue::from_static("*/*"));
        inbound.insert("cookie", HeaderValue::from_static("session=1"));
        inbound.insert("user-agent", HeaderValue::from_static("bench"));
        b.iter(|| black_box(forwardable_headers(black_box(&inbound))));
    });

    group.finish();
}

criterion_group!(benches, bench_header_resolver, bench_query_param_resolver);
criterion_main!(benches);
