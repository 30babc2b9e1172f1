//! Benchmarks for record-replay performance

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Request;
use tempfile::TempDir;

use polly::config::{Config, Mode};
use polly::proxy::HttpProxy;
use polly::replay::{ExchangeMatcher, MatchPolicy};
use polly::storage::{Exchange, HarLog, RecordedRequest, RecordedResponse, SessionStore};

fn exchange(i: usize) -> Exchange {
    Exchange {
        request: RecordedRequest {
            method: "GET".to_string(),
            path: format!("/api/test/{i}"),
            headers: vec![("accept".to_string(), "application/json".to_string())],
            started_at: Utc::now(),
        },
        response: RecordedResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: format!("{{\"response\":{i}}}").into_bytes(),
        },
        elapsed: Duration::from_millis(5),
    }
}

fn store_with(temp_dir: &TempDir, count: usize) -> Arc<SessionStore> {
    let store = SessionStore::create_empty(temp_dir.path(), "bench");
    for i in 0..count {
        store.append(exchange(i));
    }
    Arc::new(store)
}

fn bench_content_match(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();

    c.bench_function("content_match_last_of_100", |b| {
        b.iter_batched(
            || ExchangeMatcher::new(store_with(&temp_dir, 100), MatchPolicy::Content),
            |matcher| {
                black_box(matcher.match_request("GET", black_box("/api/test/99")).unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_ordinal_match(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let store = store_with(&temp_dir, 1);

    c.bench_function("ordinal_match", |b| {
        b.iter_batched(
            || ExchangeMatcher::new(Arc::clone(&store), MatchPolicy::Ordinal),
            |matcher| {
                black_box(matcher.match_request("GET", "/").unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_har_serialize(c: &mut Criterion) {
    let exchanges: Vec<Exchange> = (0..100).map(exchange).collect();

    c.bench_function("har_serialize_100_entries", |b| {
        b.iter(|| {
            black_box(HarLog::from_exchanges(black_box(&exchanges)).to_json().unwrap());
        });
    });
}

fn bench_session_load(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    store_with(&temp_dir, 100).persist().unwrap();

    c.bench_function("session_load_100_entries", |b| {
        b.iter(|| {
            let store = SessionStore::load(black_box(temp_dir.path()), "bench").unwrap();
            black_box(store.len());
        });
    });
}

fn bench_proxy_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let temp_dir = TempDir::new().unwrap();
    let store = store_with(&temp_dir, 1);

    let config = Config {
        mode: Mode::Replay,
        session: "bench".to_string(),
        policy: MatchPolicy::Ordinal,
        ..Config::default()
    };

    c.bench_function("proxy_replay_request", |b| {
        b.iter_batched(
            || HttpProxy::new(&config, Arc::clone(&store)).unwrap(),
            |proxy| {
                rt.block_on(async {
                    let request = Request::builder()
                        .uri("/api/test/0")
                        .body(Full::new(Bytes::new()))
                        .unwrap();
                    black_box(proxy.handle(request).await);
                });
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_content_match,
    bench_ordinal_match,
    bench_har_serialize,
    bench_session_load,
    bench_proxy_replay
);
criterion_main!(benches);
