//! Integration tests for the pipeline kernel

use std::time::Duration;
use notiweld::prelude::*;
use notiweld::sources::{Lines, StreamSource};
use notiweld::transforms::{
    bytes_to_string, format, string_to_bytes, to_json, Accumulate, Buffer, Cache, Delay,
    MultiCount, MultiCounter, Store,
};
use serde::Serialize;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_drop_short_circuits_the_chain() -> Result<()> {
    let scope = Scope::new();
    let c1 = Counter::new();
    let c2 = Counter::new();
    let chain = chain!(
        Count::new(c1.clone()),
        accept_if(|x: &i64| x % 2 == 0),
        Count::new(c2.clone()),
    );

    let summary = Pipeline::new(Sequence::range(0, 10)?.open(&scope), chain)
        .sink(NullSink::new())
        .await?;

    assert_eq!(c1.get(), 10);
    assert_eq!(c2.get(), 5);
    assert_eq!(summary.received, 10);
    assert_eq!(summary.dropped, 5);
    Ok(())
}

#[tokio::test]
async fn test_concat_preserves_order() {
    let scope = Scope::new();
    let first = VecSource::new(vec!["a", "b", "c"]).open(&scope);
    let second = VecSource::new(vec!["x", "y"]).open(&scope);

    let mut joined = concat(&scope, vec![first, second]);
    assert_eq!(joined.to_vec().await, vec!["a", "b", "c", "x", "y"]);
    assert!(joined.err().is_none());
}

#[tokio::test]
async fn test_merge_collects_every_input() {
    let scope = Scope::new();
    let streams = vec![
        Sequence::range(0, 50).unwrap().open(&scope),
        Sequence::range(100, 150).unwrap().open(&scope),
        Fibonacci::with_limit(10)
            .map(|x: u64| x as i64)
            .open(&scope),
    ];

    let mut items = merge(&scope, streams).to_vec().await;
    items.sort_unstable();
    assert_eq!(items.len(), 110);
    assert_eq!(items.iter().filter(|x| **x >= 100).count(), 50);
}

#[tokio::test]
async fn test_constant_sequence_runs_until_cancelled() {
    let scope = Scope::new();
    let mut stream = Sequence::new(7, 0, 0).unwrap().open(&scope);
    for _ in 0..1000 {
        assert_eq!(stream.next().await, Some(7));
    }
    scope.cancel();
    assert_eq!(stream.next().await, None);
    assert!(stream.err().is_none());
}

#[tokio::test]
async fn test_range_yields_exactly_n() {
    let scope = Scope::new();
    let items = Sequence::range(0, 25).unwrap().open(&scope).to_vec().await;
    assert_eq!(items.len(), 25);
    assert_eq!(items.last(), Some(&24));
}

#[tokio::test]
async fn test_missing_file_yields_nothing() {
    let scope = Scope::new();
    let mut stream = Lines::new(vec!["/definitely/not/here.jsonl"]).open(&scope);
    assert!(stream.to_vec().await.is_empty());
    assert!(matches!(stream.err(), Some(Error::SourceIo { .. })));
}

#[tokio::test]
async fn test_bytes_round_trip() {
    let mut chain = chain!(string_to_bytes(), bytes_to_string());
    for text in ["", "plain", "ünïcödé ✓", "line\nbreak"] {
        assert_eq!(chain.apply(text.to_string()).await.unwrap(), text);
    }
}

#[tokio::test]
async fn test_identity_transforms_keep_the_value() {
    let buffer = Buffer::new();
    let store = Store::new();
    let counts = MultiCounter::new();
    let stopwatch = Stopwatch::new();

    let mut chain = chain!(
        stopwatch.start(),
        Count::new(Counter::new()),
        MultiCount::new(counts.clone(), |x: &i64| x % 3),
        Accumulate::new(buffer.clone()),
        Cache::new(store.clone(), |x: &i64| *x),
        Delay::new(Duration::from_millis(1)),
        stopwatch.stop(),
    );

    for v in [3i64, 4, 5, 6] {
        assert_eq!(chain.apply(v).await.unwrap(), v);
    }
    assert_eq!(buffer.snapshot(), vec![3, 4, 5, 6]);
    assert_eq!(store.get(&4), Some(4));
    assert_eq!(counts.get(&0), 2);
    assert_eq!(stopwatch.laps(), 4);
    assert!(stopwatch.total() >= Duration::from_millis(4));
}

#[derive(Serialize)]
struct Instance {
    name: String,
    flavor: Flavor,
}

#[derive(Serialize)]
struct Flavor {
    vcpus: u32,
}

#[tokio::test]
async fn test_format_and_serialise() {
    let mut describe = format::<Instance>("{name} has {flavor.vcpus} vcpus");
    let instance = Instance {
        name: "web-1".to_string(),
        flavor: Flavor { vcpus: 4 },
    };
    assert_eq!(describe.apply(instance).await.unwrap(), "web-1 has 4 vcpus");

    let mut json = to_json::<serde_json::Value>();
    let line = json.apply(serde_json::json!({"a": [1, 2]})).await.unwrap();
    assert_eq!(line, r#"{"a":[1,2]}"#);
}

#[tokio::test]
async fn test_futures_stream_both_ways() {
    use futures::StreamExt;

    let scope = Scope::new();
    let source = StreamSource::new(futures::stream::iter(1..=3u64));
    let doubled: Vec<u64> = source
        .open(&scope)
        .into_stream()
        .map(|x| x * 2)
        .collect()
        .await;
    assert_eq!(doubled, vec![2, 4, 6]);
}

#[tokio::test]
async fn test_timeout_scope_ends_an_infinite_run() {
    let scope = Scope::new().with_timeout(Duration::from_millis(50));
    let summary = assert_ok!(
        Pipeline::new(
            Sequence::constant(1).open(&scope),
            Delay::new(Duration::from_millis(5)),
        )
        .sink(CountSink::new())
        .await
    );
    assert!(summary.cancelled);
    assert!(summary.written > 0);
}
