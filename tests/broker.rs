//! Broker-driven runs: acknowledgement discipline and cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use notiweld::config::{BrokerConfig, ServerConfig};
use notiweld::envelope::{decoder, Event};
use notiweld::prelude::*;
use notiweld::sinks::TracingEmitter;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Route crate logs to the test output; `RUST_LOG=notiweld=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> BrokerConfig {
    BrokerConfig::new(ServerConfig::new("localhost"), "notifications.info")
        .with_reconnect_delay(Duration::from_millis(10))
}

fn notification(event_type: &str, unique_id: &str) -> Vec<u8> {
    let message = json!({"event_type": event_type, "_unique_id": unique_id});
    json!({"oslo.version": "2.0", "oslo.message": message.to_string()})
        .to_string()
        .into_bytes()
}

#[tokio::test]
async fn test_every_delivery_settled_once() -> Result<()> {
    init_tracing();
    let broker = MemoryBroker::new();
    broker.publish("nova", "notifications.info", notification("keypair.create.end", "1"));
    broker.publish("nova", "notifications.info", notification("fleet.rebalance.start", "2"));
    broker.publish("nova", "notifications.info", notification("port.delete.end", "3"));
    broker.publish("nova", "notifications.info", b"garbage".to_vec());

    let scope = Scope::new();
    let stream = BrokerSource::new(config(), broker.clone())?
        .take(4)
        .open(&scope);

    let summary = Pipeline::new(stream, decoder(true))
        .fail_fast(false)
        .sink(AckSink::new())
        .await?;

    assert_eq!(summary.written, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(broker.acked(), vec![1, 3]);
    assert_eq!(broker.nacked(), vec![(2, false), (4, false)]);
    assert_eq!(broker.in_flight(), 0);
    assert_eq!(broker.pending(), 0);
    Ok(())
}

#[tokio::test]
async fn test_dropped_events_are_rejected() -> Result<()> {
    init_tracing();
    let broker = MemoryBroker::new();
    for (i, event_type) in ["port.create.end", "identity.user.created", "port.update.end"]
        .iter()
        .enumerate()
    {
        broker.publish("neutron", "notifications.info", notification(event_type, &i.to_string()));
    }

    let scope = Scope::new();
    let stream = BrokerSource::new(config(), broker.clone())?.take(3).open(&scope);
    let ports = chain!(
        decoder(true),
        accept_if(|event: &Event| matches!(event, Event::Port(_))),
    );

    let sink = CollectSink::new();
    Pipeline::new(stream, ports).sink(sink.clone()).await?;

    assert_eq!(sink.len().await, 2);
    assert_eq!(broker.acked(), vec![1, 3]);
    assert_eq!(broker.nacked(), vec![(2, false)]);
    Ok(())
}

#[tokio::test]
async fn test_log_sink_acks_after_emitting() -> Result<()> {
    init_tracing();
    let broker = MemoryBroker::new();
    broker.publish("nova", "notifications.error", notification("compute.instance.create.error", "x"));

    let scope = Scope::new();
    let stream = BrokerSource::new(config(), broker.clone())?.take(1).open(&scope);
    Pipeline::new(stream, decoder(true))
        .sink(LogSink::for_events(TracingEmitter::default()))
        .await?;

    assert_eq!(broker.acked(), vec![1]);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_is_timely_and_settles_nothing() -> Result<()> {
    init_tracing();
    let broker = MemoryBroker::new();
    let publisher = broker.clone();
    tokio::spawn(async move {
        for i in 0..100 {
            publisher.publish("nova", "notifications.info", notification("keypair.create.end", &i.to_string()));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let scope = Scope::new();
    let acked_at_cancel = Arc::new(AtomicUsize::new(usize::MAX));
    {
        let scope = scope.clone();
        let broker = broker.clone();
        let acked_at_cancel = acked_at_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            scope.cancel();
            acked_at_cancel.store(broker.acked().len(), Ordering::SeqCst);
        });
    }

    let opened = Instant::now();
    let stream = BrokerSource::new(config(), broker.clone())?.open(&scope);
    let summary = Pipeline::new(stream, decoder(true))
        .sink(NullSink::new())
        .await?;
    let elapsed = opened.elapsed();

    assert!(summary.cancelled);
    assert!(summary.written > 0);
    assert!(elapsed <= Duration::from_millis(250), "took {:?}", elapsed);
    assert_eq!(broker.acked().len(), acked_at_cancel.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_consumption_continues_across_reconnects() -> Result<()> {
    init_tracing();
    let broker = MemoryBroker::new();
    broker.publish("nova", "notifications.info", notification("keypair.create.end", "a"));

    let scope = Scope::new();
    let mut stream = BrokerSource::new(config(), broker.clone())?.open(&scope);
    let mut decode = decoder(true);

    let first = decode.apply(stream.next().await.unwrap()).await?;
    NullSink::new().write(first).await?;

    broker.disconnect();
    broker.publish("nova", "notifications.info", notification("keypair.delete.end", "b"));

    let second = decode.apply(stream.next().await.unwrap()).await?;
    assert_eq!(second.event_type(), "keypair.delete.end");
    assert_eq!(broker.connections(), 2);
    scope.cancel();
    Ok(())
}
