//! Straight-line pipeline scenarios: single value delivery and
//! backpressure under a slow consumer.

mod common;

use std::time::Duration;

use fb_core::value::{Value, ValueType};
use fb_modules::{ValueGenConfig, delayer, probe, value_gen};

#[tokio::test]
async fn singleton_pipeline_delivers_exactly_once() {
    let engine = common::engine(8).await;
    let host = engine.host();
    let events = common::watch_events(&engine);

    let source = value_gen(
        &host,
        "a",
        ValueType::Int64,
        ValueGenConfig {
            values: vec![Value::Int64(42)],
            ..ValueGenConfig::default()
        },
    )
    .unwrap();
    let relay = delayer(&host, "b", ValueType::Int64, Duration::ZERO).unwrap();
    let (sink, observed) = probe(&host, "c", ValueType::Int64, Duration::ZERO).unwrap();

    let dispatcher = engine.dispatcher();
    dispatcher
        .bind(source.out_port("data").unwrap(), relay.in_port("in").unwrap())
        .unwrap();
    dispatcher
        .bind(relay.out_port("out").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    assert_eq!(observed.values(), vec![Value::Int64(42)]);
    assert!(source.module_ready());
    assert!(relay.module_ready());
    assert!(sink.module_ready());
    assert_eq!(events.failed(), 0);
    assert_eq!(events.failed_on_cancellation(), 0);
    assert_eq!(
        events.count(|e| matches!(e, fb_runtime::TaskEvent::Cancelled { .. })),
        0
    );
}

#[tokio::test]
async fn backpressure_drops_nothing_under_a_slow_sink() {
    let engine = common::engine(8).await;
    let host = engine.host();

    let count = 100i64;
    let source = value_gen(
        &host,
        "fast-src",
        ValueType::Int64,
        ValueGenConfig {
            values: (0..count).map(Value::Int64).collect(),
            interval: Duration::ZERO,
            ..ValueGenConfig::default()
        },
    )
    .unwrap();
    let (sink, observed) = probe(
        &host,
        "slow-sink",
        ValueType::Int64,
        Duration::from_millis(2),
    )
    .unwrap();

    engine
        .dispatcher()
        .bind(source.out_port("data").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    // The producer can only advance when the previous value was
    // released: every value arrives, in order.
    let received = observed.records();
    assert_eq!(received.len(), count as usize);
    for (i, (value, attr)) in received.iter().enumerate() {
        assert_eq!(*value, Value::Int64(i as i64));
        assert_eq!(attr.index(), i as u64);
    }
}

#[tokio::test]
async fn attached_logger_sees_every_publication() {
    let engine = common::engine(4).await;
    let host = engine.host();

    let source = value_gen(
        &host,
        "src",
        ValueType::Int64,
        ValueGenConfig {
            values: (0..5).map(Value::Int64).collect(),
            interval: Duration::from_millis(1),
            ..ValueGenConfig::default()
        },
    )
    .unwrap();
    let (sink, _observed) = probe(&host, "sink", ValueType::Int64, Duration::ZERO).unwrap();
    engine
        .dispatcher()
        .bind(source.out_port("data").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    let logger = std::sync::Arc::new(fb_runtime::MemoryLogger::new("tap"));
    engine
        .dispatcher()
        .attach_logger(source.out_port("data").unwrap(), logger.clone())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();
    // Logger runs are fire-and-forget; give the last one a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The logger holds the source until it logged, so nothing is missed.
    let mut seen: Vec<_> = logger
        .records()
        .into_iter()
        .filter_map(|(v, _)| v.as_i64())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn unplugged_trigger_runs_with_no_data() {
    let engine = common::engine(4).await;
    let host = engine.host();

    // A generator run by request (no trigger event) emits normally.
    let source = value_gen(
        &host,
        "solo",
        ValueType::Str,
        ValueGenConfig {
            values: vec![Value::Str("ping".into())],
            sequenced: false,
            ..ValueGenConfig::default()
        },
    )
    .unwrap();
    let (sink, observed) = probe(&host, "log", ValueType::Str, Duration::ZERO).unwrap();
    engine
        .dispatcher()
        .bind(source.out_port("data").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();
    assert_eq!(observed.values(), vec![Value::Str("ping".into())]);
}
