//! Sequence attribute propagation: fan-in merge, accumulate / unstack.

mod common;

use std::time::Duration;

use fb_core::value::{Value, ValueType};
use fb_modules::{
    ValueGenConfig, delayer, pair_combiner, probe, seq_accumulator, unstack_array, value_gen,
};

fn series(values: &[i64], seq_id: Option<u64>) -> ValueGenConfig {
    ValueGenConfig {
        values: values.iter().copied().map(Value::Int64).collect(),
        interval: Duration::from_millis(2),
        sequenced: true,
        seq_id,
    }
}

#[tokio::test]
async fn fan_in_merges_sequence_brackets() {
    let engine = common::engine(8).await;
    let host = engine.host();

    // Two sources emitting 3-element series under the same sequence id.
    let seq_id = 7u64;
    let left = value_gen(&host, "left", ValueType::Int64, series(&[1, 2, 3], Some(seq_id))).unwrap();
    let right =
        value_gen(&host, "right", ValueType::Int64, series(&[10, 20, 30], Some(seq_id))).unwrap();
    let join = pair_combiner(&host, "join", ValueType::Int64).unwrap();
    let (sink, observed) = probe(&host, "sink", ValueType::VecInt64, Duration::ZERO).unwrap();

    let dispatcher = engine.dispatcher();
    dispatcher
        .bind(left.out_port("data").unwrap(), join.in_port("a").unwrap())
        .unwrap();
    dispatcher
        .bind(right.out_port("data").unwrap(), join.in_port("b").unwrap())
        .unwrap();
    dispatcher
        .bind(join.out_port("pair").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    left.run_module(false).await.unwrap();
    right.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    let records = observed.records();
    assert_eq!(records.len(), 3, "one pair per element");

    assert_eq!(records[0].0, Value::VecInt64(vec![1, 10]));
    assert_eq!(records[1].0, Value::VecInt64(vec![2, 20]));
    assert_eq!(records[2].0, Value::VecInt64(vec![3, 30]));

    // Brackets: start on item 0, end on item 2, nothing in between.
    assert!(records[0].1.is_start_of(seq_id));
    assert!(!records[0].1.is_end_of(seq_id));
    assert!(!records[1].1.is_start_of(seq_id));
    assert!(!records[1].1.is_end_of(seq_id));
    assert!(records[2].1.is_end_of(seq_id));

    for (i, (_, attr)) in records.iter().enumerate() {
        assert_eq!(attr.index(), i as u64);
    }
}

#[tokio::test]
async fn brackets_survive_a_multi_hop_pipeline() {
    let engine = common::engine(8).await;
    let host = engine.host();

    let source = value_gen(&host, "src", ValueType::Int64, series(&[10, 20, 30], None)).unwrap();
    let hop1 = delayer(&host, "hop1", ValueType::Int64, Duration::ZERO).unwrap();
    let hop2 = delayer(&host, "hop2", ValueType::Int64, Duration::ZERO).unwrap();
    let (sink, observed) = probe(&host, "sink", ValueType::Int64, Duration::ZERO).unwrap();

    let dispatcher = engine.dispatcher();
    dispatcher
        .bind(source.out_port("data").unwrap(), hop1.in_port("in").unwrap())
        .unwrap();
    dispatcher
        .bind(hop1.out_port("out").unwrap(), hop2.in_port("in").unwrap())
        .unwrap();
    dispatcher
        .bind(hop2.out_port("out").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    let records = observed.records();
    assert_eq!(records.len(), 3);
    let seq_id = records[0].1.sequence_ids().next().expect("sequence id");
    assert!(records[0].1.is_start_of(seq_id));
    assert_eq!(records[0].1.index(), 0);
    assert!(records[2].1.is_end_of(seq_id));
    assert_eq!(records[2].1.index(), 2);
}

#[tokio::test]
async fn accumulator_stacks_a_whole_sequence() {
    let engine = common::engine(8).await;
    let host = engine.host();

    let source = value_gen(&host, "src", ValueType::Int64, series(&[1, 2, 3, 4, 5], None)).unwrap();
    let stacker = seq_accumulator(&host, "stack", ValueType::Int64).unwrap();
    let (sink, observed) = probe(&host, "sink", ValueType::VecInt64, Duration::ZERO).unwrap();

    let dispatcher = engine.dispatcher();
    dispatcher
        .bind(source.out_port("data").unwrap(), stacker.in_port("in").unwrap())
        .unwrap();
    dispatcher
        .bind(stacker.out_port("stack").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    assert_eq!(observed.values(), vec![Value::VecInt64(vec![1, 2, 3, 4, 5])]);
    assert!(!stacker.seq_running());
}

#[tokio::test]
async fn unstack_emits_a_fresh_sequence() {
    let engine = common::engine(8).await;
    let host = engine.host();

    let source = value_gen(
        &host,
        "src",
        ValueType::VecInt64,
        ValueGenConfig {
            values: vec![Value::VecInt64(vec![7, 8, 9])],
            sequenced: false,
            ..ValueGenConfig::default()
        },
    )
    .unwrap();
    let splitter = unstack_array(&host, "split", ValueType::Int64).unwrap();
    let (sink, observed) = probe(&host, "sink", ValueType::Int64, Duration::ZERO).unwrap();

    let dispatcher = engine.dispatcher();
    dispatcher
        .bind(source.out_port("data").unwrap(), splitter.in_port("in").unwrap())
        .unwrap();
    dispatcher
        .bind(splitter.out_port("items").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    let records = observed.records();
    assert_eq!(records.len(), 3);
    assert_eq!(
        records.iter().map(|(v, _)| v.clone()).collect::<Vec<_>>(),
        vec![Value::Int64(7), Value::Int64(8), Value::Int64(9)]
    );

    let seq_id = records[0].1.sequence_ids().next().expect("sequence id");
    assert!(records[0].1.is_start_of(seq_id));
    assert!(records[2].1.is_end_of(seq_id));
    assert!(!records[1].1.is_start_of(seq_id));
    assert!(!records[1].1.is_end_of(seq_id));
}

#[tokio::test]
async fn seq_binding_carries_brackets_without_payload() {
    let engine = common::engine(8).await;
    let host = engine.host();

    let source = value_gen(&host, "src", ValueType::Int64, series(&[1, 2], None)).unwrap();
    let (sink, observed) = probe(&host, "sink", ValueType::Int64, Duration::ZERO).unwrap();
    let (follower, follower_records) =
        probe(&host, "follower", ValueType::Int64, Duration::ZERO).unwrap();

    let dispatcher = engine.dispatcher();
    dispatcher
        .bind(source.out_port("data").unwrap(), sink.in_port("in").unwrap())
        .unwrap();
    // The follower only subscribes to the sequence events.
    dispatcher
        .seq_bind(source.out_port("data").unwrap(), follower.in_port("in").unwrap())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    assert_eq!(observed.len(), 2);
    // No payload crossed the seq binding, only the brackets.
    assert!(follower_records.is_empty());
    let events = follower.in_port("in").unwrap().take_seq_events();
    assert_eq!(events.len(), 2);
    let seq_id = events[0].sequence_ids().next().unwrap();
    assert!(events[0].is_start_of(seq_id));
    assert!(events[1].is_end_of(seq_id));
}

#[tokio::test]
async fn accumulate_then_unstack_roundtrip() {
    let engine = common::engine(8).await;
    let host = engine.host();

    let source = value_gen(&host, "src", ValueType::Int64, series(&[4, 5, 6], None)).unwrap();
    let stacker = seq_accumulator(&host, "stack", ValueType::Int64).unwrap();
    let splitter = unstack_array(&host, "split", ValueType::Int64).unwrap();
    let (sink, observed) = probe(&host, "sink", ValueType::Int64, Duration::ZERO).unwrap();

    let dispatcher = engine.dispatcher();
    dispatcher
        .bind(source.out_port("data").unwrap(), stacker.in_port("in").unwrap())
        .unwrap();
    dispatcher
        .bind(stacker.out_port("stack").unwrap(), splitter.in_port("in").unwrap())
        .unwrap();
    dispatcher
        .bind(splitter.out_port("items").unwrap(), sink.in_port("in").unwrap())
        .unwrap();

    source.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    assert_eq!(
        observed.values(),
        vec![Value::Int64(4), Value::Int64(5), Value::Int64(6)]
    );
}
