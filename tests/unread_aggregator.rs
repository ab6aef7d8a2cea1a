use std::time::{Duration, Instant};

use pazar_realtime::testing::{ScriptedConversationApi, summary};
use pazar_realtime::{EventBus, EventKind, UnreadAggregator};

async fn wait_for_badge(rx: &mut tokio::sync::watch::Receiver<u64>, want: u64) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if *rx.borrow_and_update() == want {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for badge {want}, have {}", *rx.borrow());
        }
        tokio::time::timeout(Duration::from_millis(500), rx.changed())
            .await
            .expect("badge change within deadline")
            .expect("aggregator alive");
    }
}

fn message_new_envelope(conversation_id: i64) -> pazar_realtime::Envelope {
    let raw = format!(
        r#"{{"event":"message.new","data":{{"conversationId":{conversation_id},"content":"x"}}}}"#
    );
    match pazar_realtime::core::decode_envelope(raw.as_bytes()).expect("valid") {
        pazar_realtime::core::DecodeOutcome::Event(envelope) => envelope,
        other => panic!("unexpected decode outcome: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_then_event_converges_without_flicker() {
    let api = ScriptedConversationApi::new(vec![
        Ok(vec![summary(1, 2), summary(2, 0)]),
        Ok(vec![summary(1, 3), summary(2, 0)]),
    ]);
    let bus = EventBus::new();
    let mut handle = UnreadAggregator::spawn(api.clone());
    handle.attach(&bus);
    let mut badge = handle.badge();

    wait_for_badge(&mut badge, 2).await;

    bus.publish(&message_new_envelope(1));
    wait_for_badge(&mut badge, 3).await;

    // The watch only ever carried converged totals: 0 (initial), 2, 3.
    assert_eq!(api.fetch_count(), 2);
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn event_racing_the_bootstrap_fetch_is_not_lost() {
    let api = ScriptedConversationApi::new(vec![
        Ok(vec![summary(1, 2)]),
        Ok(vec![summary(1, 3)]),
    ])
    .gated();
    let bus = EventBus::new();
    let mut handle = UnreadAggregator::spawn(api.clone());
    handle.attach(&bus);
    let mut badge = handle.badge();

    // Event arrives while the bootstrap fetch is still blocked.
    bus.publish(&message_new_envelope(1));
    assert_eq!(*badge.borrow(), 0);

    api.release(1); // bootstrap resolves
    wait_for_badge(&mut badge, 2).await;

    api.release(1); // the queued event's re-fetch resolves
    wait_for_badge(&mut badge, 3).await;
    assert_eq!(api.fetch_count(), 2);
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_events_coalesce_into_one_refetch() {
    let api = ScriptedConversationApi::new(vec![
        Ok(vec![summary(1, 1)]),
        Ok(vec![summary(1, 5)]),
    ])
    .gated();
    let bus = EventBus::new();
    let mut handle = UnreadAggregator::spawn(api.clone());
    handle.attach(&bus);
    let mut badge = handle.badge();

    // A burst of activity while the bootstrap fetch is still blocked: all
    // five signals are queued by the time the aggregator looks again.
    for _ in 0..5 {
        bus.publish(&message_new_envelope(1));
    }

    api.release(1);
    wait_for_badge(&mut badge, 1).await;

    api.release(1);
    wait_for_badge(&mut badge, 5).await;

    // One bootstrap fetch plus exactly one coalesced re-fetch.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(api.fetch_count(), 2);
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_during_inflight_fetch_trigger_exactly_one_followup() {
    let api = ScriptedConversationApi::new(vec![
        Ok(vec![summary(1, 1)]),
        Ok(vec![summary(1, 2)]),
        Ok(vec![summary(1, 4)]),
    ])
    .gated();
    let bus = EventBus::new();
    let mut handle = UnreadAggregator::spawn(api.clone());
    handle.attach(&bus);
    let mut badge = handle.badge();

    api.release(1);
    wait_for_badge(&mut badge, 1).await;

    // Start one re-fetch, then pile more events on while it is in flight.
    bus.publish(&message_new_envelope(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    for _ in 0..3 {
        bus.publish(&message_new_envelope(1));
    }

    api.release(1);
    wait_for_badge(&mut badge, 2).await;
    api.release(1);
    wait_for_badge(&mut badge, 4).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(api.fetch_count(), 3);
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_failure_keeps_previous_converged_value() {
    let api = ScriptedConversationApi::new(vec![
        Ok(vec![summary(1, 2)]),
        Err("http 500".to_string()),
        Ok(vec![summary(1, 4)]),
    ]);
    let mut handle = UnreadAggregator::spawn(api.clone());
    let mut badge = handle.badge();

    wait_for_badge(&mut badge, 2).await;

    handle.recheck();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*badge.borrow(), 2);

    handle.recheck();
    wait_for_badge(&mut badge, 4).await;
    handle.shutdown().await;

    // `handle` was consumed; `api` confirms all three fetches ran.
    assert_eq!(api.fetch_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detached_aggregator_ignores_unrelated_kinds() {
    let api = ScriptedConversationApi::new(vec![Ok(vec![summary(1, 1)])]);
    let bus = EventBus::new();
    let mut handle = UnreadAggregator::spawn(api.clone());
    handle.attach(&bus);
    let mut badge = handle.badge();

    wait_for_badge(&mut badge, 1).await;

    // typing events must not trigger re-aggregation
    let raw = r#"{"event":"typing.start","data":{"conversationId":1}}"#;
    if let pazar_realtime::core::DecodeOutcome::Event(envelope) =
        pazar_realtime::core::decode_envelope(raw.as_bytes()).expect("valid")
    {
        bus.publish(&envelope);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(api.fetch_count(), 1);

    assert_eq!(bus.subscriber_count(EventKind::MessageNew), 1);
    handle.shutdown().await;
    assert_eq!(bus.subscriber_count(EventKind::MessageNew), 0);
}
