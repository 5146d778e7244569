//! Relay pool integration tests against in-memory relays.
//!
//! Covers cross-relay deduplication, partial publish failures, reconnect
//! with subscription replay, and rejection of forged events.

mod helpers;

use std::time::Duration;

use driftwood_core::nostr::{build_and_sign, Identity};
use driftwood_core::relay::testing::PublishBehavior;
use driftwood_core::relay::{
    Filter, PoolNotification, PublishStatus, RelayError, RelayStatus, SubscriptionItem,
};
use helpers::{connected_pool, connected_pool_with, fast_config, relays, WAIT};

const A: &str = "wss://a.relay";
const B: &str = "wss://b.relay";

/// Collects subscription items until every relay sent EOSE.
async fn until_eose(
    subscription: &mut driftwood_core::relay::PoolSubscription,
    relays: usize,
) -> Vec<SubscriptionItem> {
    let mut items = Vec::new();
    let mut eose = 0;
    tokio::time::timeout(WAIT, async {
        while eose < relays {
            let item = subscription.recv().await.expect("subscription ended early");
            if matches!(item, SubscriptionItem::Eose { .. }) {
                eose += 1;
            }
            items.push(item);
        }
    })
    .await
    .expect("timed out waiting for EOSE");
    items
}

#[tokio::test]
async fn event_from_two_relays_is_delivered_once() {
    let (transport, mock) = relays(&[A, B]);
    let note = build_and_sign(&Identity::generate(), 1, vec![], "everywhere", None).unwrap();
    mock[0].store_event(note.clone());
    mock[1].store_event(note.clone());

    let pool = connected_pool(&transport, &[A, B]).await;
    let mut subscription = pool.subscribe(vec![Filter::new().kind(1)]);
    let items = until_eose(&mut subscription, 2).await;

    let events: Vec<_> = items
        .iter()
        .filter_map(|item| match item {
            SubscriptionItem::Event { event, .. } => Some(event.id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(events, vec![note.id]);
}

#[tokio::test]
async fn silent_relay_times_out_without_blocking_others() {
    let (transport, mock) = relays(&[A, B]);
    mock[1].set_behavior(PublishBehavior::Silent);
    let pool = connected_pool(&transport, &[A, B]).await;
    let urls = pool.relays();

    let note = build_and_sign(&Identity::generate(), 1, vec![], "hello", None).unwrap();
    let started = tokio::time::Instant::now();
    let outcome = pool.publish(&note).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.event_id, note.id);
    assert_eq!(outcome.status_for(&urls[0]), Some(&PublishStatus::Accepted));
    assert_eq!(outcome.status_for(&urls[1]), Some(&PublishStatus::TimedOut));
    assert_eq!(outcome.success_count(), 1);
    assert_eq!(mock[1].received_events().len(), 1);
}

#[tokio::test]
async fn rejection_from_every_relay_fails_publish() {
    let (transport, mock) = relays(&[A, B]);
    mock[0].set_behavior(PublishBehavior::Reject("blocked: spam".to_string()));
    mock[1].set_behavior(PublishBehavior::Reject("blocked: spam".to_string()));
    let pool = connected_pool(&transport, &[A, B]).await;

    let note = build_and_sign(&Identity::generate(), 1, vec![], "buy now", None).unwrap();
    match pool.publish(&note).await {
        Err(RelayError::AllRelaysFailed(_)) => {}
        other => panic!("expected AllRelaysFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_replays_subscriptions() {
    let (transport, mock) = relays(&[A]);
    let pool = connected_pool(&transport, &[A]).await;
    let mut subscription = pool.subscribe(vec![Filter::new().kind(1)]);
    let id = subscription.id().to_string();
    mock[0].wait_for_subscription(&id).await;

    mock[0].disconnect_all();
    mock[0].wait_for_connections(2).await;
    mock[0].wait_for_subscription(&id).await;

    let note = build_and_sign(&Identity::generate(), 1, vec![], "after reconnect", None).unwrap();
    mock[0].send_event(&id, &note);

    let (_, event) = tokio::time::timeout(WAIT, subscription.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("subscription ended");
    assert_eq!(event.id, note.id);
}

#[tokio::test]
async fn status_changes_are_broadcast() {
    let (transport, mock) = relays(&[A]);
    let pool = connected_pool(&transport, &[A]).await;
    let mut notifications = pool.notifications();

    mock[0].disconnect_all();

    let reconnected = tokio::time::timeout(WAIT, async {
        let mut saw_drop = false;
        loop {
            match notifications.recv().await {
                Ok(PoolNotification::Status { status, .. }) if status != RelayStatus::Connected => {
                    saw_drop = true;
                }
                Ok(PoolNotification::Status { status: RelayStatus::Connected, .. }) if saw_drop => {
                    return;
                }
                Ok(_) => {}
                Err(e) => panic!("notification channel failed: {e}"),
            }
        }
    })
    .await;
    assert!(reconnected.is_ok(), "relay did not report drop and reconnect");
}

#[tokio::test]
async fn forged_event_is_dropped_and_counted() {
    let (transport, mock) = relays(&[A]);
    let pool = connected_pool(&transport, &[A]).await;
    let mut notifications = pool.notifications();
    let mut subscription = pool.subscribe(vec![Filter::new().kind(1)]);
    let id = subscription.id().to_string();
    mock[0].wait_for_subscription(&id).await;

    let mut forged = build_and_sign(&Identity::generate(), 1, vec![], "real", None).unwrap();
    forged.content = "forged".to_string();
    let genuine = build_and_sign(&Identity::generate(), 1, vec![], "genuine", None).unwrap();
    mock[0].send_event(&id, &forged);
    mock[0].send_event(&id, &genuine);

    let (_, event) = tokio::time::timeout(WAIT, subscription.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("subscription ended");
    assert_eq!(event.id, genuine.id);
    assert!(pool.metrics().snapshot().invalid_events >= 1);

    let invalid = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(PoolNotification::InvalidEvent { event_id, .. }) = notifications.recv().await {
                return event_id;
            }
        }
    })
    .await
    .expect("no invalid-event notification");
    assert_eq!(invalid, forged.id);
}

#[tokio::test]
async fn relay_added_later_receives_open_subscriptions() {
    let (transport, mock) = relays(&[A, B]);
    let pool = connected_pool(&transport, &[A]).await;
    let subscription = pool.subscribe(vec![Filter::new().kind(1)]);
    mock[0].wait_for_subscription(subscription.id()).await;

    pool.add_relay(B).unwrap();
    mock[1].wait_for_subscription(subscription.id()).await;
    assert_eq!(pool.relays().len(), 2);
}

#[tokio::test]
async fn unsubscribe_closes_on_relays() {
    let (transport, mock) = relays(&[A]);
    let pool = connected_pool(&transport, &[A]).await;
    let subscription = pool.subscribe(vec![Filter::new().kind(1)]);
    let id = subscription.id().to_string();
    mock[0].wait_for_subscription(&id).await;

    assert!(pool.unsubscribe(&id));
    helpers::wait_until("CLOSE to reach relay", || !mock[0].has_subscription(&id)).await;
}

#[tokio::test]
async fn slow_subscriber_loses_nothing() {
    let (transport, mock) = relays(&[A, B]);
    let author = Identity::generate();
    let notes: Vec<_> = (0..5)
        .map(|n| build_and_sign(&author, 1, vec![], format!("note {n}"), None).unwrap())
        .collect();
    for note in &notes {
        mock[0].store_event(note.clone());
        mock[1].store_event(note.clone());
    }

    let mut config = fast_config();
    config.pool.subscription_buffer = 2;
    let pool = connected_pool_with(config, &transport, &[A, B]).await;
    let mut subscription = pool.subscribe(vec![Filter::new().author(author.pubkey_hex())]);

    // Both relays answer while nobody reads.
    mock[0].wait_for_subscription(subscription.id()).await;
    mock[1].wait_for_subscription(subscription.id()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut delivered: Vec<String> = until_eose(&mut subscription, 2)
        .await
        .into_iter()
        .filter_map(|item| match item {
            SubscriptionItem::Event { event, .. } => Some(event.id),
            _ => None,
        })
        .collect();
    delivered.sort();
    let mut expected: Vec<String> = notes.iter().map(|n| n.id.clone()).collect();
    expected.sort();

    assert_eq!(delivered, expected);
    assert_eq!(pool.metrics().snapshot().duplicates_dropped, 5);
}
