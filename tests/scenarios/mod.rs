//! End-to-end delivery scenarios: snapshot at login, live events afterwards

use serde_json::json;

use biblio_notify::{events, NotificationId};

use crate::common::{eventually, ids, note, within, FakeApi, Harness};

#[tokio::test]
async fn test_live_event_is_prepended_to_snapshot() {
    let h = Harness::new(FakeApi::with_snapshot(vec![note(1, true), note(2, false)]));
    h.login("42").await;

    let store = h.store();
    assert_eq!(ids(&store), vec!["1", "2"]);
    assert_eq!(store.unread_count(), 1);
    eventually("store reports connected", || store.is_connected()).await;

    let server = h.server();
    assert!(server.push(
        events::NEW_NOTIFICATION,
        json!({"id": 3, "title": "Book due tomorrow", "isRead": false}),
    ));

    eventually("live notification applied", || store.len() == 3).await;
    assert_eq!(ids(&store), vec!["3", "1", "2"]);
    assert_eq!(store.unread_count(), 2);
}

#[tokio::test]
async fn test_mark_all_as_read_sends_bulk_signal() {
    let h = Harness::new(FakeApi::with_snapshot(vec![note(1, false), note(2, false), note(3, true)]));
    h.login("42").await;
    let store = h.store();
    let mut server = h.server();
    eventually("channel up", || h.binding.manager().is_connected()).await;

    store.mark_all_as_read();

    assert!(store.notifications().iter().all(|n| n.is_read));
    assert_eq!(store.unread_count(), 0);
    let frame = within("bulk read frame", server.recv()).await.unwrap();
    assert_eq!(frame.event, events::MARK_ALL_NOTIFICATIONS_AS_READ);
    assert_eq!(h.api.marked_all.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_live_event_kept_once() {
    let h = Harness::new(FakeApi::default());
    h.login("42").await;
    let store = h.store();
    let server = h.server();

    let payload = json!({"id": 1, "title": "Reservation ready", "isRead": false});
    server.push(events::NEW_NOTIFICATION, payload.clone());
    server.push(events::NEW_NOTIFICATION, payload);
    // Marker event so we know both copies were processed
    server.push(events::NEW_NOTIFICATION, json!({"id": 2, "title": "marker", "isRead": true}));

    eventually("marker applied", || store.len() == 2).await;
    assert_eq!(ids(&store), vec!["2", "1"]);
    assert_eq!(store.unread_count(), 1);
}

#[tokio::test]
async fn test_live_event_already_in_snapshot_is_ignored() {
    let h = Harness::new(FakeApi::with_snapshot(vec![note(5, false)]));
    h.login("42").await;
    let store = h.store();
    let server = h.server();

    server.push(events::NEW_NOTIFICATION, json!({"id": "5", "title": "again", "isRead": false}));
    server.push(events::UNREAD_COUNT_UPDATE, json!({"count": 9}));

    eventually("count update applied", || store.unread_count() == 9).await;
    assert_eq!(ids(&store), vec!["5"]);
}

#[tokio::test]
async fn test_refresh_after_live_event_does_not_duplicate() {
    let h = Harness::new(FakeApi::default());
    h.login("42").await;
    let store = h.store();
    let server = h.server();

    server.push(events::NEW_NOTIFICATION, json!({"id": 7, "title": "live", "isRead": false}));
    eventually("live applied", || store.len() == 1).await;

    h.api.set_snapshot(vec![note(7, false), note(6, true)]);
    let fetched = h.binding.refresh().await.unwrap();

    assert_eq!(fetched, 2);
    assert_eq!(ids(&store), vec!["7", "6"]);
    assert_eq!(store.unread_count(), 1);
}

#[tokio::test]
async fn test_server_count_is_authoritative() {
    let h = Harness::new(FakeApi::with_snapshot(vec![note(1, false)]));
    h.login("42").await;
    let store = h.store();
    let server = h.server();

    server.push(events::UNREAD_COUNT_UPDATE, json!({"count": 12}));
    eventually("count applied", || store.unread_count() == 12).await;

    // Counter and list may disagree; the list is left alone.
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_mark_as_read_over_channel() {
    let h = Harness::new(FakeApi::with_snapshot(vec![note(1, false), note(2, false)]));
    h.login("42").await;
    let store = h.store();
    let mut server = h.server();
    eventually("channel up", || h.binding.manager().is_connected()).await;

    assert!(store.mark_as_read(&NotificationId::from(2u64)));
    // Second call is a no-op and sends nothing
    assert!(!store.mark_as_read(&NotificationId::from(2u64)));

    let frame = within("read frame", server.recv()).await.unwrap();
    assert_eq!(frame.event, events::MARK_NOTIFICATION_AS_READ);
    assert_eq!(frame.payload, json!("2"));
    assert!(server.try_recv().is_none());
    assert_eq!(store.unread_count(), 1);
}

#[tokio::test]
async fn test_unread_counter_never_goes_negative() {
    let h = Harness::new(FakeApi::with_snapshot(vec![note(1, false), note(2, false)]));
    h.login("42").await;
    let store = h.store();
    let server = h.server();

    server.push(events::UNREAD_COUNT_UPDATE, json!({"count": 0}));
    eventually("count zeroed", || store.unread_count() == 0).await;

    store.mark_as_read(&NotificationId::from(1u64));
    assert_eq!(store.unread_count(), 0);
    assert!(store.get(&NotificationId::from(1u64)).unwrap().is_read);
}

#[tokio::test]
async fn test_malformed_event_is_dropped() {
    let h = Harness::new(FakeApi::default());
    h.login("42").await;
    let store = h.store();
    let server = h.server();

    server.push(events::NEW_NOTIFICATION, json!({"title": "no id"}));
    server.push(events::UNREAD_COUNT_UPDATE, json!("seven"));
    server.push(events::NEW_NOTIFICATION, json!({"id": 1, "title": "fine", "isRead": false}));

    eventually("valid event applied", || store.len() == 1).await;
    assert_eq!(store.unread_count(), 1);
    assert!(h.binding.manager().is_connected());
}

#[tokio::test]
async fn test_unknown_event_is_ignored() {
    let h = Harness::new(FakeApi::default());
    h.login("42").await;
    let store = h.store();
    let server = h.server();

    server.push("fine_assessed", json!({"amount": 2.5}));
    server.push(events::UNREAD_COUNT_UPDATE, json!({"count": 3}));

    eventually("count applied", || store.unread_count() == 3).await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_local_removal_blocks_redelivery() {
    let h = Harness::new(FakeApi::with_snapshot(vec![note(1, false)]));
    h.login("42").await;
    let store = h.store();
    let server = h.server();

    store.remove(&NotificationId::from(1u64)).unwrap();
    assert_eq!(store.unread_count(), 0);

    server.push(events::NEW_NOTIFICATION, json!({"id": 1, "title": "echo", "isRead": false}));
    server.push(events::NEW_NOTIFICATION, json!({"id": 2, "title": "marker", "isRead": true}));
    eventually("marker applied", || store.len() == 1).await;
    assert_eq!(ids(&store), vec!["2"]);
}
