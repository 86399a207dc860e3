//! Reconnect behavior: subscription re-issue and replay ordering.

mod common;

use serde_json::json;

use common::{harness, settle};
use tidesync::client::SessionConfig;
use tidesync::types::types::{ChangeFrame, ConnectionState, SubscribeParams};

#[tokio::test]
async fn test_reconnect_reissues_subscription_without_duplicates() {
	let h = harness(SessionConfig::default()).await;
	h.transport.connect().await;
	settle().await;

	let mut sub = h
		.session
		.subscribe(SubscribeParams::bucket("users").with_initial_value(false))
		.await
		.expect("subscribe");

	h.transport.disconnect().await;
	settle().await;
	h.transport.connect().await;
	settle().await;

	// Exactly one live subscription on the fresh server connection
	let conn = h.transport.server_conn().await.expect("conn");
	assert_eq!(conn.subscriptions.len(), 1);

	h.session.put("users", "42", json!(1)).await.expect("put");
	settle().await;

	assert_eq!(
		sub.frames.recv().await,
		Some(ChangeFrame::Put { key: "42".into(), value: json!(1) })
	);
	assert!(sub.frames.try_recv().is_err(), "a change must be delivered exactly once");
}

#[tokio::test]
async fn test_subscription_registered_offline_activates_on_connect() {
	let h = harness(SessionConfig::offline()).await;

	let mut sub = h
		.session
		.subscribe(SubscribeParams::bucket("users"))
		.await
		.expect("subscribe");

	h.transport.connect().await;
	settle().await;

	h.session.put("users", "42", json!(1)).await.expect("put");
	settle().await;

	assert_eq!(
		sub.frames.recv().await,
		Some(ChangeFrame::Put { key: "42".into(), value: json!(1) })
	);
}

#[tokio::test]
async fn test_disconnect_tears_down_server_subscriptions() {
	let h = harness(SessionConfig::default()).await;
	h.transport.connect().await;
	settle().await;

	let _sub = h
		.session
		.subscribe(SubscribeParams::bucket("users"))
		.await
		.expect("subscribe");
	let conn = h.transport.server_conn().await.expect("conn");
	assert_eq!(conn.subscriptions.len(), 1);

	h.transport.disconnect().await;
	settle().await;
	assert!(conn.subscriptions.is_empty());
}

#[tokio::test]
async fn test_session_reports_reconnecting_until_resubscribe_settles() {
	let mut config = SessionConfig::default();
	config.ack_timeout = std::time::Duration::from_millis(200);
	let h = harness(config).await;
	h.transport.connect().await;
	settle().await;

	let _sub = h
		.session
		.subscribe(SubscribeParams::bucket("users"))
		.await
		.expect("subscribe");

	h.transport.disconnect().await;
	settle().await;
	assert_eq!(h.session.state().await, ConnectionState::Disconnected);

	// Hold the resubscribe ack back so the window stays open
	h.transport.drop_acks.store(true, std::sync::atomic::Ordering::SeqCst);
	h.transport.connect().await;
	settle().await;
	assert_eq!(h.session.state().await, ConnectionState::Reconnecting);

	// Once the resubscribe attempt times out the session settles
	tokio::time::sleep(std::time::Duration::from_millis(400)).await;
	assert_eq!(h.session.state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_replay_runs_after_resubscribe_on_reconnect() {
	let h = harness(SessionConfig::offline()).await;
	h.transport.connect().await;
	settle().await;

	let mut sub = h
		.session
		.subscribe(SubscribeParams::bucket("users"))
		.await
		.expect("subscribe");

	h.transport.disconnect().await;
	settle().await;

	h.session.put("users", "42", json!(1)).await.expect("put");
	// The offline bus already delivered this change locally
	assert_eq!(
		sub.frames.recv().await,
		Some(ChangeFrame::Put { key: "42".into(), value: json!(1) })
	);

	h.transport.connect().await;
	settle().await;

	// Replay reached the server and the re-issued subscription saw the
	// replayed change
	assert_eq!(h.app.store.get("users", "42").await.expect("get"), Some(json!(1)));
	assert_eq!(h.session.pending_ops().await, 0);
	let mut saw_replayed_put = false;
	while let Ok(frame) = sub.frames.try_recv() {
		if frame == (ChangeFrame::Put { key: "42".into(), value: json!(1) }) {
			saw_replayed_put = true;
		}
	}
	assert!(saw_replayed_put);
}

// vim: ts=4
