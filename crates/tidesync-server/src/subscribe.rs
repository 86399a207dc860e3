//! Bucket and key subscription engine.
//!
//! A subscription is served by a single spawned listener task that first
//! streams the initial snapshot, then forwards live change notices. The
//! watch receiver is created before the snapshot scan starts, so changes
//! committed during the scan are never lost; at worst a change is observed
//! both in the snapshot and as a live frame, which is idempotent for
//! consumers.
//!
//! Offline-enabled subscriptions are served the whole bucket: range, limit,
//! and field selection are the client's job so its local mirror stays
//! complete. Only `reverse` is honored for them.

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use tidesync_types::prelude::*;
use tidesync_types::query::project;
use tidesync_types::store_adapter::{ChangeNotice, IterateOptions, ScanStream};
use tidesync_types::types::{ChangeFrame, SubscribeParams};
use tidesync_types::utils::random_id;

use crate::app::App;
use crate::registry::WatchToken;
use crate::websocket::Connection;

/// Bucket names must not collide with the adapter's `bucket/key` composite
/// key scheme; keys may contain slashes, buckets may not.
pub(crate) fn validate_bucket(bucket: &str) -> TsResult<()> {
	if bucket.is_empty() || bucket.contains('/') {
		return Err(Error::ValidationError(format!("invalid bucket name: {:?}", bucket)));
	}
	Ok(())
}

/// Start serving a subscription on `conn`. Returns the new subscription id;
/// frames flow through the connection's aggregated channel.
pub async fn subscribe(app: &App, conn: &Arc<Connection>, params: SubscribeParams) -> TsResult<Box<str>> {
	validate_bucket(&params.bucket)?;
	let sub_id: Box<str> = format!("sub-{}", random_id()).into();

	if params.is_whole_bucket() {
		subscribe_bucket(app, conn, params, sub_id.clone()).await?;
	} else {
		subscribe_key(app, conn, params, sub_id.clone()).await?;
	}
	Ok(sub_id)
}

async fn subscribe_bucket(
	app: &App,
	conn: &Arc<Connection>,
	params: SubscribeParams,
	sub_id: Box<str>,
) -> TsResult<()> {
	// Watch before scan, so nothing committed mid-scan is missed
	let watch = if params.once { None } else { Some(app.store.watch(&params.bucket).await?) };

	let scan = if params.initial_value {
		let opts = if params.enable_offline {
			// Full-bucket contract: the client mirrors everything locally
			IterateOptions::new().with_reverse(params.reverse)
		} else {
			let mut opts = IterateOptions::new()
				.with_range(params.range.clone())
				.with_reverse(params.reverse);
			if params.limit >= 0 {
				opts = opts.with_limit(params.limit as u64);
			}
			opts
		};
		Some(app.store.iterate(&params.bucket, opts).await?)
	} else {
		None
	};

	let once = params.once;
	let task_conn = conn.clone();
	let task_id = sub_id.clone();
	let handle = tokio::spawn(async move {
		if let Some(scan) = scan {
			run_snapshot(&task_conn, &task_id, &params, scan).await;
		}
		if params.once {
			task_conn.send_frame(&task_id, ChangeFrame::Done).ok();
			return;
		}
		let Some(rx) = watch else { return };
		run_live(&task_conn, &task_id, &params, rx).await;
	});

	if once {
		// One-shot scans finish on their own, nothing to cancel later
		return Ok(());
	}
	conn.subscriptions.insert(&sub_id, WatchToken::single(handle))
}

/// Stream the initial snapshot as value frames. A scan error becomes an
/// error frame but does not tear the subscription down.
async fn run_snapshot(conn: &Connection, sub_id: &str, params: &SubscribeParams, mut scan: ScanStream) {
	while let Some(item) = scan.next().await {
		match item {
			Ok((key, value)) => {
				let frame = ChangeFrame::Value {
					key: params.keys.then_some(key),
					value: params.values.then(|| server_view(params, &value)),
				};
				if conn.send_frame(sub_id, frame).is_err() {
					return;
				}
			}
			Err(err) => {
				warn!("Snapshot scan failed for bucket {}: {}", params.bucket, err);
				conn.send_frame(sub_id, ChangeFrame::Error { message: err.to_string() }).ok();
				return;
			}
		}
	}
}

/// Forward live change notices until the bucket channel or the connection
/// closes.
async fn run_live(
	conn: &Connection,
	sub_id: &str,
	params: &SubscribeParams,
	mut rx: broadcast::Receiver<ChangeNotice>,
) {
	loop {
		let notice = match rx.recv().await {
			Ok(notice) => notice,
			Err(broadcast::error::RecvError::Lagged(missed)) => {
				warn!("Subscription {} lagged, {} change(s) dropped", sub_id, missed);
				continue;
			}
			Err(broadcast::error::RecvError::Closed) => return,
		};
		if !params.enable_offline && !params.range.contains(notice.key()) {
			continue;
		}
		let frame = match notice {
			ChangeNotice::Put { key, value } => {
				ChangeFrame::Put { key, value: server_view(params, &value) }
			}
			ChangeNotice::Delete { key } => ChangeFrame::Delete { key },
		};
		if conn.send_frame(sub_id, frame).is_err() {
			return;
		}
	}
}

async fn subscribe_key(
	app: &App,
	conn: &Arc<Connection>,
	params: SubscribeParams,
	sub_id: Box<str>,
) -> TsResult<()> {
	let key = params.key.clone().unwrap_or_default();

	let watch = if params.once { None } else { Some(app.store.watch(&params.bucket).await?) };

	if params.initial_value {
		match app.store.get(&params.bucket, &key).await {
			Ok(Some(value)) => {
				let frame = ChangeFrame::Value { key: None, value: Some(server_view(&params, &value)) };
				conn.send_frame(&sub_id, frame).ok();
			}
			Ok(None) => {
				debug!("No initial value for {}/{}", params.bucket, key);
			}
			Err(err) => {
				warn!("Initial read failed for {}/{}: {}", params.bucket, key, err);
				conn.send_frame(&sub_id, ChangeFrame::Error { message: err.to_string() }).ok();
			}
		}
	}

	if params.once {
		conn.send_frame(&sub_id, ChangeFrame::Done).ok();
		return Ok(());
	}

	let task_conn = conn.clone();
	let task_id = sub_id.clone();
	let handle = tokio::spawn(async move {
		let Some(mut rx) = watch else { return };
		loop {
			let notice = match rx.recv().await {
				Ok(notice) => notice,
				Err(broadcast::error::RecvError::Lagged(missed)) => {
					warn!("Subscription {} lagged, {} change(s) dropped", task_id, missed);
					continue;
				}
				Err(broadcast::error::RecvError::Closed) => return,
			};
			if notice.key() != key {
				continue;
			}
			let frame = match notice {
				ChangeNotice::Put { key, value } => {
					ChangeFrame::Put { key, value: server_view(&params, &value) }
				}
				ChangeNotice::Delete { key } => ChangeFrame::Delete { key },
			};
			if task_conn.send_frame(&task_id, frame).is_err() {
				return;
			}
		}
	});

	conn.subscriptions.insert(&sub_id, WatchToken::single(handle))
}

/// The value as this subscription sees it. Offline mirrors always get the
/// raw value; otherwise the query projection applies.
fn server_view(params: &SubscribeParams, value: &Value) -> Value {
	if params.enable_offline {
		value.clone()
	} else {
		project(params.query.as_ref(), value)
	}
}

// vim: ts=4
