//! Integration tests for the redb store adapter.

use futures::StreamExt;
use serde_json::{Value, json};
use tempfile::TempDir;

use tidesync::range::KeyRange;
use tidesync::store_adapter::{ChangeNotice, IterateOptions, StoreAdapter};
use tidesync_store_adapter_redb::StoreAdapterRedb;

fn open_adapter(dir: &TempDir) -> StoreAdapterRedb {
	StoreAdapterRedb::new(dir.path().join("store.redb")).expect("Failed to open store")
}

async fn collect(adapter: &StoreAdapterRedb, bucket: &str, opts: IterateOptions) -> Vec<(String, Value)> {
	let mut stream = adapter.iterate(bucket, opts).await.expect("iterate failed");
	let mut entries = Vec::new();
	while let Some(item) = stream.next().await {
		let (key, value) = item.expect("scan item failed");
		entries.push((key.to_string(), value));
	}
	entries
}

#[tokio::test]
async fn test_put_get_roundtrip() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);

	adapter.put("users", "42", json!({"name": "Ann"})).await.expect("put failed");
	let value = adapter.get("users", "42").await.expect("get failed");
	assert_eq!(value, Some(json!({"name": "Ann"})));
}

#[tokio::test]
async fn test_get_absent_key_is_none() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);
	assert_eq!(adapter.get("users", "nope").await.expect("get failed"), None);
}

#[tokio::test]
async fn test_buckets_are_isolated() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);

	adapter.put("users", "1", json!("u")).await.expect("put failed");
	adapter.put("posts", "1", json!("p")).await.expect("put failed");

	assert_eq!(adapter.get("users", "1").await.expect("get"), Some(json!("u")));
	assert_eq!(adapter.get("posts", "1").await.expect("get"), Some(json!("p")));
	assert_eq!(collect(&adapter, "users", IterateOptions::new()).await.len(), 1);
}

#[tokio::test]
async fn test_iterate_is_key_ordered() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);

	for key in ["30", "10", "20"] {
		adapter.put("nums", key, json!(key)).await.expect("put failed");
	}

	let keys: Vec<String> = collect(&adapter, "nums", IterateOptions::new())
		.await
		.into_iter()
		.map(|(k, _)| k)
		.collect();
	assert_eq!(keys, ["10", "20", "30"]);
}

#[tokio::test]
async fn test_iterate_honors_range_reverse_limit() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);

	for key in ["10", "20", "30", "40", "50"] {
		adapter.put("nums", key, json!(key)).await.expect("put failed");
	}

	let opts = IterateOptions::new()
		.with_range(KeyRange::new().with_gte("20").with_lt("50"))
		.with_reverse(true)
		.with_limit(2);
	let keys: Vec<String> =
		collect(&adapter, "nums", opts).await.into_iter().map(|(k, _)| k).collect();
	assert_eq!(keys, ["40", "30"]);
}

#[tokio::test]
async fn test_watch_delivers_put_and_delete() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);

	let mut rx = adapter.watch("users").await.expect("watch failed");
	adapter.put("users", "42", json!(1)).await.expect("put failed");
	adapter.delete("users", "42").await.expect("delete failed");

	match rx.recv().await.expect("recv failed") {
		ChangeNotice::Put { key, value } => {
			assert_eq!(key.as_ref(), "42");
			assert_eq!(value, json!(1));
		}
		other => panic!("expected put notice, got {:?}", other),
	}
	match rx.recv().await.expect("recv failed") {
		ChangeNotice::Delete { key } => assert_eq!(key.as_ref(), "42"),
		other => panic!("expected delete notice, got {:?}", other),
	}
}

#[tokio::test]
async fn test_delete_absent_key_is_silent() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);

	let mut rx = adapter.watch("users").await.expect("watch failed");
	adapter.delete("users", "nope").await.expect("delete failed");
	assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_drop_bucket_removes_everything_and_notifies() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);

	adapter.put("users", "1", json!(1)).await.expect("put failed");
	adapter.put("users", "2", json!(2)).await.expect("put failed");

	let mut rx = adapter.watch("users").await.expect("watch failed");
	adapter.drop_bucket("users").await.expect("drop failed");

	assert!(collect(&adapter, "users", IterateOptions::new()).await.is_empty());
	let mut deleted = Vec::new();
	for _ in 0..2 {
		if let ChangeNotice::Delete { key } = rx.recv().await.expect("recv failed") {
			deleted.push(key.to_string());
		}
	}
	deleted.sort();
	assert_eq!(deleted, ["1", "2"]);
}

#[tokio::test]
async fn test_values_survive_reopen() {
	let dir = TempDir::new().expect("tempdir");
	let path = dir.path().join("store.redb");
	{
		let adapter = StoreAdapterRedb::new(&path).expect("open failed");
		adapter.put("users", "42", json!({"a": 1})).await.expect("put failed");
		adapter.close().await.expect("close failed");
	}
	let adapter = StoreAdapterRedb::new(&path).expect("reopen failed");
	assert_eq!(adapter.get("users", "42").await.expect("get"), Some(json!({"a": 1})));
}

#[tokio::test]
async fn test_keys_may_contain_slashes() {
	let dir = TempDir::new().expect("tempdir");
	let adapter = open_adapter(&dir);

	adapter.put("files", "a/b/c", json!(1)).await.expect("put failed");
	let entries = collect(&adapter, "files", IterateOptions::new()).await;
	assert_eq!(entries, vec![("a/b/c".to_string(), json!(1))]);
}

// vim: ts=4
