//! Tenant data tests: KV scoping and TTL, document queries, blobs,
//! snapshots, events and the activity log.

use std::sync::Arc;

use bytes::Bytes;
use fazt::data_adapter::{DataAdapter, Scope};
use fazt::error::Error;
use fazt::meta_adapter::{
	ActivityEntry, Actor, CreateAppOptions, EventRecord, ListActivityOptions, ListEventsOptions,
	MetaAdapter,
};
use fazt::storage::query::DocQuery;
use fazt::types::{AppId, Timestamp, UserId};
use fazt_store_sqlite::StoreSqlite;
use serde_json::json;
use tempfile::TempDir;

async fn create_test_store() -> (Arc<StoreSqlite>, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let store = StoreSqlite::new(temp_dir.path().join("data.db"))
		.await
		.expect("Failed to create store");
	(Arc::new(store), temp_dir)
}

async fn seed_app(store: &StoreSqlite, n: u32) -> AppId {
	let id = AppId::parse(&format!("app_{:08}", n)).expect("valid id");
	store.create_app(&id, CreateAppOptions::default()).await.expect("create app");
	id
}

fn event(domain: &str, event_type: &str) -> EventRecord {
	EventRecord {
		domain: domain.into(),
		tags: None,
		source_type: Some("web".into()),
		event_type: event_type.into(),
		path: Some("/".into()),
		referrer: None,
		user_agent: Some("test-agent".into()),
		ip: Some("10.0.0.1".into()),
		query_params: None,
		created_at: Timestamp::now(),
	}
}

#[tokio::test]
async fn kv_round_trip() {
	let (store, _temp) = create_test_store().await;
	let app = seed_app(&store, 1).await;
	let scope = Scope::shared(app);

	store.kv_set(&scope, "greeting", &json!({"hello": "world"}), None).await.expect("set");
	let value = store.kv_get(&scope, "greeting").await.expect("get");
	assert_eq!(value, Some(json!({"hello": "world"})));

	assert!(store.kv_del(&scope, "greeting").await.expect("del"));
	assert_eq!(store.kv_get(&scope, "greeting").await.expect("get gone"), None);
	assert!(!store.kv_del(&scope, "greeting").await.expect("del again"));
}

#[tokio::test]
async fn kv_is_tenant_isolated() {
	let (store, _temp) = create_test_store().await;
	let a = Scope::shared(seed_app(&store, 1).await);
	let b = Scope::shared(seed_app(&store, 2).await);

	store.kv_set(&a, "s", &json!("A"), None).await.expect("a set");
	store.kv_set(&b, "s", &json!("B"), None).await.expect("b set");

	assert_eq!(store.kv_get(&a, "s").await.expect("a get"), Some(json!("A")));
	assert_eq!(store.kv_get(&b, "s").await.expect("b get"), Some(json!("B")));
}

#[tokio::test]
async fn kv_user_scope_is_distinct_from_shared() {
	let (store, _temp) = create_test_store().await;
	let app = seed_app(&store, 1).await;
	let shared = Scope::shared(app.clone());
	let user = Scope::for_user(app, UserId(7));

	store.kv_set(&shared, "pref", &json!("shared"), None).await.expect("shared");
	store.kv_set(&user, "pref", &json!("mine"), None).await.expect("user");

	assert_eq!(store.kv_get(&shared, "pref").await.expect("shared get"), Some(json!("shared")));
	assert_eq!(store.kv_get(&user, "pref").await.expect("user get"), Some(json!("mine")));
}

#[tokio::test]
async fn kv_expired_rows_read_as_absent() {
	let (store, _temp) = create_test_store().await;
	let scope = Scope::shared(seed_app(&store, 1).await);

	store.kv_set(&scope, "ephemeral", &json!(1), Some(-5)).await.expect("set expired");
	assert_eq!(store.kv_get(&scope, "ephemeral").await.expect("get"), None);
	assert!(store.kv_keys(&scope, None).await.expect("keys").is_empty());

	let purged = store.kv_purge_expired().await.expect("purge");
	assert_eq!(purged, 1);
}

#[tokio::test]
async fn kv_keys_prefix_filter() {
	let (store, _temp) = create_test_store().await;
	let scope = Scope::shared(seed_app(&store, 1).await);

	for key in ["user:1", "user:2", "post:1"] {
		store.kv_set(&scope, key, &json!(0), None).await.expect("set");
	}
	let keys = store.kv_keys(&scope, Some("user:")).await.expect("keys");
	assert_eq!(keys.len(), 2);
	let all = store.kv_keys(&scope, None).await.expect("all");
	assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn doc_insert_get_round_trip() {
	let (store, _temp) = create_test_store().await;
	let scope = Scope::shared(seed_app(&store, 1).await);

	let inserted = store
		.doc_insert(&scope, "notes", json!({"title": "first", "stars": 3}))
		.await
		.expect("insert");
	let read = store.doc_get(&scope, "notes", &inserted.doc_id).await.expect("get");
	assert_eq!(read.body, json!({"title": "first", "stars": 3}));
	assert_eq!(read.collection.as_ref(), "notes");
}

#[tokio::test]
async fn doc_query_filters_and_orders() {
	let (store, _temp) = create_test_store().await;
	let scope = Scope::shared(seed_app(&store, 1).await);

	for (title, stars) in [("a", 1), ("b", 5), ("c", 3), ("d", 5)] {
		store
			.doc_insert(&scope, "notes", json!({"title": title, "stars": stars}))
			.await
			.expect("insert");
	}

	let query = DocQuery::from_json(&json!({
		"where": {"op": "eq", "field": "stars", "value": 5},
		"order": "title",
	}))
	.expect("parse");
	let docs = store.doc_query(&scope, "notes", &query).await.expect("query");
	assert_eq!(docs.len(), 2);
	assert_eq!(docs[0].body["title"], "b");
	assert_eq!(docs[1].body["title"], "d");

	let query = DocQuery::from_json(&json!({
		"where": {"op": "gt", "field": "stars", "value": 2},
		"order": "-stars",
		"limit": 2,
	}))
	.expect("parse gt");
	let docs = store.doc_query(&scope, "notes", &query).await.expect("query gt");
	assert_eq!(docs.len(), 2);
	assert_eq!(docs[0].body["stars"], 5);

	let query = DocQuery::from_json(&json!({
		"where": {"op": "and", "exprs": [
			{"op": "gt", "field": "stars", "value": 1},
			{"op": "in", "field": "title", "values": ["c", "d"]}
		]}
	}))
	.expect("parse and");
	let docs = store.doc_query(&scope, "notes", &query).await.expect("query and");
	assert_eq!(docs.len(), 2);
}

#[tokio::test]
async fn doc_update_and_delete() {
	let (store, _temp) = create_test_store().await;
	let scope = Scope::shared(seed_app(&store, 1).await);

	let doc = store.doc_insert(&scope, "notes", json!({"v": 1})).await.expect("insert");
	let updated =
		store.doc_update(&scope, "notes", &doc.doc_id, json!({"v": 2})).await.expect("update");
	assert_eq!(updated.body, json!({"v": 2}));

	assert!(store.doc_delete(&scope, "notes", &doc.doc_id).await.expect("delete"));
	assert!(matches!(
		store.doc_get(&scope, "notes", &doc.doc_id).await,
		Err(Error::NotFound)
	));
}

#[tokio::test]
async fn blob_round_trip_preserves_mime() {
	let (store, _temp) = create_test_store().await;
	let scope = Scope::shared(seed_app(&store, 1).await);
	let payload = Bytes::from_static(b"\x89PNG\r\n\x1a\nfakepng");

	store.blob_put(&scope, "logo", payload.clone(), "image/png").await.expect("put");
	let blob = store.blob_get(&scope, "logo").await.expect("get");
	assert_eq!(blob.bytes, payload);
	assert_eq!(&*blob.mime, "image/png");
	assert_eq!(blob.size, payload.len() as u64);

	let listed = store.blob_list(&scope).await.expect("list");
	assert_eq!(listed.len(), 1);
	assert!(store.blob_delete(&scope, "logo").await.expect("delete"));
}

#[tokio::test]
async fn snapshot_restore_round_trip() {
	let (store, _temp) = create_test_store().await;
	let app = seed_app(&store, 1).await;
	let scope = Scope::shared(app.clone());

	store.kv_set(&scope, "k1", &json!("v1"), None).await.expect("kv");
	let doc = store.doc_insert(&scope, "notes", json!({"keep": true})).await.expect("doc");

	store.snapshot_create(&app, "before").await.expect("snapshot");

	// Arbitrary mutations after the snapshot
	store.kv_set(&scope, "k1", &json!("changed"), None).await.expect("mutate kv");
	store.kv_set(&scope, "k2", &json!("extra"), None).await.expect("extra kv");
	store.doc_delete(&scope, "notes", &doc.doc_id).await.expect("drop doc");

	store.snapshot_restore(&app, "before").await.expect("restore");

	assert_eq!(store.kv_get(&scope, "k1").await.expect("k1"), Some(json!("v1")));
	assert_eq!(store.kv_get(&scope, "k2").await.expect("k2"), None);
	let restored = store.doc_get(&scope, "notes", &doc.doc_id).await.expect("doc back");
	assert_eq!(restored.body, json!({"keep": true}));

	let snapshots = store.snapshot_list(&app).await.expect("list");
	assert_eq!(snapshots.len(), 1);
	assert!(matches!(
		store.snapshot_restore(&app, "missing").await,
		Err(Error::NotFound)
	));
}

#[tokio::test]
async fn event_batch_insert_and_filters() {
	let (store, _temp) = create_test_store().await;

	let batch: Vec<EventRecord> = (0..50)
		.map(|i| event(if i % 2 == 0 { "blog" } else { "shop" }, "pageview"))
		.collect();
	store.insert_events(batch).await.expect("batch insert");
	store.insert_events(vec![event("blog", "request")]).await.expect("single");
	store.insert_events(Vec::new()).await.expect("empty batch is fine");

	assert_eq!(store.count_events_since(Timestamp(0)).await.expect("count"), 51);

	let blog = store
		.list_events(&ListEventsOptions { domain: Some("blog".into()), ..Default::default() })
		.await
		.expect("list blog");
	assert_eq!(blog.len(), 26);

	let pageviews = store
		.list_events(&ListEventsOptions {
			domain: Some("blog".into()),
			event_type: Some("pageview".into()),
			..Default::default()
		})
		.await
		.expect("list pageviews");
	assert_eq!(pageviews.len(), 25);
}

#[tokio::test]
async fn activity_weight_first_retention() {
	let (store, _temp) = create_test_store().await;

	for i in 0..10u8 {
		store
			.append_activity(ActivityEntry {
				weight: if i < 8 { 1 } else { 8 },
				actor: Actor::System,
				actor_id: None,
				resource: "test".into(),
				action: format!("act{}", i).into(),
				result: "ok".into(),
				details: None,
				created_at: Timestamp(1000 + i64::from(i)),
			})
			.await
			.expect("append");
	}

	let pruned = store.prune_activity(4).await.expect("prune");
	assert_eq!(pruned, 6);

	let remaining = store.list_activity(&ListActivityOptions::default()).await.expect("list");
	assert_eq!(remaining.len(), 4);
	// Both heavy entries survived; noise aged out first
	assert_eq!(remaining.iter().filter(|e| e.weight == 8).count(), 2);
}

// vim: ts=4
