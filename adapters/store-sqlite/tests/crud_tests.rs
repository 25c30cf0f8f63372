//! Store adapter CRUD tests: apps, labels, files, aliases, users and
//! sessions over a temp-file database.

use std::sync::Arc;

use bytes::Bytes;
use fazt::auth_adapter::{AuthAdapter, OAuthProfile, Role};
use fazt::error::Error;
use fazt::meta_adapter::{
	AliasKind, AliasRecord, AppSource, CreateAppOptions, ListAppsOptions, MetaAdapter,
	UpdateAppData,
};
use fazt::types::{AppId, Patch, Timestamp};
use fazt_store_sqlite::StoreSqlite;
use tempfile::TempDir;

async fn create_test_store() -> (Arc<StoreSqlite>, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let store = StoreSqlite::new(temp_dir.path().join("data.db"))
		.await
		.expect("Failed to create store");
	(Arc::new(store), temp_dir)
}

fn app_id(n: u32) -> AppId {
	AppId::parse(&format!("app_{:08}", n)).expect("valid id")
}

fn profile(provider_id: &str) -> OAuthProfile {
	OAuthProfile {
		provider: "github".into(),
		provider_id: provider_id.into(),
		email: Some(format!("{}@example.com", provider_id).into()),
		name: Some(provider_id.into()),
		avatar_url: None,
	}
}

#[tokio::test]
async fn create_and_read_app() {
	let (store, _temp) = create_test_store().await;
	let id = app_id(1);

	let created = store
		.create_app(
			&id,
			CreateAppOptions {
				label: Some("blog".into()),
				source: Some(AppSource::Deploy),
				..Default::default()
			},
		)
		.await
		.expect("create app");
	assert_eq!(created.id, id);
	assert_eq!(created.label.as_deref(), Some("blog"));

	let read = store.read_app(&id).await.expect("read app");
	assert_eq!(read.label.as_deref(), Some("blog"));

	let by_label = store.read_app_by_label("blog").await.expect("read by label");
	assert_eq!(by_label.id, id);
}

#[tokio::test]
async fn label_uniqueness_is_enforced() {
	let (store, _temp) = create_test_store().await;

	store
		.create_app(&app_id(1), CreateAppOptions { label: Some("prod".into()), ..Default::default() })
		.await
		.expect("first app");
	let second = store
		.create_app(&app_id(2), CreateAppOptions { label: Some("prod".into()), ..Default::default() })
		.await;
	assert!(matches!(second, Err(Error::Conflict(_))));

	// NULL labels may repeat
	store
		.create_app(&app_id(3), CreateAppOptions::default())
		.await
		.expect("unlabeled app");
	store
		.create_app(&app_id(4), CreateAppOptions::default())
		.await
		.expect("second unlabeled app");
}

#[tokio::test]
async fn label_swap_is_atomic_and_complete() {
	let (store, _temp) = create_test_store().await;
	let x = app_id(1);
	let y = app_id(2);

	store
		.create_app(&x, CreateAppOptions { label: Some("prod".into()), ..Default::default() })
		.await
		.expect("x");
	store
		.create_app(&y, CreateAppOptions { label: Some("prod-v2".into()), ..Default::default() })
		.await
		.expect("y");

	store.swap_labels(&x, &y).await.expect("swap");

	assert_eq!(store.read_app_by_label("prod").await.expect("prod").id, y);
	assert_eq!(store.read_app_by_label("prod-v2").await.expect("prod-v2").id, x);
}

#[tokio::test]
async fn update_app_label_patch_semantics() {
	let (store, _temp) = create_test_store().await;
	let id = app_id(1);
	store
		.create_app(&id, CreateAppOptions { label: Some("old".into()), ..Default::default() })
		.await
		.expect("create");

	// Undefined leaves the label alone
	let updated = store
		.update_app(&id, &UpdateAppData { label: Patch::Undefined, manifest: Patch::Undefined })
		.await
		.expect("noop update");
	assert_eq!(updated.label.as_deref(), Some("old"));

	// Value reassigns
	let updated = store
		.update_app(
			&id,
			&UpdateAppData { label: Patch::Value("new".into()), manifest: Patch::Undefined },
		)
		.await
		.expect("relabel");
	assert_eq!(updated.label.as_deref(), Some("new"));

	// Null clears
	let updated = store
		.update_app(&id, &UpdateAppData { label: Patch::Null, manifest: Patch::Undefined })
		.await
		.expect("clear");
	assert_eq!(updated.label, None);
	assert!(matches!(store.read_app_by_label("new").await, Err(Error::NotFound)));
}

#[tokio::test]
async fn file_write_read_list_delete() {
	let (store, _temp) = create_test_store().await;
	let id = app_id(1);
	store.create_app(&id, CreateAppOptions::default()).await.expect("create");

	store
		.write_file(&id, "index.html", Bytes::from_static(b"<h1>hi</h1>"), "text/html")
		.await
		.expect("write");
	store
		.write_file(&id, "api/main.js", Bytes::from_static(b"respond(1)"), "application/javascript")
		.await
		.expect("write handler");

	let file = store.read_file(&id, "index.html").await.expect("read");
	assert_eq!(&file.bytes[..], b"<h1>hi</h1>");
	assert_eq!(&*file.mime, "text/html");

	// Overwrite replaces content
	store
		.write_file(&id, "index.html", Bytes::from_static(b"<h1>v2</h1>"), "text/html")
		.await
		.expect("overwrite");
	let file = store.read_file(&id, "index.html").await.expect("read v2");
	assert_eq!(&file.bytes[..], b"<h1>v2</h1>");

	let files = store.list_files(&id).await.expect("list");
	assert_eq!(files.len(), 2);

	store.delete_file(&id, "api/main.js").await.expect("delete");
	assert!(matches!(store.read_file(&id, "api/main.js").await, Err(Error::NotFound)));
}

#[tokio::test]
async fn alias_crud() {
	let (store, _temp) = create_test_store().await;

	store
		.upsert_alias(&AliasRecord {
			subdomain: "shop".into(),
			kind: AliasKind::Proxy,
			target: Some("app_00000001".into()),
			permanent: false,
			split_targets: Vec::new(),
			created_at: Timestamp::now(),
		})
		.await
		.expect("upsert");

	let alias = store.read_alias("shop").await.expect("read");
	assert_eq!(alias.kind, AliasKind::Proxy);
	assert_eq!(alias.target.as_deref(), Some("app_00000001"));

	store.delete_alias("shop").await.expect("delete");
	assert!(matches!(store.read_alias("shop").await, Err(Error::NotFound)));
	assert!(matches!(store.delete_alias("shop").await, Err(Error::NotFound)));
}

#[tokio::test]
async fn first_user_becomes_owner() {
	let (store, _temp) = create_test_store().await;

	let first = store.upsert_oauth_user(&profile("alice")).await.expect("first user");
	assert_eq!(first.role, Role::Owner);

	let second = store.upsert_oauth_user(&profile("bob")).await.expect("second user");
	assert_eq!(second.role, Role::User);

	// Re-login does not mint a new user or change the role
	let again = store.upsert_oauth_user(&profile("alice")).await.expect("re-login");
	assert_eq!(again.id, first.id);
	assert_eq!(again.role, Role::Owner);
	assert_eq!(store.count_users().await.expect("count"), 2);
}

#[tokio::test]
async fn session_lifecycle() {
	let (store, _temp) = create_test_store().await;
	let user = store.upsert_oauth_user(&profile("alice")).await.expect("user");

	store.create_session(user.id, "tok-1", 3600).await.expect("create");
	let (session, session_user) = store.read_session("tok-1").await.expect("read");
	assert_eq!(session.user_id, user.id);
	assert_eq!(session_user.id, user.id);

	assert!(matches!(store.read_session("unknown").await, Err(Error::NotFound)));

	store.renew_session("tok-1", 7200).await.expect("renew");
	store.delete_session("tok-1").await.expect("logout");
	assert!(matches!(store.read_session("tok-1").await, Err(Error::NotFound)));
}

#[tokio::test]
async fn expired_sessions_read_as_expired() {
	let (store, _temp) = create_test_store().await;
	let user = store.upsert_oauth_user(&profile("alice")).await.expect("user");

	store.create_session(user.id, "tok-old", -10).await.expect("create expired");
	assert!(matches!(store.read_session("tok-old").await, Err(Error::SessionExpired)));

	let purged = store.purge_expired_sessions().await.expect("purge");
	assert_eq!(purged, 1);
	assert!(matches!(store.read_session("tok-old").await, Err(Error::NotFound)));
}

#[tokio::test]
async fn delete_app_cascades() {
	let (store, _temp) = create_test_store().await;
	let id = app_id(1);
	store
		.create_app(&id, CreateAppOptions { label: Some("doomed".into()), ..Default::default() })
		.await
		.expect("create");
	store
		.write_file(&id, "index.html", Bytes::from_static(b"x"), "text/html")
		.await
		.expect("file");

	use fazt::data_adapter::{DataAdapter, Scope};
	let scope = Scope::shared(id.clone());
	store.kv_set(&scope, "k", &serde_json::json!(1), None).await.expect("kv");
	store
		.doc_insert(&scope, "notes", serde_json::json!({"t": "x"}))
		.await
		.expect("doc");
	store
		.blob_put(&scope, "b", Bytes::from_static(b"bin"), "application/octet-stream")
		.await
		.expect("blob");

	store.delete_app(&id).await.expect("delete");

	assert!(matches!(store.read_app(&id).await, Err(Error::NotFound)));
	assert!(matches!(store.read_file(&id, "index.html").await, Err(Error::NotFound)));
	assert_eq!(store.kv_get(&scope, "k").await.expect("kv gone"), None);
	let usage = store.data_usage(&id).await.expect("usage");
	assert_eq!(usage.kv_count + usage.doc_count + usage.blob_count + usage.file_count, 0);
}

#[tokio::test]
async fn list_apps_filters_by_source() {
	let (store, _temp) = create_test_store().await;
	store
		.create_app(
			&app_id(1),
			CreateAppOptions { source: Some(AppSource::Git), ..Default::default() },
		)
		.await
		.expect("git app");
	store
		.create_app(
			&app_id(2),
			CreateAppOptions { source: Some(AppSource::Deploy), ..Default::default() },
		)
		.await
		.expect("deploy app");

	let git_only = store
		.list_apps(&ListAppsOptions { source: Some(AppSource::Git), ..Default::default() })
		.await
		.expect("list");
	assert_eq!(git_only.len(), 1);
	assert_eq!(git_only[0].source, AppSource::Git);
}

// vim: ts=4
