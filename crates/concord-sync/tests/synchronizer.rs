//! End-to-end batches through the Synchronizer with the `schedule` resource.

use concord_core::{CommonDataId, ResultType, SyncAction, SyncError, SyncMethod, SyncRequestHeader};
use concord_db::{Database, DbConfig};
use concord_sync::{
    Clock, ConcurrencyMode, ConflictStrategyKind, DownloadQuery, DownloadRequest, LockManager, ManualClock,
    ResourceRegistry, Schedule, ScheduleStore, SyncConfig, SyncContext, SyncResource, Synchronizer,
    UploadMessage, UploadRequest, UploadResult,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

const SCHEDULE: &str = "schedule";

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    sync: Synchronizer,
    clock: ManualClock,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(SyncConfig::default()).await
    }

    async fn with_config(config: SyncConfig) -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clock = ManualClock::new(100);
        let config = Arc::new(config);

        let locks = LockManager::new(db.clone(), Arc::new(clock.clone()), config.lock_ttl_millis());
        let registry = ResourceRegistry::builder()
            .register(SyncResource::new(ScheduleStore::new()).with_locks(locks))
            .unwrap()
            .build();

        let ctx = SyncContext::new(config, Arc::new(clock.clone()));
        Harness {
            sync: Synchronizer::new(db, registry, ctx),
            clock,
        }
    }

    async fn upload(&self, client: &str, messages: Vec<UploadMessage>) -> UploadResult {
        self.sync
            .upload(UploadRequest::new(messages).with_storage_id(client))
            .await
            .unwrap()
    }

    /// Creates `item_id` at `at` and returns its version.
    async fn seed(&self, item_id: &str, title: &str, at: i64) -> i64 {
        self.clock.set(at);
        let result = self.upload("seeder", vec![post(Some(item_id), title)]).await;
        assert_eq!(result.result_type, ResultType::Ok);
        at
    }

    async fn read(&self, item_id: &str) -> Result<concord_core::SyncResponse<Value>, SyncError> {
        let header = SyncRequestHeader::new(SCHEDULE, SyncMethod::Get, self.clock.now_millis()).with_item(item_id);
        self.sync.get(&header).await
    }
}

fn schedule(title: &str) -> Value {
    serde_json::to_value(Schedule::new(title, 1_000, 2_000)).unwrap()
}

fn post(item_id: Option<&str>, title: &str) -> UploadMessage {
    let mut header = SyncRequestHeader::new(SCHEDULE, SyncMethod::Post, 0);
    header.sync_data_id = item_id.map(str::to_string);
    UploadMessage::new(header, Some(schedule(title)))
}

fn put(item_id: &str, last_modified: i64, title: &str) -> UploadMessage {
    let header = SyncRequestHeader::new(SCHEDULE, SyncMethod::Put, 0)
        .with_item(item_id)
        .with_last_modified(last_modified);
    UploadMessage::new(header, Some(schedule(title)))
}

fn delete(item_id: &str, last_modified: i64) -> UploadMessage {
    let header = SyncRequestHeader::new(SCHEDULE, SyncMethod::Delete, 0)
        .with_item(item_id)
        .with_last_modified(last_modified);
    UploadMessage::new(header, None)
}

fn id(item_id: &str) -> CommonDataId {
    CommonDataId::new(SCHEDULE, item_id)
}

fn title_of(response: &concord_core::SyncResponse<Value>) -> Option<String> {
    response
        .element
        .as_ref()
        .and_then(|element| element["title"].as_str())
        .map(str::to_string)
}

// =============================================================================
// Upload: conflicts
// =============================================================================

#[tokio::test]
async fn test_stale_put_returns_server_state() {
    let h = Harness::new().await;
    h.seed("S1", "standup", 100).await;

    // Alice writes first, from version 100
    h.clock.set(150);
    let alice = h.upload("alice", vec![put("S1", 100, "moved standup")]).await;
    assert_eq!(alice.result_type, ResultType::Ok);
    assert_eq!(alice.items.get(&id("S1")).unwrap().header.last_modified, 150);

    // Bob still holds version 100
    h.clock.set(200);
    let bob = h.upload("bob", vec![put("S1", 100, "renamed standup")]).await;

    assert_eq!(bob.result_type, ResultType::Updated);
    assert_eq!(bob.items.len(), 1);
    let server = bob.items.get(&id("S1")).unwrap();
    assert_eq!(server.header.last_modified, 150);
    assert_eq!(title_of(server).as_deref(), Some("moved standup"));

    // Nothing of Bob's batch was applied
    let stored = h.read("S1").await.unwrap();
    assert_eq!(title_of(&stored).as_deref(), Some("moved standup"));
}

#[tokio::test]
async fn test_conflict_drops_earlier_results_but_scans_on() {
    let h = Harness::new().await;
    h.seed("S1", "one", 100).await;
    h.seed("S2", "two", 100).await;
    h.seed("S3", "three", 100).await;

    h.clock.set(150);
    h.upload("alice", vec![put("S1", 100, "one*"), put("S3", 100, "three*")]).await;

    h.clock.set(200);
    let result = h
        .upload(
            "bob",
            vec![put("S2", 100, "two by bob"), put("S1", 100, "one by bob"), put("S3", 100, "three by bob")],
        )
        .await;

    assert_eq!(result.result_type, ResultType::Updated);
    let ids: Vec<String> = result.items.iter().map(|r| r.header.sync_data_id.clone()).collect();
    assert_eq!(ids, vec!["S1", "S3"]);

    // The OK write to S2 was rolled back with the batch
    let s2 = h.read("S2").await.unwrap();
    assert_eq!(s2.header.last_modified, 100);
    assert_eq!(title_of(&s2).as_deref(), Some("two"));
}

#[tokio::test]
async fn test_duplicate_id_stops_the_batch() {
    let h = Harness::new().await;
    h.seed("S1", "one", 100).await;
    h.seed("S9", "nine", 100).await;

    h.clock.set(150);
    h.upload("alice", vec![put("S1", 100, "one*")]).await;

    h.clock.set(200);
    let result = h
        .upload(
            "bob",
            vec![post(Some("S2"), "two"), post(Some("S9"), "nine again"), put("S1", 100, "one by bob")],
        )
        .await;

    assert_eq!(result.result_type, ResultType::DuplicatedId);
    assert_eq!(result.items.len(), 1);
    let existing = result.items.get(&id("S9")).unwrap();
    assert_eq!(title_of(existing).as_deref(), Some("nine"));

    // S1 was never reached, S2 was rolled back
    assert!(!result.items.contains(&id("S1")));
    assert!(matches!(h.read("S2").await, Err(SyncError::NotFound(_))));
}

#[tokio::test]
async fn test_client_wins_overwrites_stale_versions() {
    let config = SyncConfig::default().with_conflict_strategy(ConflictStrategyKind::ClientWins);
    let h = Harness::with_config(config).await;
    h.seed("S1", "standup", 100).await;

    h.clock.set(150);
    h.upload("alice", vec![put("S1", 100, "alice's")]).await;

    h.clock.set(200);
    let bob = h.upload("bob", vec![put("S1", 100, "bob's")]).await;

    assert_eq!(bob.result_type, ResultType::Ok);
    let stored = h.read("S1").await.unwrap();
    assert_eq!(stored.header.last_modified, 200);
    assert_eq!(title_of(&stored).as_deref(), Some("bob's"));
}

// =============================================================================
// Upload: create, delete, revive
// =============================================================================

#[tokio::test]
async fn test_post_without_id_allocates_prefixed_id() {
    let h = Harness::new().await;
    h.clock.set(500);

    let result = h.upload("alice", vec![post(None, "standup")]).await;

    assert_eq!(result.result_type, ResultType::Ok);
    let created = result.items.iter().next().unwrap();
    assert!(created.header.sync_data_id.starts_with("schedule-"));
    assert_eq!(created.header.action, SyncAction::Create);
    assert_eq!(created.header.last_modified, 500);
}

#[tokio::test]
async fn test_tombstone_propagates_and_delete_is_idempotent() {
    let h = Harness::new().await;
    h.seed("S1", "standup", 100).await;

    h.clock.set(200);
    let deleted = h.upload("alice", vec![delete("S1", 100)]).await;
    assert_eq!(deleted.result_type, ResultType::Ok);
    let tombstone = deleted.items.get(&id("S1")).unwrap();
    assert_eq!(tombstone.header.action, SyncAction::Delete);
    assert_eq!(tombstone.element, None);

    // Bob learns of the deletion
    let download = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id("bob"))
        .await
        .unwrap();
    let seen = download.items.get(&id("S1")).unwrap();
    assert_eq!(seen.header.action, SyncAction::Delete);
    assert_eq!(seen.element, None);

    // Deleting again from the tombstone's version changes nothing
    h.clock.set(300);
    let again = h.upload("bob", vec![delete("S1", 200)]).await;
    assert_eq!(again.result_type, ResultType::Ok);
    assert_eq!(again.items.get(&id("S1")).unwrap().header.last_modified, 200);

    // A stale delete is a conflict carrying the tombstone
    let stale = h.upload("carol", vec![delete("S1", 100)]).await;
    assert_eq!(stale.result_type, ResultType::Updated);
    assert_eq!(stale.items.get(&id("S1")).unwrap().header.action, SyncAction::Delete);
}

#[tokio::test]
async fn test_put_onto_tombstone() {
    let h = Harness::new().await;
    h.seed("S1", "standup", 100).await;
    h.clock.set(200);
    h.upload("alice", vec![delete("S1", 100)]).await;

    h.clock.set(300);
    let current = h
        .sync
        .upload(UploadRequest::new(vec![put("S1", 200, "edit")]).with_storage_id("bob"))
        .await;
    assert!(matches!(current, Err(SyncError::NotFound(_))));

    let stale = h.upload("bob", vec![put("S1", 100, "edit")]).await;
    assert_eq!(stale.result_type, ResultType::Updated);
    assert_eq!(stale.items.get(&id("S1")).unwrap().header.action, SyncAction::Delete);
}

#[tokio::test]
async fn test_post_onto_tombstone_revives() {
    let h = Harness::new().await;
    h.seed("S1", "standup", 100).await;
    h.clock.set(200);
    h.upload("alice", vec![delete("S1", 100)]).await;

    h.clock.set(300);
    let revived = h.upload("bob", vec![post(Some("S1"), "standup returns")]).await;

    assert_eq!(revived.result_type, ResultType::Ok);
    let item = revived.items.get(&id("S1")).unwrap();
    assert_eq!(item.header.action, SyncAction::Create);
    assert_eq!(item.header.last_modified, 300);

    let stored = h.read("S1").await.unwrap();
    assert_eq!(title_of(&stored).as_deref(), Some("standup returns"));
}

#[tokio::test]
async fn test_post_rejects_ids_in_the_allocated_namespace() {
    let h = Harness::new().await;
    h.clock.set(500);

    let claimed = h
        .sync
        .upload(UploadRequest::new(vec![post(Some("schedule-2"), "squatter")]).with_storage_id("alice"))
        .await;
    assert!(matches!(claimed, Err(SyncError::BadRequest(_))));

    // Server allocation is unaffected
    let first = h.upload("alice", vec![post(None, "standup")]).await;
    assert_eq!(first.result_type, ResultType::Ok);
    let second = h.upload("alice", vec![post(None, "retro")]).await;
    assert_eq!(second.result_type, ResultType::Ok);

    // An allocated id that was deleted can still be re-created
    let allocated = first.items.iter().next().unwrap().header.sync_data_id.clone();
    h.clock.set(600);
    assert_eq!(h.upload("alice", vec![delete(&allocated, 500)]).await.result_type, ResultType::Ok);

    h.clock.set(700);
    let revived = h.upload("bob", vec![post(Some(&allocated), "standup again")]).await;
    assert_eq!(revived.result_type, ResultType::Ok);
    assert_eq!(revived.items.get(&id(&allocated)).unwrap().header.last_modified, 700);
}

// =============================================================================
// Upload: idempotence and hard failures
// =============================================================================

#[tokio::test]
async fn test_retransmitted_upload_is_replayed() {
    let h = Harness::new().await;
    h.clock.set(1_000);

    let request = UploadRequest::new(vec![post(None, "standup")])
        .with_storage_id("alice")
        .with_upload_time(42);

    let first = h.sync.upload(request.clone()).await.unwrap();
    assert!(!first.replayed);

    h.clock.set(5_000);
    let second = h.sync.upload(request).await.unwrap();
    assert!(second.replayed);
    assert_eq!(second.result_type, ResultType::Ok);
    assert_eq!(second.sync_time, first.sync_time);

    // Only one schedule was created
    let download = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id("bob"))
        .await
        .unwrap();
    assert_eq!(download.items.len(), 1);
}

#[tokio::test]
async fn test_conflicted_upload_is_not_remembered() {
    let h = Harness::new().await;
    h.seed("S1", "standup", 100).await;
    h.clock.set(150);
    h.upload("alice", vec![put("S1", 100, "alice's")]).await;

    h.clock.set(200);
    let request = UploadRequest::new(vec![put("S1", 100, "bob's")])
        .with_storage_id("bob")
        .with_upload_time(7);
    let first = h.sync.upload(request.clone()).await.unwrap();
    assert_eq!(first.result_type, ResultType::Updated);

    let retry = h.sync.upload(request).await.unwrap();
    assert!(!retry.replayed);
    assert_eq!(retry.result_type, ResultType::Updated);
}

#[tokio::test]
async fn test_hard_failures_abort_the_batch() {
    let h = Harness::new().await;
    h.clock.set(100);

    let unknown = UploadMessage::new(
        SyncRequestHeader::new("person", SyncMethod::Post, 0),
        Some(json!({ "name": "Ada" })),
    );
    let err = h
        .sync
        .upload(UploadRequest::new(vec![post(Some("S1"), "standup"), unknown]).with_storage_id("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownResource(name) if name == "person"));
    assert!(matches!(h.read("S1").await, Err(SyncError::NotFound(_))));

    // PUT without a declared version
    let mut no_version = put("S1", 0, "standup");
    no_version.header.last_modified = None;
    let err = h.sync.upload(UploadRequest::new(vec![no_version])).await.unwrap_err();
    assert!(matches!(err, SyncError::BadRequest(_)));

    // POST without an element
    let mut no_element = post(None, "standup");
    no_element.element = None;
    let err = h.sync.upload(UploadRequest::new(vec![no_element])).await.unwrap_err();
    assert!(matches!(err, SyncError::BadRequest(_)));

    // Element of the wrong shape
    let garbled = UploadMessage::new(SyncRequestHeader::new(SCHEDULE, SyncMethod::Post, 0), Some(json!(17)));
    let err = h.sync.upload(UploadRequest::new(vec![garbled])).await.unwrap_err();
    assert!(matches!(err, SyncError::BadRequest(_)));

    // PUT on an item that never existed
    let err = h
        .sync
        .upload(UploadRequest::new(vec![put("S404", 100, "ghost")]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

// =============================================================================
// Download
// =============================================================================

#[tokio::test]
async fn test_download_issues_storage_id_and_watermark() {
    let h = Harness::new().await;
    h.clock.set(1_000_000);

    let first = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]))
        .await
        .unwrap();

    assert!(!first.storage_id.is_empty());
    assert_eq!(first.sync_time, 1_000_000 - 120_000);
    assert!(first.items.is_empty());
}

#[tokio::test]
async fn test_download_uses_recorded_watermark() {
    let h = Harness::new().await;
    h.seed("OLD", "long ago", 500_000).await;
    h.seed("NEW", "recent", 950_000).await;

    // Watermark 880_000 is recorded for bob
    h.clock.set(1_000_000);
    let first = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id("bob"))
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.sync_time, 880_000);

    h.clock.set(1_100_000);
    let second = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id("bob"))
        .await
        .unwrap();

    // Items at or before the watermark are not sent again
    assert!(!second.items.contains(&id("OLD")));
    assert!(second.items.contains(&id("NEW")));
    assert_eq!(second.sync_time, 980_000);
}

#[tokio::test]
async fn test_next_download_catches_a_racing_upload() {
    let h = Harness::new().await;

    h.clock.set(1_000_000);
    let first = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id("bob"))
        .await
        .unwrap();
    assert!(first.items.is_empty());

    // An upload stamped just before the download finished commits after it
    h.clock.set(999_000);
    h.upload("alice", vec![post(Some("S1"), "racing")]).await;

    h.clock.set(1_010_000);
    let second = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id("bob"))
        .await
        .unwrap();
    assert!(second.items.contains(&id("S1")));
}

#[tokio::test]
async fn test_download_filters_and_merges_queries() {
    let h = Harness::new().await;
    h.seed("S1", "one", 100).await;
    h.seed("S2", "two", 100).await;
    h.seed("S3", "three", 100).await;

    h.clock.set(1_000);
    let request = DownloadRequest::new(vec![
        DownloadQuery::items(SCHEDULE, ["S1", "S2"]),
        DownloadQuery::items(SCHEDULE, ["S2"]),
    ])
    .since(0);
    let result = h.sync.download(request).await.unwrap();

    let ids: Vec<String> = result.items.iter().map(|r| r.header.sync_data_id.clone()).collect();
    assert_eq!(ids, vec!["S1", "S2"]);
    assert_eq!(result.items_by_resource()[SCHEDULE].len(), 2);

    let unknown = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all("person")]))
        .await;
    assert!(matches!(unknown, Err(SyncError::UnknownResource(_))));
}

// =============================================================================
// Pessimistic locking
// =============================================================================

#[tokio::test]
async fn test_pessimistic_lock_blocks_other_clients() {
    let config = SyncConfig::default().with_concurrency(ConcurrencyMode::Pessimistic);
    let h = Harness::with_config(config).await;
    h.seed("S1", "standup", 100).await;

    h.clock.set(1_000);
    let lock = h.sync.lock(&id("S1"), None).await.unwrap();

    // Reads by others are refused, downloads skip the item
    assert!(matches!(h.read("S1").await, Err(SyncError::LockConflict { server: None, .. })));
    let download = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).since(0))
        .await
        .unwrap();
    assert!(!download.items.contains(&id("S1")));

    // The holder still sees it
    let own = h
        .sync
        .download(
            DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)])
                .since(0)
                .with_lock_token(&lock.token),
        )
        .await
        .unwrap();
    assert!(own.items.contains(&id("S1")));

    // A write without the token is a conflict carrying the server state
    let blocked = h.upload("bob", vec![put("S1", 100, "bob's")]).await;
    assert_eq!(blocked.result_type, ResultType::Updated);
    assert_eq!(title_of(blocked.items.get(&id("S1")).unwrap()).as_deref(), Some("standup"));

    // The holder writes and the lock is released
    let mut message = put("S1", 100, "alice's");
    message.header.lock_token = Some(lock.token.clone());
    let written = h.upload("alice", vec![message]).await;
    assert_eq!(written.result_type, ResultType::Ok);

    h.sync.lock(&id("S1"), None).await.unwrap();
}

#[tokio::test]
async fn test_lock_expiry_ignores_client_request_time() {
    let config = SyncConfig::default().with_concurrency(ConcurrencyMode::Pessimistic);
    let h = Harness::with_config(config).await;
    h.seed("S1", "standup", 100).await;

    h.clock.set(1_000);
    h.sync.lock(&id("S1"), None).await.unwrap();

    // A requestTime far past any expiry does not unlock the item
    let header = SyncRequestHeader::new(SCHEDULE, SyncMethod::Get, 9_999_999_999).with_item("S1");
    let read = h.sync.get(&header).await;
    assert!(matches!(read, Err(SyncError::LockConflict { .. })));
}

#[tokio::test]
async fn test_watermark_passes_items_left_out_while_locked() {
    let config = SyncConfig::default().with_concurrency(ConcurrencyMode::Pessimistic);
    let h = Harness::with_config(config).await;
    h.seed("S1", "standup", 100).await;

    h.clock.set(1_000_000);
    let lock = h.sync.lock(&id("S1"), None).await.unwrap();
    let locked = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id("bob"))
        .await
        .unwrap();
    assert!(!locked.items.contains(&id("S1")));
    assert_eq!(locked.sync_time, 880_000);

    // Released unchanged: the recorded watermark is already past it
    h.sync.unlock(&id("S1"), &lock.token).await.unwrap();
    h.clock.set(1_100_000);
    let after = h
        .sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id("bob"))
        .await
        .unwrap();
    assert!(!after.items.contains(&id("S1")));

    // An explicit earlier lastSyncTime recovers it
    let full = h
        .sync
        .download(
            DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)])
                .with_storage_id("bob")
                .since(0),
        )
        .await
        .unwrap();
    assert!(full.items.contains(&id("S1")));
}

#[tokio::test]
async fn test_keep_lock_and_expiry() {
    let config = SyncConfig::default().with_concurrency(ConcurrencyMode::Pessimistic);
    let h = Harness::with_config(config).await;
    h.seed("S1", "standup", 100).await;

    h.clock.set(1_000);
    let lock = h.sync.lock(&id("S1"), Some(10_000)).await.unwrap();

    let mut message = put("S1", 100, "alice's");
    message.header.lock_token = Some(lock.token.clone());
    message.header.keep_lock = true;
    assert_eq!(h.upload("alice", vec![message]).await.result_type, ResultType::Ok);

    // Still held
    assert!(matches!(
        h.sync.lock(&id("S1"), None).await,
        Err(SyncError::LockConflict { .. })
    ));

    // Expired locks stop blocking without an unlock
    h.clock.set(11_000);
    let bob = h.upload("bob", vec![put("S1", 1_000, "bob's")]).await;
    assert_eq!(bob.result_type, ResultType::Ok);
    assert_eq!(h.sync.purge_expired_locks().await.unwrap(), 1);
}

#[tokio::test]
async fn test_locking_requires_a_lockable_resource() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let clock = ManualClock::new(0);
    let registry = ResourceRegistry::builder()
        .register(SyncResource::new(ScheduleStore::new()))
        .unwrap()
        .build();
    let ctx = SyncContext::new(Arc::new(SyncConfig::default()), Arc::new(clock));
    let sync = Synchronizer::new(db, registry, ctx);

    assert!(matches!(
        sync.lock(&id("S1"), None).await,
        Err(SyncError::BadRequest(_))
    ));
    assert!(matches!(
        sync.lock(&CommonDataId::new("person", "P1"), None).await,
        Err(SyncError::UnknownResource(_))
    ));
}
