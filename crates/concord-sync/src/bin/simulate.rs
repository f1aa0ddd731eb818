//! Runs two clients against one database through create, update, a stale
//! update, delete and download, logging each batch result.
//!
//! ```text
//! cargo run -p concord-sync --bin simulate -- [config.toml]
//! RUST_LOG=concord=trace cargo run -p concord-sync --bin simulate
//! ```

use concord_core::{SyncMethod, SyncRequestHeader, SyncResponse};
use concord_db::Database;
use concord_sync::{
    Clock, DownloadQuery, DownloadRequest, ManualClock, ResourceRegistry, Schedule, ScheduleStore,
    SyncConfig, SyncContext, SyncResource, Synchronizer, SystemClock, UploadMessage, UploadRequest,
    UploadResult,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const SCHEDULE: &str = "schedule";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Arc::new(SyncConfig::load(config_path)?);
    info!(
        db = %config.database.path.display(),
        concurrency = %config.concurrency(),
        "Configuration loaded"
    );

    // Wall-clock start, then stepped by hand so versions stay distinct
    let clock = ManualClock::new(SystemClock.now_millis());
    let db = Database::new(config.db_config()).await?;
    let ctx = SyncContext::new(config.clone(), Arc::new(clock.clone()));
    let registry = ResourceRegistry::builder()
        .register(SyncResource::new(ScheduleStore::new()))?
        .build();
    let sync = Synchronizer::new(db.clone(), registry, ctx);

    // Both clients start with a full download
    let alice = sync.download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)])).await?;
    let bob = sync.download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)])).await?;
    info!(alice = %alice.storage_id, bob = %bob.storage_id, "Clients registered");

    // Alice creates a schedule
    clock.advance(1_000);
    let standup = Schedule::new("standup", clock.now_millis(), clock.now_millis() + 900_000);
    let created = sync
        .upload(UploadRequest::new(vec![post(standup)?]).with_storage_id(&alice.storage_id))
        .await?;
    report("alice creates", &created);
    let original = first(&created)?;

    // Both edit from the same version; Bob loses
    clock.advance(1_000);
    let moved = Schedule::new("standup", original_start(&original)? + 3_600_000, original_start(&original)? + 4_500_000);
    let alice_edit = sync
        .upload(UploadRequest::new(vec![put(&original, moved)?]).with_storage_id(&alice.storage_id))
        .await?;
    report("alice edits", &alice_edit);

    clock.advance(1_000);
    let renamed = Schedule::new("daily standup", original_start(&original)?, original_start(&original)? + 900_000);
    let bob_edit = sync
        .upload(UploadRequest::new(vec![put(&original, renamed)?]).with_storage_id(&bob.storage_id))
        .await?;
    report("bob edits a stale copy", &bob_edit);

    // Bob deletes from the server's version
    clock.advance(1_000);
    let current = first(&bob_edit)?;
    let deleted = sync
        .upload(UploadRequest::new(vec![delete(&current)]).with_storage_id(&bob.storage_id))
        .await?;
    report("bob deletes", &deleted);

    // Alice catches up and learns about the tombstone
    clock.advance(1_000);
    let catch_up = sync
        .download(DownloadRequest::new(vec![DownloadQuery::all(SCHEDULE)]).with_storage_id(&alice.storage_id))
        .await?;
    for item in catch_up.items.iter() {
        info!(
            item_id = %item.header.sync_data_id,
            action = %item.header.action,
            last_modified = item.header.last_modified,
            "alice downloads"
        );
    }

    db.close().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,concord=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .init();
}

fn post(schedule: Schedule) -> Result<UploadMessage, serde_json::Error> {
    let header = SyncRequestHeader::new(SCHEDULE, SyncMethod::Post, 0);
    Ok(UploadMessage::new(header, Some(serde_json::to_value(schedule)?)))
}

fn put(base: &SyncResponse<Value>, schedule: Schedule) -> Result<UploadMessage, serde_json::Error> {
    let header = SyncRequestHeader::new(SCHEDULE, SyncMethod::Put, 0)
        .with_item(&base.header.sync_data_id)
        .with_last_modified(base.header.last_modified);
    Ok(UploadMessage::new(header, Some(serde_json::to_value(schedule)?)))
}

fn delete(base: &SyncResponse<Value>) -> UploadMessage {
    let header = SyncRequestHeader::new(SCHEDULE, SyncMethod::Delete, 0)
        .with_item(&base.header.sync_data_id)
        .with_last_modified(base.header.last_modified);
    UploadMessage::new(header, None)
}

fn first(result: &UploadResult) -> Result<SyncResponse<Value>, Box<dyn std::error::Error>> {
    result
        .items
        .iter()
        .next()
        .cloned()
        .ok_or_else(|| "upload returned no items".into())
}

fn original_start(response: &SyncResponse<Value>) -> Result<i64, Box<dyn std::error::Error>> {
    let element = response.element.clone().ok_or("response carries no schedule")?;
    let schedule: Schedule = serde_json::from_value(element)?;
    Ok(schedule.starts_at)
}

fn report(step: &str, result: &UploadResult) {
    info!(
        step = step,
        result_type = %result.result_type,
        sync_time = result.sync_time,
        items = result.items.len(),
        "Upload finished"
    );
}
