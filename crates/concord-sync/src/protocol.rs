//! # Batch Requests and Results
//!
//! What the boundary layer hands the [`Synchronizer`](crate::Synchronizer)
//! and what it gets back.
//!
//! ## Batch Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DOWNLOAD                                                              │
//! │  ────────                                                              │
//! │  client ───► DownloadRequest { storageId?, lastSyncTime?, queries }    │
//! │  client ◄─── DownloadResult  { storageId, syncTime, items }            │
//! │              syncTime is the new watermark (now − result delay)        │
//! │                                                                         │
//! │  UPLOAD                                                                │
//! │  ──────                                                                │
//! │  client ───► UploadRequest { storageId?, lastUploadTime?, messages }   │
//! │  client ◄─── UploadResult  { storageId, syncTime, resultType, items }  │
//! │              resultType OK          → items are the applied writes     │
//! │              resultType UPDATED     → items are the server states of   │
//! │                                       every conflict, nothing applied  │
//! │              resultType DUPLICATEDID→ as UPDATED, batch stopped early  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All types serialize as camelCase JSON.

use concord_core::{Millis, ResultType, SyncRequestHeader, SyncResponse, SyncResultSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// Download
// =============================================================================

/// One (resource, filter) pair of a download batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub resource_name: String,

    /// Restricts the read to these item ids. `None` reads every changed item.
    #[serde(default)]
    pub item_ids: Option<Vec<String>>,
}

impl DownloadQuery {
    pub fn all(resource_name: impl Into<String>) -> Self {
        DownloadQuery {
            resource_name: resource_name.into(),
            item_ids: None,
        }
    }

    pub fn items<I, S>(resource_name: impl Into<String>, item_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DownloadQuery {
            resource_name: resource_name.into(),
            item_ids: Some(item_ids.into_iter().map(Into::into).collect()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// `None` on first contact; the server issues one.
    #[serde(default)]
    pub storage_id: Option<String>,

    /// Overrides the watermark the server recorded for this client.
    #[serde(default)]
    pub last_sync_time: Option<Millis>,

    /// Presented to the pessimistic policy so the client can read items it
    /// has locked itself.
    #[serde(default)]
    pub lock_token: Option<String>,

    pub queries: Vec<DownloadQuery>,
}

impl DownloadRequest {
    pub fn new(queries: Vec<DownloadQuery>) -> Self {
        DownloadRequest {
            queries,
            ..Default::default()
        }
    }

    pub fn with_storage_id(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = Some(storage_id.into());
        self
    }

    pub fn since(mut self, last_sync_time: Millis) -> Self {
        self.last_sync_time = Some(last_sync_time);
        self
    }

    pub fn with_lock_token(mut self, token: impl Into<String>) -> Self {
        self.lock_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub storage_id: String,

    /// Watermark to send back as `lastSyncTime` next time.
    pub sync_time: Millis,

    pub items: SyncResultSet,
}

impl DownloadResult {
    /// Groups the downloaded items by resource name.
    pub fn items_by_resource(&self) -> BTreeMap<String, Vec<SyncResponse<Value>>> {
        self.items.by_resource()
    }
}

// =============================================================================
// Upload
// =============================================================================

/// One write of an upload batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMessage {
    pub header: SyncRequestHeader,

    /// Required for PUT and POST, ignored for DELETE.
    #[serde(default)]
    pub element: Option<Value>,
}

impl UploadMessage {
    pub fn new(header: SyncRequestHeader, element: Option<Value>) -> Self {
        UploadMessage { header, element }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[serde(default)]
    pub storage_id: Option<String>,

    /// Client-chosen batch marker. A retransmission with the same value as
    /// the last committed batch is answered without re-applying it.
    #[serde(default)]
    pub last_upload_time: Option<Millis>,

    /// Applied strictly in this order.
    pub messages: Vec<UploadMessage>,
}

impl UploadRequest {
    pub fn new(messages: Vec<UploadMessage>) -> Self {
        UploadRequest {
            messages,
            ..Default::default()
        }
    }

    pub fn with_storage_id(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = Some(storage_id.into());
        self
    }

    pub fn with_upload_time(mut self, last_upload_time: Millis) -> Self {
        self.last_upload_time = Some(last_upload_time);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub storage_id: String,
    pub sync_time: Millis,
    pub result_type: ResultType,
    pub items: SyncResultSet,

    /// True when this answers a retransmitted batch that was already
    /// committed.
    #[serde(default)]
    pub replayed: bool,
}

impl UploadResult {
    pub fn is_ok(&self) -> bool {
        self.result_type.is_ok()
    }
}
