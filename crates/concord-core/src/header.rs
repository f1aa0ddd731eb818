//! # Sync Headers
//!
//! Per-message request headers built by the boundary layer, and the
//! server-side version returned with each element.
//!
//! ## Parsing Flow
//! ```text
//! boundary (strings)            engine (typed)
//! ──────────────────            ──────────────
//! RawSyncRequestHeader ──try_from──► SyncRequestHeader
//!        │                              │
//!        └── "abc" as lastModified ─────┴──► SyncError::BadRequest
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{SyncError, SyncResult};
use crate::types::{CommonData, CommonDataId, Millis, SyncAction};

// =============================================================================
// Sync Method
// =============================================================================

/// The operation a message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMethod::Get => write!(f, "GET"),
            SyncMethod::Put => write!(f, "PUT"),
            SyncMethod::Post => write!(f, "POST"),
            SyncMethod::Delete => write!(f, "DELETE"),
        }
    }
}

impl FromStr for SyncMethod {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(SyncMethod::Get),
            "PUT" => Ok(SyncMethod::Put),
            "POST" => Ok(SyncMethod::Post),
            "DELETE" => Ok(SyncMethod::Delete),
            other => Err(SyncError::BadRequest(format!(
                "Unknown sync method: '{}'. Valid options: GET, PUT, POST, DELETE",
                other
            ))),
        }
    }
}

// =============================================================================
// Request Header
// =============================================================================

/// Typed header for one sync message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestHeader {
    /// Client identity. `None` until the server issues one.
    pub storage_id: Option<String>,

    /// Resource name.
    pub data_model_name: String,

    /// Resource-item id. Optional for POST (the adapter allocates one).
    pub sync_data_id: Option<String>,

    pub sync_method: SyncMethod,

    /// The version the client last observed. Required for PUT and DELETE.
    pub last_modified: Option<Millis>,

    pub request_time: Millis,

    /// Token presented under the pessimistic policy.
    #[serde(default)]
    pub lock_token: Option<String>,

    /// Keep the lock after a successful write.
    #[serde(default)]
    pub keep_lock: bool,
}

impl SyncRequestHeader {
    pub fn new(data_model_name: impl Into<String>, sync_method: SyncMethod, request_time: Millis) -> Self {
        SyncRequestHeader {
            storage_id: None,
            data_model_name: data_model_name.into(),
            sync_data_id: None,
            sync_method,
            last_modified: None,
            request_time,
            lock_token: None,
            keep_lock: false,
        }
    }

    pub fn with_item(mut self, sync_data_id: impl Into<String>) -> Self {
        self.sync_data_id = Some(sync_data_id.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: Millis) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_storage_id(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = Some(storage_id.into());
        self
    }

    pub fn with_lock_token(mut self, token: impl Into<String>) -> Self {
        self.lock_token = Some(token.into());
        self
    }

    /// Returns the item key, failing with `BadRequest` if the header has
    /// no item id.
    pub fn common_data_id(&self) -> SyncResult<CommonDataId> {
        let item_id = self.sync_data_id.as_deref().ok_or_else(|| {
            SyncError::BadRequest(format!(
                "{} on '{}' requires a syncDataId",
                self.sync_method, self.data_model_name
            ))
        })?;
        Ok(CommonDataId::new(&self.data_model_name, item_id))
    }

    /// Returns the declared client version, failing with `BadRequest` if
    /// the client did not declare one.
    pub fn declared_version(&self) -> SyncResult<Millis> {
        self.last_modified.ok_or_else(|| {
            SyncError::BadRequest(format!(
                "{} on '{}' requires lastModified",
                self.sync_method, self.data_model_name
            ))
        })
    }

    /// Checks the shape rules that do not depend on server state.
    pub fn validate(&self) -> SyncResult<()> {
        if self.data_model_name.trim().is_empty() {
            return Err(SyncError::BadRequest("dataModelName is required".into()));
        }

        match self.sync_method {
            SyncMethod::Put | SyncMethod::Delete => {
                self.common_data_id()?;
                self.declared_version()?;
            }
            SyncMethod::Get | SyncMethod::Post => {}
        }

        Ok(())
    }
}

/// Header exactly as the boundary layer received it.
///
/// Timestamps arrive as strings; converting to [`SyncRequestHeader`] is
/// where malformed requests are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSyncRequestHeader {
    pub storage_id: Option<String>,
    pub data_model_name: String,
    pub sync_data_id: Option<String>,
    pub sync_method: String,
    pub last_modified: Option<String>,
    pub request_time: String,
    #[serde(default)]
    pub lock_token: Option<String>,
    #[serde(default)]
    pub keep_lock: bool,
}

/// Parses a millisecond timestamp, rejecting anything non-numeric.
pub fn parse_timestamp(field: &str, value: &str) -> SyncResult<Millis> {
    value.trim().parse::<Millis>().map_err(|_| {
        SyncError::BadRequest(format!("{} must be a numeric timestamp, got '{}'", field, value))
    })
}

impl TryFrom<RawSyncRequestHeader> for SyncRequestHeader {
    type Error = SyncError;

    fn try_from(raw: RawSyncRequestHeader) -> Result<Self, Self::Error> {
        let last_modified = raw
            .last_modified
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_timestamp("lastModified", s))
            .transpose()?;

        let header = SyncRequestHeader {
            storage_id: raw.storage_id.filter(|s| !s.is_empty()),
            data_model_name: raw.data_model_name,
            sync_data_id: raw.sync_data_id.filter(|s| !s.is_empty()),
            sync_method: raw.sync_method.parse()?,
            last_modified,
            request_time: parse_timestamp("requestTime", &raw.request_time)?,
            lock_token: raw.lock_token.filter(|s| !s.is_empty()),
            keep_lock: raw.keep_lock,
        };

        header.validate()?;
        Ok(header)
    }
}

// =============================================================================
// Response
// =============================================================================

/// Server-side version of an item after an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponseHeader {
    pub data_model_name: String,
    pub sync_data_id: String,
    pub action: SyncAction,
    pub last_modified: Millis,
}

impl SyncResponseHeader {
    pub fn id(&self) -> CommonDataId {
        CommonDataId::new(&self.data_model_name, &self.sync_data_id)
    }
}

impl From<&CommonData> for SyncResponseHeader {
    fn from(data: &CommonData) -> Self {
        SyncResponseHeader {
            data_model_name: data.id.resource_name.clone(),
            sync_data_id: data.id.resource_item_id.clone(),
            action: data.action,
            last_modified: data.last_modified,
        }
    }
}

/// A server version paired with its domain element.
///
/// `element` is `None` for tombstones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse<E> {
    pub header: SyncResponseHeader,
    pub element: Option<E>,
}

impl<E> SyncResponse<E> {
    pub fn new(data: &CommonData, element: Option<E>) -> Self {
        SyncResponse {
            header: SyncResponseHeader::from(data),
            element,
        }
    }

    pub fn id(&self) -> CommonDataId {
        self.header.id()
    }

    /// Maps the element, keeping the header.
    pub fn map<F, T>(self, f: F) -> SyncResponse<T>
    where
        F: FnOnce(E) -> T,
    {
        SyncResponse {
            header: self.header,
            element: self.element.map(f),
        }
    }
}

impl<E: Serialize> SyncResponse<E> {
    /// Converts the element to JSON so responses of different resources can
    /// share one result set.
    pub fn into_json(self) -> SyncResult<SyncResponse<serde_json::Value>> {
        let element = self.element.map(serde_json::to_value).transpose()?;
        Ok(SyncResponse {
            header: self.header,
            element,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(method: &str, last_modified: Option<&str>) -> RawSyncRequestHeader {
        RawSyncRequestHeader {
            storage_id: Some("client-a".into()),
            data_model_name: "schedule".into(),
            sync_data_id: Some("S1".into()),
            sync_method: method.into(),
            last_modified: last_modified.map(str::to_string),
            request_time: "1000".into(),
            lock_token: None,
            keep_lock: false,
        }
    }

    #[test]
    fn test_sync_method_parsing() {
        assert_eq!("put".parse::<SyncMethod>().unwrap(), SyncMethod::Put);
        assert_eq!(" DELETE ".parse::<SyncMethod>().unwrap(), SyncMethod::Delete);
        assert!(matches!(
            "PATCH".parse::<SyncMethod>(),
            Err(SyncError::BadRequest(_))
        ));
    }

    #[test]
    fn test_raw_header_parses() {
        let header = SyncRequestHeader::try_from(raw("PUT", Some("100"))).unwrap();
        assert_eq!(header.sync_method, SyncMethod::Put);
        assert_eq!(header.last_modified, Some(100));
        assert_eq!(header.request_time, 1000);
        assert_eq!(header.common_data_id().unwrap(), CommonDataId::new("schedule", "S1"));
    }

    #[test]
    fn test_non_numeric_timestamp_is_bad_request() {
        let err = SyncRequestHeader::try_from(raw("PUT", Some("yesterday"))).unwrap_err();
        assert!(matches!(err, SyncError::BadRequest(_)));
        assert!(err.to_string().contains("lastModified"));

        let mut bad_time = raw("POST", None);
        bad_time.request_time = "12:00".into();
        assert!(matches!(
            SyncRequestHeader::try_from(bad_time),
            Err(SyncError::BadRequest(_))
        ));
    }

    #[test]
    fn test_put_requires_declared_version() {
        let err = SyncRequestHeader::try_from(raw("PUT", None)).unwrap_err();
        assert!(matches!(err, SyncError::BadRequest(_)));

        // POST does not need one
        assert!(SyncRequestHeader::try_from(raw("POST", None)).is_ok());
    }

    #[test]
    fn test_response_into_json_keeps_header() {
        let data = CommonData::created(CommonDataId::new("schedule", "S1"), "1", 42);
        let response = SyncResponse::new(&data, Some(vec![1, 2, 3]));
        let json = response.into_json().unwrap();

        assert_eq!(json.header.last_modified, 42);
        assert_eq!(json.header.action, SyncAction::Create);
        assert_eq!(json.element, Some(serde_json::json!([1, 2, 3])));
    }
}
