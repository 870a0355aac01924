//! Represents a committed archive in the object store and the logical
//! filename it was uploaded under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// A committed artifact in the remote store.
///
/// The `pathname` is the commit-time name (`<unix seconds>_<logical name>`),
/// which keeps revisions of the same logical file distinct and ordered.
/// Objects are immutable once created; superseded revisions are deleted by
/// the overwrite policy, never modified.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Commit-time name of the object.
    pub pathname: String,

    /// Location of the object in the backing store.
    pub url: String,

    /// When the store accepted the object.
    pub uploaded_at: DateTime<Utc>,

    /// Size in bytes.
    pub size: i64,
}

impl StoredObject {
    /// True when this object is a committed revision of `name`: the pathname
    /// equals the logical name or ends with `_<name>`.
    pub fn matches_name(&self, name: &LogicalName) -> bool {
        let name = name.as_str();
        self.pathname == name
            || self
                .pathname
                .strip_suffix(name)
                .is_some_and(|head| head.ends_with('_'))
    }

    /// True when the pathname carries the given extension (e.g. `.zip`).
    pub fn has_extension(&self, extension: &str) -> bool {
        self.pathname.ends_with(extension)
    }
}

/// Metadata row for objects held by the local backend.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectRow {
    pub id: Uuid,
    pub pathname: String,
    pub size_bytes: i64,
    pub etag: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A client-supplied filename with every path component stripped.
///
/// Used as the upload session key and as the suffix that ties committed
/// objects back to the file they were uploaded as.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogicalName(String);

impl LogicalName {
    /// Sanitize a raw filename. Returns `None` when nothing usable remains.
    pub fn parse(raw: &str) -> Option<Self> {
        let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
        if base.is_empty() || base == "." || base == ".." {
            return None;
        }
        if base.chars().any(|c| c.is_control()) {
            return None;
        }
        Some(Self(base.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name under which a revision committed at `timestamp` is stored.
    pub fn committed_name(&self, timestamp: i64) -> String {
        format!("{}_{}", timestamp, self.0)
    }
}

impl fmt::Display for LogicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
