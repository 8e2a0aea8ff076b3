//! Database model types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A logical queue partition. Each stream owns one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    /// Tracked events.
    Events,
    /// Profile (people) updates.
    People,
    /// Group profile updates.
    Groups,
}

impl Stream {
    /// Every stream, in default flush priority order.
    pub const ALL: [Stream; 3] = [Stream::Events, Stream::People, Stream::Groups];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::People => "people",
            Self::Groups => "groups",
        }
    }

    /// Backing table name. The set is closed, so SQL built from it is never
    /// derived from caller input.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::People => "people",
            Self::Groups => "groups",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "events" | "event" => Ok(Self::Events),
            "people" | "profile" | "profiles" => Ok(Self::People),
            "groups" | "group" => Ok(Self::Groups),
            other => Err(format!("unknown stream: {other}")),
        }
    }
}

/// A record waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub stream: Stream,
    pub token: String,
    /// Serialized payload, stored opaque.
    pub data: String,
}

impl NewRecord {
    pub fn new(stream: Stream, token: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            stream,
            token: token.into(),
            data: data.into(),
        }
    }
}

/// A persisted queue record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Row id, strictly increasing per stream and never reused.
    pub id: i64,
    pub stream: Stream,
    pub token: String,
    pub data: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Id assigned to the new record.
    pub id: i64,
    /// Oldest records removed to make room.
    pub evicted: u64,
}

/// An ordered view over one token's records in one stream, drawn for a
/// single submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub stream: Stream,
    pub token: String,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn empty(stream: Stream, token: impl Into<String>) -> Self {
        Self {
            stream,
            token: token.into(),
            records: Vec::new(),
        }
    }

    /// Get the record ids in this batch.
    pub fn ids(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cumulative payload size in bytes.
    pub fn payload_bytes(&self) -> usize {
        self.records.iter().map(|r| r.data.len()).sum()
    }
}

/// Row count for one token in one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamTokenCount {
    pub stream: Stream,
    pub token: String,
    pub count: u64,
}
