use crate::errors::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Out,
    In,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Out => f.write_str("OUT"),
            EventKind::In => f.write_str("IN"),
        }
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OUT" => Ok(EventKind::Out),
            "IN" => Ok(EventKind::In),
            other => Err(CoreError::invalid(format!("kind must be OUT or IN, got `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub group_id: String,
    pub name: String,
}

/// An event as submitted to the store, before it has an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub group_id: String,
    pub member_id: String,
    pub member_name: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub day_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    /// Store-assigned append sequence; breaks timestamp ties.
    pub seq: u64,
    pub group_id: String,
    pub member_id: String,
    pub member_name: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub day_key: String,
}

impl Event {
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }
}

/// Inclusive span of day keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRange {
    pub start: String,
    pub end: String,
}

impl DayRange {
    pub fn single(day_key: impl Into<String>) -> Self {
        let day_key = day_key.into();
        Self {
            start: day_key.clone(),
            end: day_key,
        }
    }

    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn contains(&self, day_key: &str) -> bool {
        self.start.as_str() <= day_key && day_key <= self.end.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub name: String,
    /// Last derived status, written through for inspection only.
    #[serde(default)]
    pub is_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub name: String,
    #[serde(default)]
    pub members: BTreeMap<String, MemberRecord>,
}

/// The persisted local state document.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    #[serde(default)]
    pub groups: BTreeMap<String, GroupRecord>,
    #[serde(default)]
    pub logs_by_day_key: BTreeMap<String, Vec<Event>>,
}

impl AppData {
    pub fn max_seq(&self) -> u64 {
        self.logs_by_day_key
            .values()
            .flatten()
            .map(|event| event.seq)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct MemberNameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub member_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub period: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TodayResponse {
    pub date: String,
    pub timezone: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub member_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    pub id: String,
    pub name: String,
    pub is_out: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub group_id: String,
    pub date: String,
    pub members: Vec<MemberStatus>,
    pub events: Vec<Event>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignResponse {
    pub recorded: bool,
    pub event: Option<Event>,
    pub status: StatusResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UndoResponse {
    pub removed: bool,
    pub status: StatusResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub removed: bool,
}
