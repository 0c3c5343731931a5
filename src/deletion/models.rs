use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use super::snapshot::SnapshotNode;
use crate::db::RecordKey;


pub type Metadata = BTreeMap<String, String>;

pub const META_UNDO_DEADLINE: &str = "undo_deadline";
pub const META_RESOURCE_LABEL: &str = "resource_label";
pub const META_RESOURCE_DOM_ID: &str = "resource_dom_id";


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Consumed,
    Expired,
}

impl EventStatus {
    /// pending → consumed and pending → expired are the only legal moves.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Pending, EventStatus::Consumed) | (EventStatus::Pending, EventStatus::Expired)
        )
    }
}


/// One scheduled deletion, persisted atomically with the delete itself. Field
/// order matches the persisted representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionEvent {
    pub token: String,
    pub resource_type: String,
    pub resource_id: String,
    pub actor_id: String,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub undo_deadline: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
    pub toast_message: String,
    pub snapshot: SnapshotNode,
}

impl DeletionEvent {
    /// Strictly after the deadline; a call landing exactly on it still wins.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.undo_deadline
    }
}


#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub resource: RecordKey,
    pub actor_id: String,
    pub metadata: Metadata,
    pub toast_message: Option<String>,
    pub ttl: Option<chrono::Duration>,
}

impl ScheduleRequest {
    pub fn new(resource: RecordKey, actor_id: impl Into<String>) -> Self {
        Self {
            resource,
            actor_id: actor_id.into(),
            metadata: Metadata::new(),
            toast_message: None,
            ttl: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_toast(mut self, message: impl Into<String>) -> Self {
        self.toast_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}


/// What `schedule` hands back to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleReceipt {
    pub token: String,
    pub undo_deadline: DateTime<Utc>,
    pub toast_message: String,
    pub metadata: Metadata,
    pub auto_hide_after: u64,
    pub resource_type: String,
    pub resource_id: String,
}

impl ScheduleReceipt {
    pub fn from_event(event: &DeletionEvent, auto_hide_after: u64) -> Self {
        Self {
            token: event.token.clone(),
            undo_deadline: event.undo_deadline,
            toast_message: event.toast_message.clone(),
            metadata: event.metadata.clone(),
            auto_hide_after,
            resource_type: event.resource_type.clone(),
            resource_id: event.resource_id.clone(),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoReceipt {
    pub token: String,
    pub resource_type: String,
    pub resource_id: String,
    pub restored_at: DateTime<Utc>,
    pub rows_restored: usize,
}
