

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::deletion::tokens::fingerprint;
use crate::deletion::DeletionEvent;


pub const DELETION_SCHEDULED: &str = "deletion_undo.scheduled";

pub const DELETION_RESTORED: &str = "deletion_undo.restored";

pub const DELETION_EXPIRED: &str = "deletion_undo.expired";


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    /// One of the `DELETION_*` names.
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    /// Never carries a raw token, only its fingerprint.
    pub payload: Value,
}

impl Event {
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Lifecycle notice for a deletion event. The payload names the token only by
    /// its fingerprint so subscribers never see a redeemable capability.
    #[must_use]
    pub fn lifecycle(event_type: &str, deletion: &DeletionEvent) -> Self {
        Self::new(
            event_type,
            json!({
                "token_fingerprint": fingerprint(&deletion.token),
                "resource_type": deletion.resource_type,
                "resource_id": deletion.resource_id,
                "actor_id": deletion.actor_id,
                "status": deletion.status,
                "undo_deadline": deletion.undo_deadline,
            }),
        )
    }

    /// Expiry notice from the sweeper, which only knows the token.
    #[must_use]
    pub fn expired(token: &str) -> Self {
        Self::new(
            DELETION_EXPIRED,
            json!({ "token_fingerprint": fingerprint(token) }),
        )
    }
}
