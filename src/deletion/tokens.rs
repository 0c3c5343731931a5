use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::models::{DeletionEvent, EventStatus};
use crate::core::error::{Result, UndoError};
use crate::db::{StoreError, UndoStorage};


const TOKEN_BYTES: usize = 32;

const FINGERPRINT_BYTES: usize = 6;

lazy_static! {
    static ref TOKEN_FORMAT: Regex = Regex::new(r"^[0-9a-f]{64}$").unwrap();
}


/// 256 bits from the OS RNG, lowercase hex.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Short, non-reversible handle for a token, safe to log.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

pub fn is_well_formed(token: &str) -> bool {
    TOKEN_FORMAT.is_match(token)
}


#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiredBatch {
    pub scanned: usize,
    pub expired: Vec<String>,
    pub raced: usize,
}


/// Durable, keyed store of deletion events. Every status change goes through
/// the storage compare-and-set, which is what makes a token single-use.
pub struct TokenStore<S: UndoStorage> {
    storage: Arc<S>,
}

impl<S: UndoStorage> Clone for TokenStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: UndoStorage> TokenStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub async fn create(&self, tx: &mut S::Tx, event: DeletionEvent) -> Result<()> {
        debug!(
            "Storing deletion event {} for {}#{}",
            fingerprint(&event.token),
            event.resource_type,
            event.resource_id
        );
        self.storage.insert_event(tx, event).await?;
        Ok(())
    }

    /// Read-only lookup in its own transaction.
    pub async fn get(&self, token: &str) -> Result<DeletionEvent> {
        if !is_well_formed(token) {
            return Err(UndoError::NotFound);
        }

        let mut tx = self.storage.begin().await?;
        let found = self.storage.find_event(&mut tx, token).await;
        self.storage.rollback(tx).await?;

        found?.ok_or(UndoError::NotFound)
    }

    /// Flips `pending → consumed` and returns the event. A pending event past its
    /// deadline is flipped to `expired` instead and reported as `Expired`; the
    /// caller commits that flip.
    pub async fn consume(
        &self,
        tx: &mut S::Tx,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<DeletionEvent> {
        if !is_well_formed(token) {
            debug!("Rejecting malformed undo token");
            return Err(UndoError::NotFound);
        }

        let tag = fingerprint(token);
        let event = self
            .storage
            .find_event(tx, token)
            .await?
            .ok_or_else(|| {
                warn!("Undo token {} not found", tag);
                UndoError::NotFound
            })?;

        match event.status {
            EventStatus::Consumed => {
                warn!("Undo token {} already consumed", tag);
                return Err(UndoError::AlreadyConsumed {
                    consumed_at: event.consumed_at,
                });
            }
            EventStatus::Expired => {
                warn!("Undo token {} already expired", tag);
                return Err(UndoError::Expired {
                    deadline: event.undo_deadline,
                });
            }
            EventStatus::Pending => {}
        }

        if event.is_overdue(now) {
            info!(
                "Undo token {} presented after deadline {}, expiring",
                tag, event.undo_deadline
            );
            self.storage
                .transition_event(tx, token, EventStatus::Pending, EventStatus::Expired, now)
                .await
                .map_err(|e| conflict_to_error(e, &event))?;
            return Err(UndoError::Expired {
                deadline: event.undo_deadline,
            });
        }

        let consumed = self
            .storage
            .transition_event(tx, token, EventStatus::Pending, EventStatus::Consumed, now)
            .await
            .map_err(|e| conflict_to_error(e, &event))?;

        debug!("Undo token {} consumed", tag);
        Ok(consumed)
    }

    /// Marks one pending event expired. `false` when something else changed it
    /// first.
    pub async fn expire(&self, tx: &mut S::Tx, token: &str, now: DateTime<Utc>) -> Result<bool> {
        match self
            .storage
            .transition_event(tx, token, EventStatus::Pending, EventStatus::Expired, now)
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::StatusConflict { actual, .. }) => {
                debug!("Token {} moved to {} before expiry", fingerprint(token), actual);
                Ok(false)
            }
            Err(StoreError::EventNotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Expires up to `limit` pending events whose deadline is strictly before
    /// `now`, earliest first.
    pub async fn expire_overdue(
        &self,
        tx: &mut S::Tx,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<ExpiredBatch> {
        let overdue = self.storage.overdue_events(tx, now, limit).await?;
        let mut batch = ExpiredBatch {
            scanned: overdue.len(),
            ..ExpiredBatch::default()
        };

        for token in overdue {
            if self.expire(tx, &token, now).await? {
                batch.expired.push(token);
            } else {
                batch.raced += 1;
            }
        }

        Ok(batch)
    }
}

fn conflict_to_error(err: StoreError, event: &DeletionEvent) -> UndoError {
    match err {
        StoreError::StatusConflict {
            actual: EventStatus::Consumed,
            ..
        } => UndoError::AlreadyConsumed {
            consumed_at: event.consumed_at,
        },
        StoreError::StatusConflict {
            actual: EventStatus::Expired,
            ..
        } => UndoError::Expired {
            deadline: event.undo_deadline,
        },
        StoreError::EventNotFound => UndoError::NotFound,
        other => other.into(),
    }
}
