use std::sync::Arc;

use tracing::{debug, info, warn};

use super::models::DeletionEvent;
use super::snapshot::{replay_order, Visit};
use crate::core::error::{Result, UndoError};
use crate::db::{Schema, StoreError, UndoStorage};


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub rows_restored: usize,
    pub references_checked: usize,
}


/// Replays a snapshot into storage inside the caller's transaction. Nothing is
/// committed here: on any error the caller drops the transaction and the
/// store is exactly as it was.
pub struct SnapshotRestorer<S: UndoStorage> {
    storage: Arc<S>,
    schema: Arc<Schema>,
}

impl<S: UndoStorage> SnapshotRestorer<S> {
    pub fn new(storage: Arc<S>, schema: Arc<Schema>) -> Self {
        Self { storage, schema }
    }

    pub async fn restore(&self, tx: &mut S::Tx, event: &DeletionEvent) -> Result<RestoreReport> {
        let visits = replay_order(&self.schema, &event.snapshot)
            .map_err(|e| UndoError::restore(e.path, e.reason))?;

        let mut report = RestoreReport::default();

        // Shared rows are checked up front so a missing one stops the replay
        // before anything is written.
        for visit in visits.iter().filter(|v| v.node.is_reference) {
            self.check_reference(tx, visit).await?;
            report.references_checked += 1;
        }

        for visit in visits.iter().filter(|v| !v.node.is_reference) {
            self.insert_owned(tx, visit).await?;
            report.rows_restored += 1;
        }

        info!(
            "Restored {}#{}: {} rows, {} references verified",
            event.resource_type, event.resource_id, report.rows_restored, report.references_checked
        );
        Ok(report)
    }

    async fn check_reference(&self, tx: &mut S::Tx, visit: &Visit<'_>) -> Result<()> {
        let node = visit.node;
        if node.attributes.is_some() {
            return Err(UndoError::restore(
                visit.path.clone(),
                "reference node carries attributes",
            ));
        }

        let key = node.key();
        if self.storage.find_record(tx, &key).await?.is_none() {
            warn!("Shared record {} is gone, aborting restore", key);
            return Err(UndoError::ReferenceRecordNotFound {
                reference: key,
                path: visit.path.clone(),
            });
        }
        debug!("Reference {} present", key);
        Ok(())
    }

    async fn insert_owned(&self, tx: &mut S::Tx, visit: &Visit<'_>) -> Result<()> {
        let record = visit.node.to_record().ok_or_else(|| {
            UndoError::restore(visit.path.clone(), "owned node has no captured attributes")
        })?;

        let key = record.key();
        match self.storage.insert_record(tx, record).await {
            Ok(()) => {
                debug!("Re-inserted {}", key);
                Ok(())
            }
            Err(StoreError::DuplicateKey(_)) => Err(UndoError::restore(
                visit.path.clone(),
                format!("{} already exists", key),
            )),
            Err(StoreError::MissingReference { relation, referenced, .. }) => Err(UndoError::restore(
                visit.path.clone(),
                format!("{} points at missing {} via {}", key, referenced, relation),
            )),
            Err(StoreError::UnknownModel(model)) => Err(UndoError::restore(
                visit.path.clone(),
                format!("model {} is not declared", model),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
