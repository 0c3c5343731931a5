use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::models::{Attributes, ForeignKeyDef, Record, RecordId, RecordKey, Schema};
use super::storage::{StoreError, UndoStorage};
use crate::deletion::{DeletionEvent, EventStatus};


type Tables = HashMap<String, BTreeMap<RecordId, Attributes>>;


#[derive(Debug, Default)]
struct Database {
    tables: Tables,
    events: HashMap<String, DeletionEvent>,
}


/// In-process backend. Transactions are serializable: `begin` takes the
/// database lock and works on a private copy of the tables that `commit`
/// swaps in whole. Events are never copied; a transaction stages the ones it
/// writes and reads the committed map through them.
#[derive(Clone)]
pub struct MemoryStorage {
    foreign_keys: Arc<Vec<ForeignKeyDef>>,
    db: Arc<Mutex<Database>>,
}


pub struct MemoryTx {
    guard: OwnedMutexGuard<Database>,
    tables: Tables,
    staged: HashMap<String, DeletionEvent>,
}

impl MemoryTx {
    fn event(&self, token: &str) -> Option<&DeletionEvent> {
        self.staged.get(token).or_else(|| self.guard.events.get(token))
    }
}

impl MemoryStorage {
    /// One empty table per declared model, with every FK the schema implies.
    pub fn new(schema: &Schema) -> Self {
        let mut db = Database::default();
        for model in schema.models() {
            db.tables.insert(model.name.clone(), BTreeMap::new());
        }

        Self {
            foreign_keys: Arc::new(schema.foreign_keys()),
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Inserts rows in order inside one transaction.
    pub async fn seed(&self, records: Vec<Record>) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        for record in records {
            self.insert_record(&mut tx, record).await?;
        }
        self.commit(tx).await
    }

    pub async fn fetch(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        let mut tx = self.begin().await?;
        let found = self.find_record(&mut tx, key).await?;
        self.rollback(tx).await?;
        Ok(found)
    }

    pub async fn row_count(&self, model: &str) -> usize {
        let db = self.db.lock().await;
        db.tables.get(model).map_or(0, BTreeMap::len)
    }

    pub async fn total_rows(&self) -> usize {
        let db = self.db.lock().await;
        db.tables.values().map(BTreeMap::len).sum()
    }

    pub async fn event_count(&self) -> usize {
        self.db.lock().await.events.len()
    }

    /// Removes a row outside the undo engine, as another part of the
    /// application would. Still subject to foreign keys.
    pub async fn remove(&self, key: &RecordKey) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        self.delete_record(&mut tx, key).await?;
        self.commit(tx).await
    }
}

fn table<'a>(
    tables: &'a Tables,
    model: &str,
) -> Result<&'a BTreeMap<RecordId, Attributes>, StoreError> {
    tables
        .get(model)
        .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
}

fn table_mut<'a>(
    tables: &'a mut Tables,
    model: &str,
) -> Result<&'a mut BTreeMap<RecordId, Attributes>, StoreError> {
    tables
        .get_mut(model)
        .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
}

fn to_record(model: &str, id: RecordId, attributes: &Attributes) -> Record {
    Record {
        model: model.to_string(),
        id,
        attributes: attributes.clone(),
    }
}

#[async_trait]
impl UndoStorage for MemoryStorage {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let guard = Arc::clone(&self.db).lock_owned().await;
        let tables = guard.tables.clone();
        Ok(MemoryTx {
            guard,
            tables,
            staged: HashMap::new(),
        })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        let MemoryTx {
            mut guard,
            tables,
            staged,
        } = tx;
        guard.tables = tables;
        guard.events.extend(staged);
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), StoreError> {
        drop(tx);
        Ok(())
    }

    async fn find_record(
        &self,
        tx: &mut MemoryTx,
        key: &RecordKey,
    ) -> Result<Option<Record>, StoreError> {
        let rows = table(&tx.tables, &key.model)?;
        Ok(rows.get(&key.id).map(|attrs| to_record(&key.model, key.id, attrs)))
    }

    async fn find_records_by(
        &self,
        tx: &mut MemoryTx,
        model: &str,
        column: &str,
        value: RecordId,
    ) -> Result<Vec<Record>, StoreError> {
        let rows = table(&tx.tables, model)?;
        Ok(rows
            .iter()
            .filter(|(_, attrs)| attrs.get(column).and_then(Value::as_i64) == Some(value))
            .map(|(id, attrs)| to_record(model, *id, attrs))
            .collect())
    }

    async fn insert_record(&self, tx: &mut MemoryTx, record: Record) -> Result<(), StoreError> {
        let key = record.key();
        if table(&tx.tables, &record.model)?.contains_key(&record.id) {
            return Err(StoreError::DuplicateKey(key));
        }

        for fk in self.foreign_keys.iter().filter(|fk| fk.table == record.model) {
            let Some(target_id) = record.id_column(&fk.column) else {
                continue;
            };
            // Self-references to the row being inserted are satisfied by the insert itself.
            if fk.references == record.model && target_id == record.id {
                continue;
            }
            if !table(&tx.tables, &fk.references)?.contains_key(&target_id) {
                return Err(StoreError::MissingReference {
                    relation: fk.relation(),
                    record: key,
                    referenced: RecordKey::new(fk.references.clone(), target_id),
                });
            }
        }

        debug!("insert {}", key);
        table_mut(&mut tx.tables, &record.model)?.insert(record.id, record.attributes);
        Ok(())
    }

    async fn delete_record(&self, tx: &mut MemoryTx, key: &RecordKey) -> Result<(), StoreError> {
        if !table(&tx.tables, &key.model)?.contains_key(&key.id) {
            return Err(StoreError::RecordNotFound(key.clone()));
        }

        for fk in self.foreign_keys.iter().filter(|fk| fk.references == key.model) {
            let rows = table(&tx.tables, &fk.table)?;
            let blocking = rows.iter().find(|(id, attrs)| {
                let points_here = attrs.get(&fk.column).and_then(Value::as_i64) == Some(key.id);
                let is_self = fk.table == key.model && **id == key.id;
                points_here && !is_self
            });
            if let Some((id, _)) = blocking {
                return Err(StoreError::ForeignKeyViolation {
                    relation: fk.relation(),
                    referenced: key.clone(),
                    referencing: RecordKey::new(fk.table.clone(), *id),
                });
            }
        }

        debug!("delete {}", key);
        table_mut(&mut tx.tables, &key.model)?.remove(&key.id);
        Ok(())
    }

    async fn insert_event(&self, tx: &mut MemoryTx, event: DeletionEvent) -> Result<(), StoreError> {
        if tx.event(&event.token).is_some() {
            return Err(StoreError::DuplicateEvent);
        }
        tx.staged.insert(event.token.clone(), event);
        Ok(())
    }

    async fn find_event(
        &self,
        tx: &mut MemoryTx,
        token: &str,
    ) -> Result<Option<DeletionEvent>, StoreError> {
        Ok(tx.event(token).cloned())
    }

    async fn transition_event(
        &self,
        tx: &mut MemoryTx,
        token: &str,
        expected: EventStatus,
        next: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<DeletionEvent, StoreError> {
        let mut event = tx.event(token).cloned().ok_or(StoreError::EventNotFound)?;

        if event.status != expected {
            return Err(StoreError::StatusConflict {
                expected,
                actual: event.status,
            });
        }
        if !expected.can_transition_to(next) {
            return Err(StoreError::Backend(format!(
                "illegal status transition {expected} -> {next}"
            )));
        }

        event.status = next;
        if next == EventStatus::Consumed {
            event.consumed_at = Some(at);
        }
        tx.staged.insert(token.to_string(), event.clone());
        Ok(event)
    }

    async fn overdue_events(
        &self,
        tx: &mut MemoryTx,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let committed = tx
            .guard
            .events
            .values()
            .filter(|e| !tx.staged.contains_key(&e.token));
        let mut overdue: Vec<&DeletionEvent> = committed
            .chain(tx.staged.values())
            .filter(|e| e.status == EventStatus::Pending && e.undo_deadline < now)
            .collect();
        overdue.sort_by(|a, b| a.undo_deadline.cmp(&b.undo_deadline).then(a.token.cmp(&b.token)));

        Ok(overdue
            .into_iter()
            .take(limit)
            .map(|e| e.token.clone())
            .collect())
    }
}
