pub mod farm;
pub mod memory;
pub mod models;
pub mod storage;

pub use memory::{MemoryStorage, MemoryTx};
pub use models::{
    AssociationDef, AssociationKind, Attributes, ForeignKeyDef, ModelDef, Record, RecordId,
    RecordKey, Schema,
};
pub use storage::{StoreError, UndoStorage};
