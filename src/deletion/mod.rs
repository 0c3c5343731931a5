pub mod capture;
pub mod executor;
pub mod manager;
pub mod models;
pub mod restore;
pub mod snapshot;
pub mod sweeper;
pub mod tokens;

pub use capture::SnapshotCapture;
pub use executor::{owned_rows, DeletionExecutor};
pub use manager::DeletionUndoManager;
pub use models::{
    DeletionEvent, EventStatus, Metadata, ScheduleReceipt, ScheduleRequest, UndoReceipt,
    META_RESOURCE_DOM_ID, META_RESOURCE_LABEL, META_UNDO_DEADLINE,
};
pub use restore::{RestoreReport, SnapshotRestorer};
pub use snapshot::{preorder, replay_order, SnapshotNode, TraversalError, Visit};
pub use sweeper::{ExpirySweeper, SweepStats};
pub use tokens::{ExpiredBatch, TokenStore};
