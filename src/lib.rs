pub mod core;
pub mod db;
pub mod deletion;
pub mod utils;

pub use utils::{dom_id, safe_truncate_ellipsis, snake_case};


pub use crate::core::config::UndoConfig;
pub use crate::core::error::{ErrorKind, Result, UndoError, UndoFailure};
pub use crate::db::{MemoryStorage, Record, RecordKey, Schema, UndoStorage};
pub use crate::deletion::{DeletionEvent, DeletionUndoManager, EventStatus, ScheduleReceipt, UndoReceipt};


pub const DEFAULT_UNDO_TTL_SECS: u64 = crate::core::config::DEFAULT_TTL_SECS;


pub const DEFAULT_AUTO_HIDE_AFTER_MS: u64 = crate::core::config::DEFAULT_AUTO_HIDE_AFTER_MS;
