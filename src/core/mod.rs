

pub mod clock;
pub mod config;
pub mod error;
pub mod events;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::UndoConfig;
pub use error::{ErrorKind, Result, UndoError, UndoFailure};
pub use events::{Event, EventBus, EventHandler};
