

pub mod base;
pub mod bus;

pub use base::{Event, DELETION_EXPIRED, DELETION_RESTORED, DELETION_SCHEDULED};
pub use bus::{EventBus, EventHandler};
