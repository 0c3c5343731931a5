

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::base::Event;


pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;


/// Fan-out of lifecycle notices to in-process subscribers. Handlers run on
/// spawned tasks, so a slow subscriber never holds up an undo.
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
}

impl EventBus {

    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }


    pub async fn subscribe(&self, event_type: &str, handler: EventHandler) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        debug!("Subscribed handler to {}", event_type);
    }


    pub async fn publish(&self, event: Event) {
        let handlers = self.handlers.read().await;

        let Some(event_handlers) = handlers.get(&event.event_type) else {
            debug!("No subscribers for {}", event.event_type);
            return;
        };

        for handler in event_handlers {
            let handler = Arc::clone(handler);
            let event = event.clone();

            tokio::spawn(async move {
                handler(event);
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
