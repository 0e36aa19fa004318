//! Error channel towards the notification layer.
//!
//! Decode threads never return errors across thread boundaries; they emit a
//! human-readable message here and carry on (or deinitialize).

use parking_lot::Mutex;
use std::sync::Arc;

type Handler = Arc<dyn Fn(&str) + Send + Sync>;

/// Cloneable multi-subscriber error signal.
#[derive(Clone, Default)]
pub struct ErrorSignal {
    handlers: Arc<Mutex<Vec<Handler>>>,
}

impl ErrorSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every emitted message.
    pub fn connect<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.handlers.lock().push(Arc::new(handler));
    }

    /// Emit a message to every subscriber.
    pub fn emit(&self, message: &str) {
        tracing::error!("{}", message);
        // handlers may emit or connect in turn
        let handlers = self.handlers.lock().clone();
        for handler in &handlers {
            handler(message);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl std::fmt::Debug for ErrorSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSignal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Collects emitted messages; handy for callers that poll instead of subscribing.
#[derive(Clone, Default)]
pub struct ErrorLog {
    messages: Arc<Mutex<Vec<String>>>,
}

impl ErrorLog {
    /// Create a log attached to `signal`.
    pub fn attach(signal: &ErrorSignal) -> Self {
        let log = Self::default();
        let sink = log.messages.clone();
        signal.connect(move |msg| sink.lock().push(msg.to_string()));
        log
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}
