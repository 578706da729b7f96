use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::EventError;
use crate::types::{EventFlag, EventListener, EventSink, JobEvent};

/// Fan-out sink: delivers each event to every registered listener whose
/// flag filter matches.
///
/// Share one bus per manager (pass as `Arc<EventBus>`). Listeners run
/// synchronously on the emitting task, in priority order, so a listener sees
/// `started` before `completed` for the same execution.
pub struct EventBus {
    /// Sorted by priority ascending after every registration.
    listeners: RwLock<Vec<ListenerDefinition>>,
}

/// A registered listener binding a name, an optional flag filter and a handler.
#[derive(Clone)]
pub struct ListenerDefinition {
    /// Unique name used for deregistration and log correlation.
    pub name: String,
    /// `None` receives every event.
    pub flag: Option<EventFlag>,
    pub listener: Arc<dyn EventListener>,
    /// Lower value = earlier delivery. Ties broken by registration order.
    pub priority: i32,
}

impl ListenerDefinition {
    pub fn new(name: impl Into<String>, listener: Arc<dyn EventListener>) -> Self {
        Self {
            name: name.into(),
            flag: None,
            listener,
            priority: 0,
        }
    }

    pub fn on(mut self, flag: EventFlag) -> Self {
        self.flag = Some(flag);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn wants(&self, event: &JobEvent) -> bool {
        self.flag.map_or(true, |flag| event.matches(flag))
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener. A listener with the same name is replaced.
    pub fn register(&self, definition: ListenerDefinition) {
        let mut listeners = self.listeners.write().expect("listener registry poisoned");
        listeners.retain(|l| l.name != definition.name);
        debug!(name = %definition.name, "event listener registered");
        listeners.push(definition);
        // Stable sort preserves registration order within the same priority.
        listeners.sort_by_key(|l| l.priority);
    }

    /// Remove a listener by name. Returns whether anything was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write().expect("listener registry poisoned");
        let before = listeners.len();
        listeners.retain(|l| l.name != name);
        let removed = listeners.len() < before;
        if removed {
            debug!(name, "event listener unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.read().expect("listener registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every matching listener.
    ///
    /// Failures and panics are logged and swallowed so one bad listener cannot
    /// starve the rest or take down the emitting task.
    pub fn publish(&self, event: &JobEvent) {
        // Snapshot under the read lock, deliver with no lock held.
        let targets: Vec<ListenerDefinition> = self
            .listeners
            .read()
            .expect("listener registry poisoned")
            .iter()
            .filter(|l| l.wants(event))
            .cloned()
            .collect();

        for target in targets {
            let t = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| target.listener.handle(event)))
                .unwrap_or_else(|payload| {
                    Err(EventError::ListenerPanicked(panic_message(payload.as_ref())))
                });
            let elapsed_ms = t.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => debug!(
                    listener = %target.name,
                    flag = %event.flag,
                    job = %event.job_name,
                    duration_ms = elapsed_ms,
                    "event delivered"
                ),
                Err(e) => warn!(
                    listener = %target.name,
                    flag = %event.flag,
                    job = %event.job_name,
                    error = %e,
                    "event listener failed"
                ),
            }
        }
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &JobEvent) {
        self.publish(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::time::Duration;
    use tickwork_core::ExecutionId;

    fn at() -> DateTime<Utc> {
        "2020-01-01T00:00:00Z".parse().unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn EventListener> {
        let log = Arc::clone(log);
        Arc::new(move |ev: &JobEvent| -> crate::error::Result<()> {
            log.lock().unwrap().push(format!("{tag}:{}", ev.flag.as_str()));
            Ok(())
        })
    }

    #[test]
    fn delivers_in_priority_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(ListenerDefinition::new("late", recorder(&log, "late")).with_priority(10));
        bus.register(ListenerDefinition::new("early", recorder(&log, "early")).with_priority(-1));

        bus.emit(&JobEvent::started("job", ExecutionId::new(), at()));

        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["early:tickwork.started", "late:tickwork.started"]);
    }

    #[test]
    fn flag_filter_limits_delivery() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(
            ListenerDefinition::new("done", recorder(&log, "done")).on(EventFlag::Completed),
        );

        let id = ExecutionId::new();
        bus.emit(&JobEvent::started("job", id, at()));
        bus.emit(&JobEvent::completed("job", id, at(), Duration::from_millis(1)));

        assert_eq!(*log.lock().unwrap(), vec!["done:tickwork.completed"]);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let bad: Arc<dyn EventListener> =
            Arc::new(|_: &JobEvent| -> crate::error::Result<()> { panic!("listener bug") });
        bus.register(ListenerDefinition::new("bad", bad));
        bus.register(ListenerDefinition::new("good", recorder(&log, "good")).with_priority(1));

        bus.emit(&JobEvent::started("job", ExecutionId::new(), at()));

        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn register_replaces_and_unregister_removes() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.register(ListenerDefinition::new("a", recorder(&log, "one")));
        bus.register(ListenerDefinition::new("a", recorder(&log, "two")));
        assert_eq!(bus.len(), 1);

        assert!(bus.unregister("a"));
        assert!(!bus.unregister("a"));
        assert!(bus.is_empty());
    }
}
