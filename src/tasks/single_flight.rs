//! At most one in-flight task per operation class.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{Task, TaskManager};

#[derive(Debug, Default)]
struct ClassSlot {
    counter: u64,
    current: Option<String>,
}

/// Starts tasks through a [`TaskManager`] so that a new task of a class first
/// cancels the previous one of the same class. Ids are `<class>-<n>`.
#[derive(Debug)]
pub struct SingleFlight {
    manager: TaskManager,
    slots: Mutex<HashMap<String, ClassSlot>>,
}

impl SingleFlight {
    pub fn new(manager: TaskManager) -> Self {
        Self {
            manager,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// Cancel the previous `class` task, if still active, then start `task`.
    /// Returns the new task's id, or `None` if the manager refused it.
    pub fn start<T: Task>(&self, class: &str, task: T) -> Option<String> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(class.to_string()).or_default();

        if let Some(previous) = slot.current.take() {
            if self.manager.cancel(&previous) {
                tracing::debug!(class = %class, id = %previous, "Cancelled previous task");
            }
        }

        slot.counter += 1;
        let id = format!("{class}-{}", slot.counter);
        if self.manager.start(id.clone(), task) {
            slot.current = Some(id.clone());
            Some(id)
        } else {
            None
        }
    }

    /// Id of the latest task started for `class`, if it is still active.
    pub fn current(&self, class: &str) -> Option<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(class)
            .and_then(|slot| slot.current.clone())
            .filter(|id| self.manager.is_active(id))
    }

    /// Cancel the in-flight task of `class`. Returns whether one was active.
    pub fn cancel(&self, class: &str) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(class).and_then(|slot| slot.current.take()) {
            Some(id) => self.manager.cancel(&id),
            None => false,
        }
    }
}
