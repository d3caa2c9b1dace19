use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

pub const ACCOUNTS_CHANGED: &str = "accountsChanged";
pub const CHAIN_CHANGED: &str = "chainChanged";
pub const DISCONNECT: &str = "disconnect";

/// A registered event callback, compared by identity for removal.
pub trait Listener: Clone {
    fn call(&self, payload: &Value);
    fn same(&self, other: &Self) -> bool;
}

pub type RustListener = Rc<dyn Fn(&Value)>;

impl Listener for RustListener {
    fn call(&self, payload: &Value) {
        (self.as_ref())(payload)
    }

    fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

#[derive(Debug)]
pub struct EventEmitter<L> {
    listeners: HashMap<String, Vec<L>>,
}

impl<L> Default for EventEmitter<L> {
    fn default() -> Self {
        Self { listeners: HashMap::new() }
    }
}

impl<L: Listener> EventEmitter<L> {
    pub fn on(&mut self, event: &str, listener: L) {
        self.listeners.entry(event.to_string()).or_default().push(listener);
    }

    /// Removes every registration of `listener` for `event`. Unknown events
    /// and listeners are fine.
    pub fn remove_listener(&mut self, event: &str, listener: &L) {
        if let Some(registered) = self.listeners.get_mut(event) {
            registered.retain(|l| !l.same(listener));
            if registered.is_empty() {
                self.listeners.remove(event);
            }
        }
    }

    pub fn remove_all(&mut self, event: Option<&str>) {
        match event {
            Some(event) => {
                self.listeners.remove(event);
            }
            None => self.listeners.clear(),
        }
    }

    /// Snapshot of the listeners for `event`; callers emit outside the borrow
    /// so a listener may (un)register others while running.
    pub fn listeners(&self, event: &str) -> Vec<L> {
        self.listeners.get(event).cloned().unwrap_or_default()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map(Vec::len).unwrap_or(0)
    }
}
