//! Connection id → task map owned by the reactor

use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::fd::RawFd;

use crate::task::{ConnId, TaskRef};

/// A registered connection: the task driving it and the socket the reactor polls
#[derive(Clone)]
pub struct Slot {
    pub task: TaskRef,
    pub fd: RawFd,
}

#[derive(Default)]
pub struct TaskRegistry {
    slots: Mutex<HashMap<ConnId, Slot>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ConnId, task: TaskRef, fd: RawFd) {
        self.slots.lock().insert(id, Slot { task, fd });
    }

    pub fn slot(&self, id: ConnId) -> Option<Slot> {
        self.slots.lock().get(&id).cloned()
    }

    pub fn task(&self, id: ConnId) -> Option<TaskRef> {
        self.slots.lock().get(&id).map(|s| s.task.clone())
    }

    pub fn fd(&self, id: ConnId) -> Option<RawFd> {
        self.slots.lock().get(&id).map(|s| s.fd)
    }

    /// Removing the slot drops the registry's reference; the socket closes
    /// once the last in-flight reference is gone
    pub fn remove(&self, id: ConnId) -> Option<Slot> {
        self.slots.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
