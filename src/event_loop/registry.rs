use std::rc::{Rc, Weak};

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;

use super::TimerId;
use crate::error::TimerError;

/// Receives fire events for one native timer.
pub(crate) trait TimeoutSink {
    fn on_timeout(self: Rc<Self>, status: i32);
}

/// Loop-side state of one timer registration.
pub(crate) struct NativeTimer {
    /// Delay passed to the most recent `start`.
    pub timeout: u64,
    pub repeat: u64,
    /// Set while the timer is armed.
    pub deadline: Option<u64>,
    pub start_id: u64,
    /// Whether `start` has ever succeeded.
    pub started: bool,
    pub sink: Option<Weak<dyn TimeoutSink>>,
}

impl NativeTimer {
    fn new() -> Self {
        Self {
            timeout: 0,
            repeat: 0,
            deadline: None,
            start_id: 0,
            started: false,
            sink: None,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

pub(crate) struct Registry {
    timers: DashMap<TimerId, NativeTimer>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            timers: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, id: TimerId) {
        self.timers.insert(id, NativeTimer::new());
    }

    pub(crate) fn remove(&self, id: TimerId) -> Option<NativeTimer> {
        self.timers.remove(&id).map(|(_, timer)| timer)
    }

    /// Mutable access to a live timer. Callers must drop the guard before
    /// touching the registry again.
    pub(crate) fn get_mut(&self, id: TimerId) -> Result<RefMut<'_, TimerId, NativeTimer>, TimerError> {
        self.timers.get_mut(&id).ok_or(TimerError::BadHandle)
    }

    pub(crate) fn with<R>(&self, id: TimerId, f: impl FnOnce(&NativeTimer) -> R) -> Result<R, TimerError> {
        self.timers
            .get(&id)
            .map(|timer| f(&timer))
            .ok_or(TimerError::BadHandle)
    }

    pub(crate) fn is_armed(&self, id: TimerId) -> bool {
        self.with(id, NativeTimer::is_armed).unwrap_or(false)
    }

    /// Whether a queued entry still describes the timer's current arming.
    pub(crate) fn is_current(&self, id: TimerId, start_id: u64) -> bool {
        self.with(id, |t| t.is_armed() && t.start_id == start_id)
            .unwrap_or(false)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = Registry::new();
        registry.insert(1);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_armed(1));

        {
            let mut timer = registry.get_mut(1).unwrap();
            timer.deadline = Some(10);
            timer.start_id = 4;
        }
        assert!(registry.is_armed(1));
        assert!(registry.is_current(1, 4));
        assert!(!registry.is_current(1, 3));

        assert!(registry.remove(1).is_some());
        assert!(!registry.is_armed(1));
        assert_eq!(registry.get_mut(1).err(), Some(TimerError::BadHandle));
    }
}
