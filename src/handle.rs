//! Lifecycle shared by every loop-attached handle.

use std::cell::Cell;
use std::rc::Weak;

use tracing::trace;

use crate::error::TimerError;
use crate::event_loop::{EventLoop, LoopInner};

/// Closed-state bookkeeping and a non-owning link to the loop.
pub(crate) struct HandleBase {
    event_loop: Weak<LoopInner>,
    closed: Cell<bool>,
}

impl HandleBase {
    pub(crate) fn new(event_loop: &EventLoop) -> Self {
        Self {
            event_loop: event_loop.downgrade(),
            closed: Cell::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// The loop this handle is attached to. Fails once the handle is closed
    /// or the loop is gone.
    pub(crate) fn event_loop(&self) -> Result<EventLoop, TimerError> {
        if self.closed.get() {
            return Err(TimerError::BadHandle);
        }
        EventLoop::upgrade(&self.event_loop).ok_or(TimerError::LoopGone)
    }

    /// Marks the handle closed and runs `release` once. A second call does
    /// nothing and returns false. `on_close` runs on the next loop iteration.
    pub(crate) fn close(
        &self,
        release: impl FnOnce(Option<&EventLoop>),
        on_close: Option<Box<dyn FnOnce()>>,
    ) -> bool {
        if self.closed.replace(true) {
            trace!("close on an already closed handle");
            return false;
        }
        let event_loop = EventLoop::upgrade(&self.event_loop);
        release(event_loop.as_ref());
        if let (Some(event_loop), Some(on_close)) = (event_loop, on_close) {
            event_loop.defer_close(on_close);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_close_runs_release_once() {
        let event_loop = EventLoop::new();
        let base = HandleBase::new(&event_loop);
        let releases = Rc::new(Cell::new(0));

        let counter = releases.clone();
        assert!(base.close(move |_| counter.set(counter.get() + 1), None));
        let counter = releases.clone();
        assert!(!base.close(move |_| counter.set(counter.get() + 1), None));

        assert_eq!(releases.get(), 1);
        assert!(base.is_closed());
        assert_eq!(base.event_loop().err(), Some(TimerError::BadHandle));
    }

    #[test]
    fn test_close_callback_is_deferred() {
        let event_loop = EventLoop::new();
        let base = HandleBase::new(&event_loop);
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        base.close(|_| {}, Some(Box::new(move || flag.set(true))));
        assert!(!ran.get());
        assert!(event_loop.is_alive());

        event_loop.run_expired();
        assert!(ran.get());
        assert!(!event_loop.is_alive());
    }

    #[test]
    fn test_loop_gone() {
        let event_loop = EventLoop::new();
        let base = HandleBase::new(&event_loop);
        drop(event_loop);
        assert_eq!(base.event_loop().err(), Some(TimerError::LoopGone));
        assert!(base.close(|event_loop| assert!(event_loop.is_none()), None));
    }
}
