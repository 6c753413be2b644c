use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::TimerError;
use crate::event_loop::registry::TimeoutSink;
use crate::event_loop::{EventLoop, KeepAlive, TimerId};
use crate::handle::HandleBase;
use crate::timer::OnTimeout;

/// A timer registered with an [`EventLoop`].
///
/// The handle holds exactly one keep-alive unit on its loop while the timer
/// is armed and none otherwise. Whether it is armed is always read back from
/// the loop after an operation, never inferred from the arguments.
///
/// Clones share the same timer. The timer is closed by [`TimerHandle::close`]
/// or when the last clone is dropped.
#[derive(Clone)]
pub struct TimerHandle {
    core: Rc<TimerCore>,
}

struct TimerCore {
    id: TimerId,
    base: HandleBase,
    /// `Some` exactly while the native timer is armed.
    keep_alive: RefCell<Option<KeepAlive>>,
    on_timeout: RefCell<Option<Box<dyn OnTimeout>>>,
}

impl TimerCore {
    /// Re-reads the armed state from the loop and moves the keep-alive unit
    /// on a transition.
    fn state_change(&self, event_loop: &EventLoop) {
        let was_active = self.keep_alive.borrow().is_some();
        let active = event_loop.timer_is_active(self.id);
        if !was_active && active {
            *self.keep_alive.borrow_mut() = Some(event_loop.acquire_keep_alive());
            trace!(timer = self.id, "timer became active");
        } else if was_active && !active {
            let released = self.keep_alive.borrow_mut().take();
            drop(released);
            trace!(timer = self.id, "timer became inactive");
        }
    }

    fn close(&self, on_close: Option<Box<dyn FnOnce()>>) -> bool {
        let closed = self.base.close(
            |event_loop| {
                if let Some(event_loop) = event_loop {
                    event_loop.timer_close(self.id);
                    self.state_change(event_loop);
                }
                let released = self.keep_alive.borrow_mut().take();
                drop(released);
            },
            on_close,
        );
        if closed {
            let callback = self.on_timeout.borrow_mut().take();
            drop(callback);
            debug!(timer = self.id, "timer closed");
        }
        closed
    }
}

impl Drop for TimerCore {
    fn drop(&mut self) {
        if self.close(None) {
            trace!(timer = self.id, "timer dropped while open");
        }
    }
}

impl TimeoutSink for TimerCore {
    fn on_timeout(self: Rc<Self>, status: i32) {
        TimerHandle { core: self }.dispatch(status);
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.core.id)
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TimerHandle {
    /// Creates an idle timer on `event_loop`. The new timer does not keep the
    /// loop alive.
    pub fn new(event_loop: &EventLoop) -> Result<Self, TimerError> {
        let (id, init_ref) = event_loop.timer_init()?;
        // Initialization references the loop unconditionally; an idle timer must not.
        drop(init_ref);

        let core = Rc::new(TimerCore {
            id,
            base: HandleBase::new(event_loop),
            keep_alive: RefCell::new(None),
            on_timeout: RefCell::new(None),
        });
        let sink = Rc::downgrade(&core) as Weak<dyn TimeoutSink>;
        event_loop.timer_bind(id, sink)?;

        debug!(event_loop = event_loop.name(), timer = id, "timer created");
        Ok(Self { core })
    }

    pub fn id(&self) -> TimerId {
        self.core.id
    }

    /// Whether the timer is armed and holding a loop reference.
    pub fn is_active(&self) -> bool {
        self.core.keep_alive.borrow().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.core.base.is_closed()
    }

    /// Registers the fire callback, replacing any previous one.
    pub fn on_timeout(&self, callback: impl OnTimeout) {
        let previous = self.core.on_timeout.replace(Some(Box::new(callback)));
        drop(previous);
    }

    /// Arms the timer to fire `delay` ms from now, then every `repeat` ms
    /// (0 for a one-shot). Restarting an armed timer replaces its deadline.
    pub fn start(&self, delay: u64, repeat: u64) -> Result<(), TimerError> {
        self.apply("start", |event_loop, id| {
            event_loop.timer_start(id, delay, repeat)
        })
    }

    /// Disarms the timer. Stopping an idle timer succeeds.
    pub fn stop(&self) -> Result<(), TimerError> {
        self.apply("stop", |event_loop, id| event_loop.timer_stop(id))
    }

    /// Re-arms with the configured interval: the repeat if non-zero,
    /// otherwise the delay of the last `start`. Fails if the timer was never
    /// started.
    pub fn again(&self) -> Result<(), TimerError> {
        self.apply("again", |event_loop, id| event_loop.timer_again(id))
    }

    /// Changes the repeat interval used by the next re-arm. Does not arm or
    /// disarm the timer.
    pub fn set_repeat(&self, repeat: u64) -> Result<(), TimerError> {
        let event_loop = self.core.base.event_loop()?;
        event_loop.timer_set_repeat(self.core.id, repeat)
    }

    pub fn get_repeat(&self) -> Result<u64, TimerError> {
        let event_loop = self.core.base.event_loop()?;
        event_loop.timer_get_repeat(self.core.id)
    }

    /// Closes the timer, disarming it and releasing its loop reference.
    /// Returns false if it was already closed.
    pub fn close(&self) -> bool {
        self.core.close(None)
    }

    /// Like [`TimerHandle::close`], running `on_close` on the next loop
    /// iteration.
    pub fn close_with(&self, on_close: impl FnOnce() + 'static) -> bool {
        self.core.close(Some(Box::new(on_close)))
    }

    fn apply(
        &self,
        op: &'static str,
        f: impl FnOnce(&EventLoop, TimerId) -> Result<(), TimerError>,
    ) -> Result<(), TimerError> {
        let event_loop = self.core.base.event_loop()?;
        let result = f(&event_loop, self.core.id);
        self.core.state_change(&event_loop);
        match &result {
            Ok(()) => trace!(timer = self.core.id, op, active = self.is_active(), "timer op"),
            Err(err) => debug!(timer = self.core.id, op, %err, active = self.is_active(), "timer op failed"),
        }
        result
    }

    fn dispatch(&self, status: i32) {
        let core = &self.core;
        // Settle state first so the callback sees it.
        if let Ok(event_loop) = core.base.event_loop() {
            core.state_change(&event_loop);
        }

        let callback = core.on_timeout.borrow_mut().take();
        let Some(mut callback) = callback else {
            trace!(timer = core.id, status, "timer fired without a callback");
            return;
        };
        callback.on_timeout(self, status);

        // Put the callback back unless it closed the timer or installed a
        // replacement.
        let unused = if core.base.is_closed() {
            Some(callback)
        } else {
            let mut slot = core.on_timeout.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
                None
            } else {
                Some(callback)
            }
        };
        drop(unused);
    }
}
