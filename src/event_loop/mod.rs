//! Single-threaded cooperative event loop with a timer queue and a
//! reference-counted notion of liveness.
//!
//! The loop keeps running while at least one [`KeepAlive`] unit is
//! outstanding or a close callback is pending. Timer handles acquire a unit
//! while armed and release it when they go idle, so an idle timer never keeps
//! the loop alive.
//!
//! All loop state lives behind an `Rc`; the loop and its handles are `!Send`
//! and must be driven from the thread that created them. [`EventLoop::run`]
//! sleeps on the tokio clock and needs a runtime with time enabled.

mod clock;
mod keep_alive;
mod queue;
pub(crate) mod registry;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::TimerError;
use clock::Clock;
pub use keep_alive::KeepAlive;
use queue::{QueueEntry, TimerQueue};
use registry::{NativeTimer, Registry, TimeoutSink};

// Stale entries tolerated in the queue beyond twice the armed timers.
pub(crate) const STALE_SLACK: usize = 64;

/// Identifier of a native timer registration within its loop.
pub type TimerId = u64;

/// How far [`EventLoop::run`] drives the loop before returning.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run until the loop is no longer alive or [`EventLoop::stop`] is called.
    #[default]
    Default,
    /// Run one iteration, waiting for the next deadline if necessary.
    Once,
    /// Run one iteration without waiting.
    NoWait,
}

#[derive(Debug, Default, Clone)]
pub struct LoopBuilder {
    name: Option<String>,
    max_timers: Option<usize>,
}

impl LoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label used in log events.
    pub fn with_name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_owned());
        self
    }

    /// Refuse to arm more than `max_timers` timers at once.
    pub fn with_max_timers(&mut self, max_timers: usize) -> &mut Self {
        self.max_timers = Some(max_timers);
        self
    }

    pub fn build(&self) -> EventLoop {
        let inner = LoopInner {
            name: self.name.clone().unwrap_or_else(|| "default".to_owned()),
            max_timers: self.max_timers,
            clock: Clock::new(),
            queue: RefCell::new(TimerQueue::new()),
            registry: Registry::new(),
            refs: Cell::new(0),
            armed: Cell::new(0),
            next_timer_id: Cell::new(1),
            next_start_id: Cell::new(0),
            closing: RefCell::new(VecDeque::new()),
            stop_flag: Cell::new(false),
        };
        debug!(event_loop = %inner.name, max_timers = ?inner.max_timers, "event loop created");
        EventLoop {
            inner: Rc::new(inner),
        }
    }
}

pub(crate) struct LoopInner {
    name: String,
    max_timers: Option<usize>,
    clock: Clock,
    queue: RefCell<TimerQueue>,
    registry: Registry,
    refs: Cell<usize>,
    armed: Cell<usize>,
    next_timer_id: Cell<TimerId>,
    next_start_id: Cell<u64>,
    closing: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    stop_flag: Cell<bool>,
}

impl LoopInner {
    pub(crate) fn release_ref(&self) {
        let refs = self.refs.get().saturating_sub(1);
        self.refs.set(refs);
        trace!(event_loop = %self.name, refs, "keep-alive released");
    }
}

/// Shared reference to an event loop. Clones refer to the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.inner.name)
            .field("now", &self.now())
            .field("refs", &self.ref_count())
            .field("armed", &self.active_timers())
            .field("queued", &self.queue_len())
            .finish()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        LoopBuilder::new().build()
    }

    pub(crate) fn downgrade(&self) -> Weak<LoopInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<LoopInner>) -> Option<EventLoop> {
        inner.upgrade().map(|inner| EventLoop { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Cached loop time in milliseconds.
    pub fn now(&self) -> u64 {
        self.inner.clock.now()
    }

    pub fn update_time(&self) -> u64 {
        self.inner.clock.update()
    }

    /// Outstanding keep-alive units.
    pub fn ref_count(&self) -> usize {
        self.inner.refs.get()
    }

    /// Number of currently armed timers.
    pub fn active_timers(&self) -> usize {
        self.inner.armed.get()
    }

    /// Number of timer registrations that have not been closed.
    pub fn timer_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_alive(&self) -> bool {
        self.inner.refs.get() > 0 || !self.inner.closing.borrow().is_empty()
    }

    pub fn acquire_keep_alive(&self) -> KeepAlive {
        let refs = self.inner.refs.get() + 1;
        self.inner.refs.set(refs);
        trace!(event_loop = %self.inner.name, refs, "keep-alive acquired");
        KeepAlive::new(self.downgrade())
    }

    /// Ask the running loop to return after its current iteration.
    pub fn stop(&self) {
        self.inner.stop_flag.set(true);
    }

    /// Time until the earliest armed deadline, relative to cached loop time.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(self.now())))
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Queues an entry, compacting the queue when stopped, restarted or
    /// closed timers have left too many stale entries behind.
    fn enqueue(&self, entry: QueueEntry) {
        self.inner.queue.borrow_mut().push(entry);
        self.compact();
    }

    fn compact(&self) {
        let limit = 2 * self.inner.armed.get() + STALE_SLACK;
        let mut queue = self.inner.queue.borrow_mut();
        if queue.len() <= limit {
            return;
        }
        let before = queue.len();
        let registry = &self.inner.registry;
        queue.retain(|entry| registry.is_current(entry.timer, entry.start_id));
        trace!(event_loop = %self.inner.name, before, after = queue.len(), "timer queue compacted");
    }

    fn next_deadline(&self) -> Option<u64> {
        let registry = &self.inner.registry;
        self.inner
            .queue
            .borrow_mut()
            .next_deadline(|entry| registry.is_current(entry.timer, entry.start_id))
    }

    // Native timer operations.

    /// Allocates a native timer. Initialization always hands back one
    /// keep-alive unit together with the new registration.
    pub(crate) fn timer_init(&self) -> Result<(TimerId, KeepAlive), TimerError> {
        let id = self.inner.next_timer_id.get();
        self.inner.next_timer_id.set(id + 1);
        self.inner.registry.insert(id);
        trace!(event_loop = %self.inner.name, timer = id, "timer initialized");
        Ok((id, self.acquire_keep_alive()))
    }

    pub(crate) fn timer_bind(&self, id: TimerId, sink: Weak<dyn TimeoutSink>) -> Result<(), TimerError> {
        self.inner.registry.get_mut(id)?.sink = Some(sink);
        Ok(())
    }

    pub(crate) fn timer_start(&self, id: TimerId, timeout: u64, repeat: u64) -> Result<(), TimerError> {
        self.update_time();
        let entry = {
            let mut timer = self.inner.registry.get_mut(id)?;
            self.reserve(&timer)?;
            timer.timeout = timeout;
            timer.repeat = repeat;
            timer.started = true;
            self.arm(id, &mut timer, timeout)
        };
        self.enqueue(entry);
        debug!(
            event_loop = %self.inner.name,
            timer = id,
            deadline = entry.deadline,
            repeat,
            "timer started"
        );
        Ok(())
    }

    pub(crate) fn timer_stop(&self, id: TimerId) -> Result<(), TimerError> {
        let stopped = self.inner.registry.get_mut(id)?.deadline.take().is_some();
        if stopped {
            self.inner.armed.set(self.inner.armed.get() - 1);
            self.compact();
            debug!(event_loop = %self.inner.name, timer = id, "timer stopped");
        }
        Ok(())
    }

    /// Re-arms with the repeat interval, or with the last delay for a
    /// one-shot timer.
    pub(crate) fn timer_again(&self, id: TimerId) -> Result<(), TimerError> {
        self.update_time();
        let entry = {
            let mut timer = self.inner.registry.get_mut(id)?;
            if !timer.started {
                return Err(TimerError::InvalidState("timer has never been started"));
            }
            self.reserve(&timer)?;
            let timeout = if timer.repeat > 0 {
                timer.repeat
            } else {
                timer.timeout
            };
            self.arm(id, &mut timer, timeout)
        };
        self.enqueue(entry);
        debug!(event_loop = %self.inner.name, timer = id, deadline = entry.deadline, "timer re-armed");
        Ok(())
    }

    pub(crate) fn timer_set_repeat(&self, id: TimerId, repeat: u64) -> Result<(), TimerError> {
        self.inner.registry.get_mut(id)?.repeat = repeat;
        Ok(())
    }

    pub(crate) fn timer_get_repeat(&self, id: TimerId) -> Result<u64, TimerError> {
        self.inner.registry.with(id, |timer| timer.repeat)
    }

    /// Ground truth: whether the native timer is currently armed.
    pub(crate) fn timer_is_active(&self, id: TimerId) -> bool {
        self.inner.registry.is_armed(id)
    }

    /// Disarms and frees the registration. Returns false if it was already gone.
    pub(crate) fn timer_close(&self, id: TimerId) -> bool {
        match self.inner.registry.remove(id) {
            Some(timer) => {
                if timer.is_armed() {
                    self.inner.armed.set(self.inner.armed.get() - 1);
                }
                self.compact();
                trace!(event_loop = %self.inner.name, timer = id, "timer closed");
                true
            }
            None => false,
        }
    }

    /// Queues a close callback for the next loop iteration.
    pub(crate) fn defer_close(&self, on_close: Box<dyn FnOnce()>) {
        self.inner.closing.borrow_mut().push_back(on_close);
    }

    fn reserve(&self, timer: &NativeTimer) -> Result<(), TimerError> {
        match self.inner.max_timers {
            Some(limit) if !timer.is_armed() && self.inner.armed.get() >= limit => {
                warn!(event_loop = %self.inner.name, limit, "timer registration refused");
                Err(TimerError::ResourceExhausted { limit })
            }
            _ => Ok(()),
        }
    }

    fn arm(&self, id: TimerId, timer: &mut NativeTimer, timeout: u64) -> QueueEntry {
        if !timer.is_armed() {
            self.inner.armed.set(self.inner.armed.get() + 1);
        }
        let start_id = self.inner.next_start_id.get();
        self.inner.next_start_id.set(start_id + 1);
        let deadline = self.now().saturating_add(timeout);
        timer.deadline = Some(deadline);
        timer.start_id = start_id;
        QueueEntry {
            deadline,
            start_id,
            timer: id,
        }
    }

    // Loop driving.

    /// Fires every timer due at the cached loop time. Timers armed while this
    /// runs wait for the next pass. Returns the number of fires dispatched.
    pub(crate) fn run_timers(&self) -> usize {
        let now = self.now();
        let due = self.inner.queue.borrow_mut().pop_expired(now);
        let mut fired = 0;
        for entry in due {
            let (sink, rearmed) = {
                let Ok(mut timer) = self.inner.registry.get_mut(entry.timer) else {
                    continue;
                };
                if !timer.is_armed() || timer.start_id != entry.start_id {
                    continue;
                }
                timer.deadline = None;
                self.inner.armed.set(self.inner.armed.get() - 1);
                let rearmed = if timer.repeat > 0 {
                    let repeat = timer.repeat;
                    Some(self.arm(entry.timer, &mut timer, repeat))
                } else {
                    None
                };
                (timer.sink.clone(), rearmed)
            };
            if let Some(next) = rearmed {
                self.enqueue(next);
            }
            trace!(event_loop = %self.inner.name, timer = entry.timer, now, "timer fired");
            fired += 1;
            if let Some(sink) = sink.and_then(|sink| sink.upgrade()) {
                sink.on_timeout(0);
            }
        }
        fired
    }

    fn run_closing(&self) -> usize {
        let pending = std::mem::take(&mut *self.inner.closing.borrow_mut());
        let count = pending.len();
        for on_close in pending {
            on_close();
        }
        count
    }

    /// One non-blocking step: refresh loop time, fire due timers, then run
    /// pending close callbacks. Returns the number of timer fires.
    pub fn run_expired(&self) -> usize {
        self.update_time();
        let fired = self.run_timers();
        self.run_closing();
        fired
    }

    /// Drives the loop according to `mode`. Returns whether the loop is
    /// still alive.
    pub async fn run(&self, mode: RunMode) -> bool {
        let mut alive = self.is_alive();
        if !alive {
            self.update_time();
        }
        debug!(event_loop = %self.inner.name, ?mode, refs = self.ref_count(), "loop run");

        while alive && !self.inner.stop_flag.get() {
            self.run_expired();

            let can_wait = mode != RunMode::NoWait
                && !self.inner.stop_flag.get()
                && self.inner.closing.borrow().is_empty()
                && self.inner.refs.get() > 0;
            if can_wait {
                match self.next_deadline() {
                    Some(deadline) if deadline > self.now() => {
                        tokio::time::sleep_until(self.inner.clock.instant_at(deadline)).await;
                    }
                    Some(_) => {}
                    None => {
                        warn!(
                            event_loop = %self.inner.name,
                            refs = self.ref_count(),
                            "loop is referenced but nothing is scheduled"
                        );
                        break;
                    }
                }
            }

            if mode == RunMode::Once {
                self.update_time();
                self.run_timers();
                self.run_closing();
            }

            alive = self.is_alive();
            if mode != RunMode::Default {
                break;
            }
        }

        self.inner.stop_flag.set(false);
        alive
    }
}
