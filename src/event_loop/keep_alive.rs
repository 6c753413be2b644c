use std::fmt;
use std::rc::Weak;

use super::LoopInner;

/// One unit of the loop's reference count.
///
/// The unit is held for as long as the guard lives and is returned to the
/// loop when it is dropped. A guard that outlives its loop releases nothing.
#[must_use = "dropping a KeepAlive releases the loop reference immediately"]
pub struct KeepAlive {
    event_loop: Weak<LoopInner>,
}

impl KeepAlive {
    pub(crate) fn new(event_loop: Weak<LoopInner>) -> Self {
        Self { event_loop }
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("loop_alive", &(self.event_loop.strong_count() > 0))
            .finish()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(inner) = self.event_loop.upgrade() {
            inner.release_ref();
        }
    }
}
