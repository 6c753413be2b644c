use async_channel::{Sender, TrySendError};
use tracing::warn;

use crate::event_loop::TimerId;
use crate::timer::TimerHandle;

/// One fire notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub timer: TimerId,
    /// Native status of the fire. 0 for a normal expiry.
    pub status: i32,
}

/// Receiver of fire notifications for one timer.
///
/// Invoked synchronously from the loop after the timer's active state has
/// been settled, so the callback may freely start, stop, re-arm or close
/// the timer it is given.
pub trait OnTimeout: 'static {
    fn on_timeout(&mut self, timer: &TimerHandle, status: i32);
}

impl<F> OnTimeout for F
where
    F: FnMut(&TimerHandle, i32) + 'static,
{
    fn on_timeout(&mut self, timer: &TimerHandle, status: i32) {
        self(timer, status)
    }
}

impl OnTimeout for Sender<TimerEvent> {
    fn on_timeout(&mut self, timer: &TimerHandle, status: i32) {
        let event = TimerEvent {
            timer: timer.id(),
            status,
        };
        match self.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(timer = event.timer, "timer event channel full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(timer = event.timer, "timer event channel closed, dropping event");
            }
        }
    }
}
