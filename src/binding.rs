//! Host-facing surface with integer status codes.
//!
//! Every operation reports `0` on success or a negative errno, and
//! millisecond arguments arrive as signed host integers. Negative values are
//! clamped to zero since the native range is unsigned.

use crate::error::{TimerError, status_code};
use crate::event_loop::EventLoop;
use crate::timer::TimerHandle;

fn millis(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[derive(Debug)]
pub struct Timer {
    handle: TimerHandle,
}

impl Timer {
    pub fn create(event_loop: &EventLoop) -> Result<Self, TimerError> {
        Ok(Self {
            handle: TimerHandle::new(event_loop)?,
        })
    }

    pub fn handle(&self) -> &TimerHandle {
        &self.handle
    }

    /// Installs the host callback. It receives the fire status.
    pub fn set_ontimeout(&self, mut ontimeout: impl FnMut(i32) + 'static) {
        self.handle
            .on_timeout(move |_: &TimerHandle, status: i32| ontimeout(status));
    }

    pub fn start(&self, timeout: i64, repeat: i64) -> i32 {
        status_code(&self.handle.start(millis(timeout), millis(repeat)))
    }

    pub fn stop(&self) -> i32 {
        status_code(&self.handle.stop())
    }

    pub fn again(&self) -> i32 {
        status_code(&self.handle.again())
    }

    pub fn set_repeat(&self, repeat: i64) -> i32 {
        status_code(&self.handle.set_repeat(millis(repeat)))
    }

    /// The repeat interval, or a negative errno.
    pub fn get_repeat(&self) -> i64 {
        match self.handle.get_repeat() {
            Ok(repeat) => i64::try_from(repeat).unwrap_or(i64::MAX),
            Err(err) => i64::from(err.errno()),
        }
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub fn close_with(&self, on_close: impl FnOnce() + 'static) {
        self.handle.close_with(on_close);
    }
}
