//! Timer handles for a single-threaded event loop.
//!
//! A [`TimerHandle`] keeps its [`EventLoop`] alive only while it is armed.
//! Creating a timer, stopping it, letting a one-shot timer fire, or closing
//! it all leave the loop free to exit, and a repeating timer holds the loop
//! until it is stopped or closed.
//!
//! ```no_run
//! use looptimer::{EventLoop, RunMode, TimerHandle};
//!
//! # async fn demo() -> Result<(), looptimer::TimerError> {
//! let event_loop = EventLoop::new();
//! let timer = TimerHandle::new(&event_loop)?;
//! timer.on_timeout(|timer: &TimerHandle, status: i32| {
//!     println!("timer {} fired with status {status}", timer.id());
//! });
//! timer.start(100, 0)?;
//! event_loop.run(RunMode::Default).await;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod error;
pub mod event_loop;
mod handle;
pub mod timer;

pub use error::TimerError;
pub use event_loop::{EventLoop, KeepAlive, LoopBuilder, RunMode, TimerId};
pub use timer::{OnTimeout, TimerEvent, TimerHandle};
